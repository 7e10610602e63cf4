use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use brewdesk_auth::{PermissionOracle, SessionToken};
use http::{Method, StatusCode};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::transport::{RemoteRequest, RemoteResponse, Transport, TransportError};

enum Scripted {
    Ready(StatusCode, Value),
    Held(oneshot::Receiver<(StatusCode, Value)>),
}

/// Transport double: replies come from a per-route script, every request is recorded,
/// and an unscripted route behaves like a timed-out network call.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    requests: Mutex<Vec<RemoteRequest>>,
    script: Mutex<HashMap<(Method, String), VecDeque<Scripted>>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn respond(&self, method: Method, path: &str, status: StatusCode, body: Value) {
        self.push(method, path, Scripted::Ready(status, body));
    }

    pub(crate) fn hold(&self, method: Method, path: &str) -> oneshot::Sender<(StatusCode, Value)> {
        let (tx, rx) = oneshot::channel();
        self.push(method, path, Scripted::Held(rx));
        tx
    }

    pub(crate) fn requests(&self) -> Vec<RemoteRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn push(&self, method: Method, path: &str, scripted: Scripted) {
        self.script
            .lock()
            .unwrap()
            .entry((method, path.to_string()))
            .or_default()
            .push_back(scripted);
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: RemoteRequest) -> Result<RemoteResponse, TransportError> {
        let key = (request.method.clone(), request.path.clone());
        self.requests.lock().unwrap().push(request);

        let next = self
            .script
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(|queue| queue.pop_front());

        let (status, body) = match next {
            Some(Scripted::Ready(status, body)) => (status, body),
            Some(Scripted::Held(rx)) => rx.await.map_err(|_| TransportError::Timeout)?,
            None => return Err(TransportError::Timeout),
        };
        Ok(RemoteResponse { status, body })
    }
}

pub(crate) fn token_with(permissions: &[&str]) -> SessionToken {
    let token = encode(
        &Header::new(Algorithm::HS256),
        &serde_json::json!({
            "sub": "auth0|tester",
            "permissions": permissions,
        }),
        &EncodingKey::from_secret(b"console-test-secret"),
    )
    .expect("token encode should succeed");
    SessionToken::new(token)
}

pub(crate) fn oracle_with(permissions: &[&str]) -> PermissionOracle {
    PermissionOracle::unverified(Arc::new(token_with(permissions)))
}
