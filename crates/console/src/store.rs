use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use brewdesk_auth::PermissionOracle;
use brewdesk_contracts::{Capability, ErrorBody};
use http::StatusCode;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::metrics;
use crate::transport::{RemoteRequest, Transport, TransportError};

/// Entity type the console caches from the remote store.
pub trait Resource: Clone + Send + Sync + 'static {
    type Key: Clone + Eq + Hash + fmt::Display + fmt::Debug + Send + Sync + 'static;

    const KIND: &'static str;
    const READ: Capability;
    const LIST_PATH: &'static str;

    /// Persisted identifier, `None` while the entity only exists locally.
    fn key(&self) -> Option<Self::Key>;

    fn decode_list(body: Value) -> Result<Vec<Self>, serde_json::Error>;
}

/// Resource that can be created, updated and deleted through a draft.
pub trait MutableResource: Resource + Serialize {
    const CREATE: Capability;
    const UPDATE: Capability;
    const DELETE: Capability;
    const CREATE_PATH: &'static str;

    fn item_path(key: &Self::Key) -> String;

    fn decode_saved(body: Value) -> Result<Self, StoreError>;

    fn decode_deleted(body: Value) -> Result<Self::Key, StoreError>;

    fn blank() -> Self;

    /// Restores editing invariants on a working copy before it is handed out.
    fn prepare_for_edit(&mut self) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gated<T> {
    Done(T),
    Skipped,
}

impl<T> Gated<T> {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Gated::Skipped)
    }

    pub fn done(self) -> Option<T> {
        match self {
            Gated::Done(value) => Some(value),
            Gated::Skipped => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome<T> {
    Applied(T),
    /// 400 from the remote store; carries its `message` verbatim.
    Rejected(String),
    /// Accepted remotely, but the edit session was retired before the reply landed.
    Stale,
    Skipped,
}

#[derive(Debug)]
pub enum StoreError {
    Transport(TransportError),
    BadStatus {
        status: StatusCode,
        message: Option<String>,
    },
    InvalidResponse(String),
    Encode(String),
    TaskAborted,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Transport(err) => write!(f, "{}", err),
            StoreError::BadStatus {
                status,
                message: Some(message),
            } => write!(f, "remote store returned {}: {}", status, message),
            StoreError::BadStatus {
                status,
                message: None,
            } => write!(f, "remote store returned {}", status),
            StoreError::InvalidResponse(reason) => {
                write!(f, "remote store returned an invalid response: {}", reason)
            }
            StoreError::Encode(reason) => write!(f, "failed to encode request body: {}", reason),
            StoreError::TaskAborted => write!(f, "background request task was aborted"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<TransportError> for StoreError {
    fn from(value: TransportError) -> Self {
        StoreError::Transport(value)
    }
}

pub(crate) enum Reply {
    Success(Value),
    Rejected(String),
    Failed {
        status: StatusCode,
        message: Option<String>,
    },
}

impl Reply {
    fn classify(status: StatusCode, body: Value) -> Self {
        if status.is_success() {
            return Reply::Success(body);
        }

        let error = serde_json::from_value::<ErrorBody>(body).unwrap_or_default();
        if status == StatusCode::BAD_REQUEST {
            Reply::Rejected(
                error
                    .message
                    .unwrap_or_else(|| "request was rejected".to_string()),
            )
        } else {
            Reply::Failed {
                status,
                message: error.message,
            }
        }
    }

    pub(crate) fn into_error(self) -> StoreError {
        match self {
            Reply::Success(_) => StoreError::InvalidResponse("unexpected success".to_string()),
            Reply::Rejected(message) => StoreError::BadStatus {
                status: StatusCode::BAD_REQUEST,
                message: Some(message),
            },
            Reply::Failed { status, message } => StoreError::BadStatus { status, message },
        }
    }

    fn outcome_label(&self) -> &'static str {
        match self {
            Reply::Success(_) => "success",
            Reply::Rejected(_) => "rejected",
            Reply::Failed { .. } => "error",
        }
    }
}

/// Identity of one edit session; responses for retired tickets never reach the cache.
#[derive(Debug, Clone)]
pub struct EditTicket {
    generation: u64,
    retired: Arc<AtomicBool>,
}

impl EditTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }
}

struct SessionRegistry<K> {
    next_generation: AtomicU64,
    latest: Mutex<HashMap<K, u64>>,
}

impl<K: Eq + Hash + Clone> SessionRegistry<K> {
    fn new() -> Self {
        Self {
            next_generation: AtomicU64::new(0),
            latest: Mutex::new(HashMap::new()),
        }
    }

    fn open(&self, key: Option<&K>) -> EditTicket {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(key) = key {
            self.latest_guard().insert(key.clone(), generation);
        }
        EditTicket {
            generation,
            retired: Arc::new(AtomicBool::new(false)),
        }
    }

    fn is_current(&self, ticket: &EditTicket, key: Option<&K>) -> bool {
        if ticket.is_retired() {
            return false;
        }
        match key {
            Some(key) => self.latest_guard().get(key) == Some(&ticket.generation),
            None => true,
        }
    }

    fn release(&self, ticket: &EditTicket, key: Option<&K>) {
        let Some(key) = key else {
            return;
        };
        let mut latest = self.latest_guard();
        if latest.get(key) == Some(&ticket.generation) {
            latest.remove(key);
        }
    }

    fn latest_guard(&self) -> std::sync::MutexGuard<'_, HashMap<K, u64>> {
        match self.latest.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Background delete; the cache entry goes away only once the remote store confirms.
pub struct DeleteTask<K> {
    handle: JoinHandle<Result<K, StoreError>>,
}

impl<K> DeleteTask<K> {
    pub async fn confirmed(self) -> Result<K, StoreError> {
        self.handle.await.map_err(|_| StoreError::TaskAborted)?
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Keyed cache of one entity type, kept in step with the remote store.
///
/// The cache only ever holds records the remote store has acknowledged: list
/// responses replace it wholesale, saves insert after a success reply, and
/// deletes remove after confirmation.
pub struct EntityStore<R: Resource> {
    oracle: PermissionOracle,
    transport: Arc<dyn Transport>,
    cache: Arc<RwLock<HashMap<R::Key, R>>>,
    sessions: Arc<SessionRegistry<R::Key>>,
}

impl<R: Resource> Clone for EntityStore<R> {
    fn clone(&self) -> Self {
        Self {
            oracle: self.oracle.clone(),
            transport: self.transport.clone(),
            cache: self.cache.clone(),
            sessions: self.sessions.clone(),
        }
    }
}

impl<R: Resource> EntityStore<R> {
    pub fn new(oracle: PermissionOracle, transport: Arc<dyn Transport>) -> Self {
        Self {
            oracle,
            transport,
            cache: Arc::new(RwLock::new(HashMap::new())),
            sessions: Arc::new(SessionRegistry::new()),
        }
    }

    pub fn oracle(&self) -> &PermissionOracle {
        &self.oracle
    }

    pub async fn entries(&self) -> HashMap<R::Key, R> {
        self.cache.read().await.clone()
    }

    pub async fn get(&self, key: &R::Key) -> Option<R> {
        self.cache.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.is_empty()
    }

    /// Refreshes the cache from the remote store, replacing it wholesale.
    pub async fn list(&self) -> Result<Gated<usize>, StoreError> {
        if !self.permits(R::READ, "list") {
            return Ok(Gated::Skipped);
        }

        match self.request("list", RemoteRequest::get(R::LIST_PATH)).await? {
            Reply::Success(body) => {
                let items = R::decode_list(body)
                    .map_err(|err| StoreError::InvalidResponse(err.to_string()))?;
                let mut fresh = HashMap::with_capacity(items.len());
                for item in items {
                    if let Some(key) = item.key() {
                        fresh.insert(key, item);
                    }
                }
                let count = fresh.len();
                *self.cache.write().await = fresh;
                Ok(Gated::Done(count))
            }
            failed => Err(failed.into_error()),
        }
    }

    pub fn open_ticket(&self, key: Option<&R::Key>) -> EditTicket {
        self.sessions.open(key)
    }

    pub fn release_ticket(&self, ticket: &EditTicket, key: Option<&R::Key>) {
        ticket.retire();
        self.sessions.release(ticket, key);
    }

    pub(crate) fn permits(&self, capability: Capability, action: &'static str) -> bool {
        if self.oracle.can(capability) {
            return true;
        }
        tracing::debug!(
            resource = R::KIND,
            action,
            capability = capability.as_str(),
            "store.skipped_unauthorized"
        );
        metrics::inc_gated_skip(R::KIND, action);
        false
    }

    pub(crate) async fn request(
        &self,
        op: &'static str,
        request: RemoteRequest,
    ) -> Result<Reply, StoreError> {
        let method = request.method.clone();
        let span = tracing::info_span!(
            "store.request",
            resource = R::KIND,
            op,
            method = %method,
            path = %request.path,
            status_code = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );
        let started = Instant::now();

        async move {
            let request = request.with_authorization(self.oracle.authorization());
            let result = self.transport.send(request).await;
            let latency = started.elapsed();
            tracing::Span::current().record("latency_ms", latency.as_millis() as u64);

            match result {
                Ok(response) => {
                    tracing::Span::current().record("status_code", response.status.as_u16());
                    let reply = Reply::classify(response.status, response.body);
                    let outcome = reply.outcome_label();
                    tracing::Span::current().record("outcome", outcome);
                    metrics::observe_remote_request(R::KIND, method.as_str(), outcome, latency);
                    Ok(reply)
                }
                Err(err) => {
                    tracing::Span::current().record("outcome", "transport_error");
                    metrics::observe_remote_request(
                        R::KIND,
                        method.as_str(),
                        "transport_error",
                        latency,
                    );
                    tracing::warn!(error = %err, "store.transport_failed");
                    Err(StoreError::Transport(err))
                }
            }
        }
        .instrument(span)
        .await
    }
}

impl<R: MutableResource> EntityStore<R> {
    /// Creates or updates `entity` outside of any draft session.
    ///
    /// Open drafts on the same entity keep their tickets and may still commit.
    pub async fn save(&self, entity: &R) -> Result<MutationOutcome<R>, StoreError> {
        self.persist(entity, None).await
    }

    pub async fn save_in_session(
        &self,
        entity: &R,
        ticket: &EditTicket,
    ) -> Result<MutationOutcome<R>, StoreError> {
        self.persist(entity, Some(ticket)).await
    }

    async fn persist(
        &self,
        entity: &R,
        ticket: Option<&EditTicket>,
    ) -> Result<MutationOutcome<R>, StoreError> {
        let key = entity.key();
        let (capability, op) = match key {
            None => (R::CREATE, "create"),
            Some(_) => (R::UPDATE, "update"),
        };
        if !self.permits(capability, op) {
            return Ok(MutationOutcome::Skipped);
        }

        let body = serde_json::to_value(entity).map_err(|err| StoreError::Encode(err.to_string()))?;
        let request = match key.as_ref() {
            None => RemoteRequest::post(R::CREATE_PATH, body),
            Some(key) => RemoteRequest::patch(R::item_path(key), body),
        };

        match self.request(op, request).await? {
            Reply::Success(body) => {
                let saved = R::decode_saved(body)?;
                let saved_key = saved.key().ok_or_else(|| {
                    StoreError::InvalidResponse("saved entity has no identifier".to_string())
                })?;

                if let Some(ticket) = ticket
                    && !self.sessions.is_current(ticket, key.as_ref())
                {
                    tracing::warn!(
                        resource = R::KIND,
                        key = %saved_key,
                        generation = ticket.generation(),
                        "store.stale_response_dropped"
                    );
                    metrics::inc_stale_response(R::KIND);
                    return Ok(MutationOutcome::Stale);
                }

                self.cache.write().await.insert(saved_key, saved.clone());
                Ok(MutationOutcome::Applied(saved))
            }
            Reply::Rejected(message) => Ok(MutationOutcome::Rejected(message)),
            failed => Err(failed.into_error()),
        }
    }

    /// Launches the remote delete in the background and returns immediately.
    ///
    /// Must be called from within a Tokio runtime. Entities that were never
    /// persisted have nothing to delete and are reported as skipped.
    pub fn delete(&self, entity: &R) -> Gated<DeleteTask<R::Key>> {
        let Some(key) = entity.key() else {
            return Gated::Skipped;
        };
        if !self.permits(R::DELETE, "delete") {
            return Gated::Skipped;
        }

        let store = self.clone();
        let handle = tokio::spawn(async move {
            let result = store.confirm_delete(&key).await;
            if let Err(err) = result.as_ref() {
                tracing::warn!(resource = R::KIND, key = %key, error = %err, "store.delete_failed");
            }
            result.map(|_| key)
        });

        Gated::Done(DeleteTask { handle })
    }

    async fn confirm_delete(&self, key: &R::Key) -> Result<(), StoreError> {
        match self
            .request("delete", RemoteRequest::delete(R::item_path(key)))
            .await?
        {
            Reply::Success(body) => {
                let deleted = R::decode_deleted(body)?;
                if deleted != *key {
                    return Err(StoreError::InvalidResponse(format!(
                        "remote store confirmed deletion of {} instead of {}",
                        deleted, key
                    )));
                }
                self.cache.write().await.remove(key);
                Ok(())
            }
            failed => Err(failed.into_error()),
        }
    }
}
