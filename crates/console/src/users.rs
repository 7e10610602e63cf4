use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use brewdesk_contracts::{
    BaristaChange, Capability, Role, RoleKind, RolesEnvelope, User, UserId, UsersEnvelope,
    roles_contain,
};
use serde_json::Value;

use crate::store::{EntityStore, Gated, MutationOutcome, Reply, Resource, StoreError};
use crate::transport::RemoteRequest;

impl Resource for User {
    type Key = UserId;

    const KIND: &'static str = "users";
    const READ: Capability = Capability::MANAGE_BARISTAS;
    const LIST_PATH: &'static str = "/users";

    fn key(&self) -> Option<UserId> {
        Some(self.user_id.clone())
    }

    fn decode_list(body: Value) -> Result<Vec<Self>, serde_json::Error> {
        serde_json::from_value::<UsersEnvelope>(body).map(|envelope| envelope.users)
    }
}

type RolesFuture = Pin<Box<dyn Future<Output = Result<Vec<Role>, StoreError>> + Send>>;

/// Pending role lookup. When the actor may not manage baristas no request is
/// issued and the handle never resolves; check [`RoleFetch::is_authorized`]
/// before awaiting it.
pub struct RoleFetch {
    inner: Option<RolesFuture>,
}

impl RoleFetch {
    fn never() -> Self {
        Self { inner: None }
    }

    pub fn is_authorized(&self) -> bool {
        self.inner.is_some()
    }
}

impl Future for RoleFetch {
    type Output = Result<Vec<Role>, StoreError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.inner.as_mut() {
            Some(fut) => fut.as_mut().poll(cx),
            None => Poll::Pending,
        }
    }
}

impl EntityStore<User> {
    pub fn fetch_roles(&self, user_id: &UserId) -> RoleFetch {
        if !self.permits(Capability::MANAGE_BARISTAS, "fetch_roles") {
            return RoleFetch::never();
        }

        let store = self.clone();
        let path = format!("/users/{}/roles", user_id);
        RoleFetch {
            inner: Some(Box::pin(async move {
                match store.request("fetch_roles", RemoteRequest::get(path)).await? {
                    Reply::Success(body) => serde_json::from_value::<RolesEnvelope>(body)
                        .map(|envelope| envelope.roles)
                        .map_err(|err| StoreError::InvalidResponse(err.to_string())),
                    failed => Err(failed.into_error()),
                }
            })),
        }
    }

    /// Grants (`to_fire == false`) or revokes the barista role.
    ///
    /// Roles are not part of the cached user record, so a successful change
    /// leaves the cache as it is.
    pub async fn set_barista(
        &self,
        user_id: &UserId,
        to_fire: bool,
    ) -> Result<MutationOutcome<()>, StoreError> {
        if !self.permits(Capability::MANAGE_BARISTAS, "set_barista") {
            return Ok(MutationOutcome::Skipped);
        }

        let body = serde_json::to_value(BaristaChange {
            to_fire_barista: to_fire,
        })
        .map_err(|err| StoreError::Encode(err.to_string()))?;

        let request = RemoteRequest::patch(format!("/baristas/{}", user_id), body);
        match self.request("set_barista", request).await? {
            Reply::Success(_) => Ok(MutationOutcome::Applied(())),
            Reply::Rejected(message) => Ok(MutationOutcome::Rejected(message)),
            failed => Err(failed.into_error()),
        }
    }
}

/// Management panel for one staff account.
pub struct UserForm {
    store: EntityStore<User>,
    user: User,
    roles: Option<Vec<Role>>,
    errors: Option<String>,
    open: bool,
}

impl UserForm {
    pub fn new(store: EntityStore<User>, user: User) -> Self {
        Self {
            store,
            user,
            roles: None,
            errors: None,
            open: true,
        }
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn roles(&self) -> Option<&[Role]> {
        self.roles.as_deref()
    }

    pub fn errors(&self) -> Option<&str> {
        self.errors.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn close(&mut self) {
        self.open = false;
    }

    pub async fn load_roles(&mut self) -> Result<Gated<()>, StoreError> {
        let fetch = self.store.fetch_roles(&self.user.user_id);
        if !fetch.is_authorized() {
            return Ok(Gated::Skipped);
        }
        self.roles = Some(fetch.await?);
        Ok(Gated::Done(()))
    }

    pub async fn hire_barista(&mut self) -> Result<MutationOutcome<()>, StoreError> {
        self.change_barista(false).await
    }

    pub async fn fire_barista(&mut self) -> Result<MutationOutcome<()>, StoreError> {
        self.change_barista(true).await
    }

    pub fn is_manager(&self) -> bool {
        self.has_role(RoleKind::Manager)
    }

    pub fn is_barista(&self) -> bool {
        self.has_role(RoleKind::Barista)
    }

    fn has_role(&self, kind: RoleKind) -> bool {
        self.roles
            .as_deref()
            .is_some_and(|roles| roles_contain(roles, kind))
    }

    async fn change_barista(&mut self, to_fire: bool) -> Result<MutationOutcome<()>, StoreError> {
        let outcome = self.store.set_barista(&self.user.user_id, to_fire).await?;
        match &outcome {
            MutationOutcome::Applied(()) => {
                self.errors = None;
                self.open = false;
            }
            MutationOutcome::Rejected(message) => self.errors = Some(message.clone()),
            MutationOutcome::Stale | MutationOutcome::Skipped => {}
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testkit::{ScriptedTransport, oracle_with};
    use http::{Method, StatusCode};

    fn user(id: &str) -> User {
        serde_json::from_value(serde_json::json!({
            "user_id": id,
            "email": format!("{}@example.com", id),
        }))
        .expect("user should parse")
    }

    fn store_with(perms: &[&str], transport: &Arc<ScriptedTransport>) -> EntityStore<User> {
        EntityStore::new(oracle_with(perms), transport.clone())
    }

    #[tokio::test]
    async fn lacking_manage_baristas_issues_zero_requests() {
        let transport = ScriptedTransport::new();
        for perms in [
            &[][..],
            &["get:drinks-detail"][..],
            &["post:drinks", "patch:drinks", "delete:drinks"][..],
        ] {
            let store = store_with(perms, &transport);
            assert_eq!(store.list().await.unwrap(), Gated::Skipped);
            assert_eq!(
                store.set_barista(&UserId::from("u1"), false).await.unwrap(),
                MutationOutcome::Skipped
            );
            assert!(!store.fetch_roles(&UserId::from("u1")).is_authorized());
            assert!(store.is_empty().await);
        }
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn unauthorized_role_fetch_never_settles() {
        let transport = ScriptedTransport::new();
        let store = store_with(&[], &transport);
        let fetch = store.fetch_roles(&UserId::from("u1"));
        let waited = tokio::time::timeout(std::time::Duration::from_millis(20), fetch).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn list_keys_users_by_user_id() {
        let transport = ScriptedTransport::new();
        transport.respond(
            Method::GET,
            "/users",
            StatusCode::OK,
            serde_json::json!({"users": [
                {"user_id": "auth0|a", "name": "Ana"},
                {"user_id": "auth0|b", "name": "Bo"}
            ]}),
        );
        let store = store_with(&["manage:baristas"], &transport);

        assert_eq!(store.list().await.unwrap(), Gated::Done(2));
        let ana = store.get(&UserId::from("auth0|a")).await.unwrap();
        assert_eq!(ana.name.as_deref(), Some("Ana"));
    }

    #[tokio::test]
    async fn unauthorized_form_reports_no_roles() {
        let transport = ScriptedTransport::new();
        let mut form = UserForm::new(store_with(&[], &transport), user("u1"));

        assert_eq!(form.load_roles().await.unwrap(), Gated::Skipped);
        assert!(form.roles().is_none());
        assert!(!form.is_manager());
        assert!(!form.is_barista());
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn fetched_barista_role_matches_case_insensitively() {
        let transport = ScriptedTransport::new();
        transport.respond(
            Method::GET,
            "/users/u1/roles",
            StatusCode::OK,
            serde_json::json!({"roles": [{"name": "Barista"}]}),
        );
        let mut form = UserForm::new(store_with(&["manage:baristas"], &transport), user("u1"));

        assert_eq!(form.load_roles().await.unwrap(), Gated::Done(()));
        assert!(form.is_barista());
        assert!(!form.is_manager());
    }

    #[tokio::test]
    async fn hire_sends_flag_and_closes_form() {
        let transport = ScriptedTransport::new();
        transport.respond(
            Method::PATCH,
            "/baristas/u1",
            StatusCode::OK,
            serde_json::json!({"success": true}),
        );
        let mut form = UserForm::new(store_with(&["manage:baristas"], &transport), user("u1"));

        assert_eq!(
            form.hire_barista().await.unwrap(),
            MutationOutcome::Applied(())
        );
        assert!(!form.is_open());

        let sent = transport.requests().pop().unwrap();
        assert_eq!(sent.body, Some(serde_json::json!({"toFireBarista": false})));
    }

    #[tokio::test]
    async fn rejected_fire_keeps_form_open_with_message() {
        let transport = ScriptedTransport::new();
        transport.respond(
            Method::PATCH,
            "/baristas/u1",
            StatusCode::BAD_REQUEST,
            serde_json::json!({"success": false, "error": 400, "message": "User is not a barista"}),
        );
        let mut form = UserForm::new(store_with(&["manage:baristas"], &transport), user("u1"));

        assert_eq!(
            form.fire_barista().await.unwrap(),
            MutationOutcome::Rejected("User is not a barista".to_string())
        );
        assert!(form.is_open());
        assert_eq!(form.errors(), Some("User is not a barista"));
        assert_eq!(
            transport.requests()[0].body,
            Some(serde_json::json!({"toFireBarista": true}))
        );
    }
}
