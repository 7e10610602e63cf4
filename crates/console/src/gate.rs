use std::future::Future;

use brewdesk_auth::PermissionOracle;
use brewdesk_contracts::{Capability, Drink, User};

use crate::draft::{DraftEditor, DraftError};
use crate::metrics;
use crate::store::{EntityStore, Gated, MutationOutcome, StoreError};
use crate::users::UserForm;

/// Capability precheck for entry points the presentation layer triggers.
///
/// An ungated action does nothing at all: no request, no state change, no
/// error. Callers see [`Gated::Skipped`].
#[derive(Clone)]
pub struct ActionGate {
    oracle: PermissionOracle,
}

impl ActionGate {
    pub fn new(oracle: PermissionOracle) -> Self {
        Self { oracle }
    }

    pub fn allows(&self, capability: Capability) -> bool {
        self.oracle.can(capability)
    }

    pub fn run<T>(&self, capability: Capability, action: impl FnOnce() -> T) -> Gated<T> {
        if !self.admit(capability) {
            return Gated::Skipped;
        }
        Gated::Done(action())
    }

    pub async fn run_async<T, F, Fut>(&self, capability: Capability, action: F) -> Gated<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if !self.admit(capability) {
            return Gated::Skipped;
        }
        Gated::Done(action().await)
    }

    /// Opens a drink editor on `existing`, or on a blank drink when `None`.
    pub fn open_drink_editor(
        &self,
        store: &EntityStore<Drink>,
        existing: Option<Drink>,
    ) -> Result<Gated<DraftEditor<Drink>>, DraftError> {
        match self.run(Capability::GET_DRINKS_DETAIL, || {
            let mut editor = DraftEditor::new(store.clone());
            editor.open(existing).map(|()| editor)
        }) {
            Gated::Done(opened) => opened.map(Gated::Done),
            Gated::Skipped => Ok(Gated::Skipped),
        }
    }

    pub fn open_user_form(&self, store: &EntityStore<User>, user: User) -> Gated<UserForm> {
        self.run(Capability::MANAGE_BARISTAS, || {
            UserForm::new(store.clone(), user)
        })
    }

    pub async fn promote(
        &self,
        form: &mut UserForm,
    ) -> Gated<Result<MutationOutcome<()>, StoreError>> {
        if !self.admit(Capability::MANAGE_BARISTAS) {
            return Gated::Skipped;
        }
        Gated::Done(form.hire_barista().await)
    }

    pub async fn demote(
        &self,
        form: &mut UserForm,
    ) -> Gated<Result<MutationOutcome<()>, StoreError>> {
        if !self.admit(Capability::MANAGE_BARISTAS) {
            return Gated::Skipped;
        }
        Gated::Done(form.fire_barista().await)
    }

    fn admit(&self, capability: Capability) -> bool {
        if self.oracle.can(capability) {
            return true;
        }
        tracing::debug!(capability = capability.as_str(), "gate.skipped_unauthorized");
        metrics::inc_gated_skip("gate", capability.as_str());
        false
    }
}
