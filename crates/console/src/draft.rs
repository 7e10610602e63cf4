use crate::store::{
    DeleteTask, EditTicket, EntityStore, Gated, MutableResource, MutationOutcome, StoreError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftState {
    Uninitialized,
    Editing,
    Committing,
    Closed,
    Discarded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Draft<R> {
    pub entity: R,
    pub is_new: bool,
    pub errors: Option<String>,
}

#[derive(Debug)]
pub enum DraftError {
    NotEditing(DraftState),
    AlreadyOpen(DraftState),
    NothingToRemove,
    Store(StoreError),
}

impl std::fmt::Display for DraftError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DraftError::NotEditing(state) => write!(f, "draft is not editable in state {:?}", state),
            DraftError::AlreadyOpen(state) => write!(f, "draft session already open ({:?})", state),
            DraftError::NothingToRemove => write!(f, "draft has never been persisted"),
            DraftError::Store(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for DraftError {}

impl From<StoreError> for DraftError {
    fn from(value: StoreError) -> Self {
        DraftError::Store(value)
    }
}

/// Lets the presentation layer dismiss a session while its commit is still in flight.
#[derive(Debug, Clone)]
pub struct DismissHandle {
    ticket: EditTicket,
}

impl DismissHandle {
    pub fn dismiss(&self) {
        self.ticket.retire();
    }
}

/// One edit session over a working copy of a single entity.
pub struct DraftEditor<R: MutableResource> {
    store: EntityStore<R>,
    state: DraftState,
    draft: Option<Draft<R>>,
    ticket: Option<EditTicket>,
}

impl<R: MutableResource> DraftEditor<R> {
    pub fn new(store: EntityStore<R>) -> Self {
        Self {
            store,
            state: DraftState::Uninitialized,
            draft: None,
            ticket: None,
        }
    }

    pub fn state(&self) -> DraftState {
        self.state
    }

    pub fn draft(&self) -> Option<&Draft<R>> {
        self.draft.as_ref()
    }

    pub fn errors(&self) -> Option<&str> {
        self.draft.as_ref()?.errors.as_deref()
    }

    pub fn dismiss_handle(&self) -> Option<DismissHandle> {
        self.ticket.clone().map(|ticket| DismissHandle { ticket })
    }

    /// Starts a session on a copy of `existing`, or on a blank entity when `None`.
    pub fn open(&mut self, existing: Option<R>) -> Result<(), DraftError> {
        if matches!(self.state, DraftState::Editing | DraftState::Committing) {
            return Err(DraftError::AlreadyOpen(self.state));
        }

        let mut entity = existing.unwrap_or_else(R::blank);
        entity.prepare_for_edit();
        let key = entity.key();

        self.ticket = Some(self.store.open_ticket(key.as_ref()));
        self.draft = Some(Draft {
            entity,
            is_new: key.is_none(),
            errors: None,
        });
        self.state = DraftState::Editing;
        Ok(())
    }

    pub fn entity_mut(&mut self) -> Result<&mut R, DraftError> {
        self.sync_dismissal();
        if self.state != DraftState::Editing {
            return Err(DraftError::NotEditing(self.state));
        }
        self.draft
            .as_mut()
            .map(|draft| &mut draft.entity)
            .ok_or(DraftError::NotEditing(self.state))
    }

    /// Sends the working copy to the store.
    ///
    /// A 400 rejection keeps the session in `Editing` with the server message
    /// in the draft's error field. Any other failure also returns to `Editing`
    /// with every edit intact and is handed back to the caller.
    pub async fn commit(&mut self) -> Result<MutationOutcome<R>, DraftError> {
        self.sync_dismissal();
        let (entity, ticket) = match (self.state, self.draft.as_ref(), self.ticket.as_ref()) {
            (DraftState::Editing, Some(draft), Some(ticket)) => {
                (draft.entity.clone(), ticket.clone())
            }
            _ => return Err(DraftError::NotEditing(self.state)),
        };

        self.state = DraftState::Committing;
        let result = self.store.save_in_session(&entity, &ticket).await;

        if let Ok(MutationOutcome::Applied(_)) = result.as_ref() {
            self.finish(DraftState::Closed);
            return result.map_err(DraftError::from);
        }

        if ticket.is_retired() {
            self.finish(DraftState::Discarded);
            return result.map_err(DraftError::from);
        }

        self.state = DraftState::Editing;
        match result {
            Ok(MutationOutcome::Rejected(message)) => {
                if let Some(draft) = self.draft.as_mut() {
                    draft.errors = Some(message.clone());
                }
                Ok(MutationOutcome::Rejected(message))
            }
            Ok(MutationOutcome::Stale) => {
                self.finish(DraftState::Discarded);
                Ok(MutationOutcome::Stale)
            }
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                tracing::warn!(error = %err, "draft.commit_failed");
                Err(DraftError::Store(err))
            }
        }
    }

    /// Abandons the session locally; nothing is sent to the remote store.
    pub fn discard(&mut self) {
        if matches!(self.state, DraftState::Closed | DraftState::Discarded) {
            return;
        }
        self.finish(DraftState::Discarded);
    }

    /// Deletes the persisted entity behind this draft and closes the session
    /// without waiting for the remote store to confirm. Without the delete
    /// capability nothing happens and the session stays open.
    pub fn remove(&mut self) -> Result<Gated<DeleteTask<R::Key>>, DraftError> {
        self.sync_dismissal();
        if self.state != DraftState::Editing {
            return Err(DraftError::NotEditing(self.state));
        }
        let Some(draft) = self.draft.as_ref() else {
            return Err(DraftError::NotEditing(self.state));
        };
        if draft.entity.key().is_none() {
            return Err(DraftError::NothingToRemove);
        }

        let task = self.store.delete(&draft.entity);
        if !task.is_skipped() {
            self.finish(DraftState::Closed);
        }
        Ok(task)
    }

    fn sync_dismissal(&mut self) {
        if self.state == DraftState::Editing && self.ticket.as_ref().is_some_and(|t| t.is_retired())
        {
            self.finish(DraftState::Discarded);
        }
    }

    fn finish(&mut self, state: DraftState) {
        let key = self.draft.as_ref().and_then(|draft| draft.entity.key());
        if let Some(ticket) = self.ticket.take() {
            self.store.release_ticket(&ticket, key.as_ref());
        }
        self.draft = None;
        self.state = state;
    }
}
