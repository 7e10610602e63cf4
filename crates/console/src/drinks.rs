use brewdesk_contracts::{Capability, DeletedEnvelope, Drink, DrinkId, DrinksEnvelope, RecipeLine};
use serde_json::Value;

use crate::draft::{DraftEditor, DraftError};
use crate::store::{MutableResource, Resource, StoreError};

impl Resource for Drink {
    type Key = DrinkId;

    const KIND: &'static str = "drinks";
    const READ: Capability = Capability::GET_DRINKS_DETAIL;
    const LIST_PATH: &'static str = "/drinks-detail";

    fn key(&self) -> Option<DrinkId> {
        self.id
    }

    fn decode_list(body: Value) -> Result<Vec<Self>, serde_json::Error> {
        serde_json::from_value::<DrinksEnvelope>(body).map(|envelope| envelope.drinks)
    }
}

impl MutableResource for Drink {
    const CREATE: Capability = Capability::POST_DRINKS;
    const UPDATE: Capability = Capability::PATCH_DRINKS;
    const DELETE: Capability = Capability::DELETE_DRINKS;
    const CREATE_PATH: &'static str = "/drinks";

    fn item_path(key: &DrinkId) -> String {
        format!("/drinks/{}", key)
    }

    fn decode_saved(body: Value) -> Result<Self, StoreError> {
        let envelope = serde_json::from_value::<DrinksEnvelope>(body)
            .map_err(|err| StoreError::InvalidResponse(err.to_string()))?;
        envelope.drinks.into_iter().next().ok_or_else(|| {
            StoreError::InvalidResponse("save response carried no drink".to_string())
        })
    }

    fn decode_deleted(body: Value) -> Result<DrinkId, StoreError> {
        serde_json::from_value::<DeletedEnvelope>(body)
            .map(|envelope| envelope.delete)
            .map_err(|err| StoreError::InvalidResponse(err.to_string()))
    }

    fn blank() -> Self {
        Drink::blank()
    }

    fn prepare_for_edit(&mut self) {
        if self.recipe.is_empty() {
            self.recipe.push(RecipeLine::default());
        }
    }
}

impl DraftEditor<Drink> {
    pub fn set_title(&mut self, title: impl Into<String>) -> Result<(), DraftError> {
        self.entity_mut()?.title = title.into();
        Ok(())
    }

    /// Inserts a blank line right after `after`; past the end it appends.
    pub fn insert_line(&mut self, after: usize) -> Result<(), DraftError> {
        let recipe = &mut self.entity_mut()?.recipe;
        let at = after.saturating_add(1).min(recipe.len());
        recipe.insert(at, RecipeLine::default());
        Ok(())
    }

    /// Removes the line at `index`; out-of-range indices leave the recipe as is.
    /// Removing the last remaining line is allowed.
    pub fn remove_line(&mut self, index: usize) -> Result<Option<RecipeLine>, DraftError> {
        let recipe = &mut self.entity_mut()?.recipe;
        Ok((index < recipe.len()).then(|| recipe.remove(index)))
    }

    pub fn line_mut(&mut self, index: usize) -> Result<Option<&mut RecipeLine>, DraftError> {
        Ok(self.entity_mut()?.recipe.get_mut(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draft::DraftState;
    use crate::store::{EntityStore, MutationOutcome};
    use crate::testkit::{ScriptedTransport, oracle_with};
    use http::{Method, StatusCode};

    fn editor() -> (DraftEditor<Drink>, std::sync::Arc<ScriptedTransport>) {
        let transport = ScriptedTransport::new();
        let store = EntityStore::new(
            oracle_with(&["get:drinks-detail", "post:drinks", "patch:drinks"]),
            transport.clone(),
        );
        (DraftEditor::new(store), transport)
    }

    fn line(name: &str) -> RecipeLine {
        RecipeLine {
            name: name.to_string(),
            color: "brown".to_string(),
            parts: 1.0,
        }
    }

    #[test]
    fn insert_then_remove_next_restores_recipe() {
        let (mut editor, _) = editor();
        editor
            .open(Some(Drink {
                id: Some(DrinkId(1)),
                title: "mocha".to_string(),
                recipe: vec![line("espresso"), line("chocolate"), line("milk")],
            }))
            .unwrap();
        let before = editor.draft().unwrap().entity.recipe.clone();

        for i in 0..before.len() {
            editor.insert_line(i).unwrap();
            assert_eq!(editor.draft().unwrap().entity.recipe[i + 1], RecipeLine::default());
            editor.remove_line(i + 1).unwrap();
            assert_eq!(editor.draft().unwrap().entity.recipe, before);
        }
    }

    #[test]
    fn insert_past_end_appends() {
        let (mut editor, _) = editor();
        editor.open(None).unwrap();
        editor.insert_line(usize::MAX).unwrap();
        assert_eq!(editor.draft().unwrap().entity.recipe.len(), 2);
    }

    #[test]
    fn removing_last_line_is_permitted() {
        let (mut editor, _) = editor();
        editor.open(None).unwrap();
        assert_eq!(
            editor.remove_line(0).unwrap(),
            Some(RecipeLine::default())
        );
        assert!(editor.draft().unwrap().entity.recipe.is_empty());
        assert_eq!(editor.remove_line(0).unwrap(), None);
    }

    #[test]
    fn line_edits_require_an_open_session() {
        let (mut editor, _) = editor();
        assert!(matches!(
            editor.insert_line(0),
            Err(DraftError::NotEditing(DraftState::Uninitialized))
        ));
        assert!(matches!(
            editor.set_title("x"),
            Err(DraftError::NotEditing(DraftState::Uninitialized))
        ));
    }

    #[tokio::test]
    async fn created_drink_is_cached_under_server_id() {
        let transport = ScriptedTransport::new();
        let store = EntityStore::<Drink>::new(
            oracle_with(&["get:drinks-detail", "post:drinks"]),
            transport.clone(),
        );
        let mut editor = DraftEditor::new(store.clone());
        editor.open(None).unwrap();
        editor.set_title("espresso").unwrap();
        *editor.line_mut(0).unwrap().unwrap() = RecipeLine {
            name: "Espresso".to_string(),
            color: "brown".to_string(),
            parts: 2.0,
        };

        transport.respond(
            Method::POST,
            "/drinks",
            StatusCode::OK,
            serde_json::json!({"success": true, "drinks": [{
                "id": 7,
                "title": "espresso",
                "recipe": [{"name": "Espresso", "color": "brown", "parts": 2}]
            }]}),
        );

        let outcome = editor.commit().await.unwrap();
        assert!(matches!(outcome, MutationOutcome::Applied(_)));

        let entries = store.entries().await;
        assert_eq!(entries.len(), 1);
        let cached = &entries[&DrinkId(7)];
        assert_eq!(cached.id, Some(DrinkId(7)));
        assert_eq!(
            cached.recipe,
            vec![RecipeLine {
                name: "Espresso".to_string(),
                color: "brown".to_string(),
                parts: 2.0,
            }]
        );
    }
}
