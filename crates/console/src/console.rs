use std::sync::Arc;

use brewdesk_auth::{PermissionOracle, TokenSource};
use brewdesk_contracts::{Drink, User};

use crate::config::{ConsoleConfig, StartupError};
use crate::gate::ActionGate;
use crate::store::EntityStore;
use crate::transport::{HttpTransport, Transport};

/// Everything one signed-in actor session needs: both stores, the gate and the
/// oracle they share.
#[derive(Clone)]
pub struct Console {
    pub drinks: EntityStore<Drink>,
    pub users: EntityStore<User>,
    pub gate: ActionGate,
    oracle: PermissionOracle,
}

impl Console {
    pub async fn connect(
        config: &ConsoleConfig,
        tokens: Arc<dyn TokenSource>,
    ) -> Result<Self, StartupError> {
        let oracle = PermissionOracle::new(config.auth.clone(), tokens)
            .await
            .map_err(|err| StartupError {
                code: "ERR_AUTH_INIT",
                message: err.to_string(),
            })?;

        let transport = HttpTransport::new(config.api_url.clone(), config.http_timeout()).map_err(
            |err| StartupError {
                code: "ERR_HTTP_CLIENT_INIT",
                message: err.to_string(),
            },
        )?;

        tracing::info!(
            api_url = %config.api_url,
            auth_mode = ?oracle.mode(),
            "console.connected"
        );

        Ok(Self::with_transport(oracle, Arc::new(transport)))
    }

    pub fn with_transport(oracle: PermissionOracle, transport: Arc<dyn Transport>) -> Self {
        Self {
            drinks: EntityStore::new(oracle.clone(), transport.clone()),
            users: EntityStore::new(oracle.clone(), transport),
            gate: ActionGate::new(oracle.clone()),
            oracle,
        }
    }

    pub fn oracle(&self) -> &PermissionOracle {
        &self.oracle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{ScriptedTransport, oracle_with};
    use brewdesk_auth::SessionToken;
    use brewdesk_contracts::Capability;
    use std::collections::HashMap;

    #[tokio::test]
    async fn connect_builds_stores_from_config() {
        let config = ConsoleConfig::from_kv(&HashMap::from([(
            "BREWDESK_API_URL".to_string(),
            "http://127.0.0.1:9".to_string(),
        )]))
        .unwrap();

        let console = Console::connect(&config, Arc::new(SessionToken::empty()))
            .await
            .unwrap();
        assert!(!console.oracle().can(Capability::GET_DRINKS_DETAIL));
        assert!(console.drinks.is_empty().await);
    }

    #[tokio::test]
    async fn stores_share_one_oracle() {
        let transport = ScriptedTransport::new();
        let console = Console::with_transport(
            oracle_with(&["manage:baristas"]),
            transport.clone(),
        );

        assert!(console.gate.allows(Capability::MANAGE_BARISTAS));
        assert!(console.users.oracle().can(Capability::MANAGE_BARISTAS));
        assert!(!console.drinks.oracle().can(Capability::GET_DRINKS_DETAIL));
    }
}
