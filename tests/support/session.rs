//! Session wiring over [`MockFactory`] and an in-memory credential store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use xarb_aggregator::errors::{AggregatorResult, SessionError};
use xarb_aggregator::health::HealthConfig;
use xarb_aggregator::session::{SessionConfig, SessionManager};
use xarb_aggregator::store::{CredentialStore, InMemoryCredentialStore, NewCredential};
use xarb_aggregator::types::{ConnectionStatus, Credential, CredentialId, ExchangeId};
use xarb_aggregator::vault::CredentialVault;

use super::connection::MockFactory;

pub const USER: &str = "alice";

pub struct Harness {
    pub session: SessionManager,
    pub factory: Arc<MockFactory>,
    pub store: Arc<InMemoryCredentialStore>,
    pub vault: Arc<CredentialVault>,
    pub credentials: HashMap<String, CredentialId>,
    pub errors: Arc<Mutex<Vec<SessionError>>>,
    pub statuses: Arc<Mutex<Vec<ConnectionStatus>>>,
}

impl Harness {
    pub fn credential(&self, exchange: &str) -> CredentialId {
        self.credentials[exchange]
    }

    pub fn errors_for(&self, exchange: &str) -> Vec<SessionError> {
        let exchange = ExchangeId::new(exchange);
        self.errors
            .lock()
            .iter()
            .filter(|e| e.exchange.as_ref() == Some(&exchange))
            .cloned()
            .collect()
    }
}

/// Fast reconnects, no background sweep during a test unless asked for.
pub fn quiet_config() -> SessionConfig {
    SessionConfig {
        max_updates_per_second: 100,
        dispatch_buffer: 1024,
        reconnect_delay: Duration::from_millis(5),
        health: HealthConfig {
            check_interval: Duration::from_secs(3600),
            stale_threshold: Duration::from_secs(60),
        },
    }
}

/// Build a session with one enabled credential per exchange in `exchanges`.
pub fn harness(exchanges: &[&str], config: SessionConfig, factory: MockFactory) -> Harness {
    let vault = Arc::new(CredentialVault::new(b"integration-master-secret"));
    vault.initialize_for_user(USER).unwrap();

    let store = Arc::new(InMemoryCredentialStore::new());
    let mut credentials = HashMap::new();
    for exchange in exchanges {
        let id = store
            .add_credential(
                &vault,
                NewCredential {
                    user_id: USER,
                    exchange: ExchangeId::new(*exchange),
                    api_key: &format!("{}-key", exchange),
                    secret: &format!("{}-secret", exchange),
                    passphrase: None,
                },
            )
            .unwrap();
        credentials.insert(exchange.to_string(), id);
    }

    let factory = Arc::new(factory);
    let session = SessionManager::new(
        config,
        Arc::clone(&vault),
        store.clone(),
        factory.clone(),
    );

    let errors = Arc::new(Mutex::new(Vec::new()));
    {
        let errors = Arc::clone(&errors);
        session.on_error(move |e: &SessionError| errors.lock().push(e.clone()));
    }
    let statuses = Arc::new(Mutex::new(Vec::new()));
    {
        let statuses = Arc::clone(&statuses);
        session.on_status_change(move |s: &ConnectionStatus| statuses.lock().push(s.clone()));
    }

    Harness {
        session,
        factory,
        store,
        vault,
        credentials,
        errors,
        statuses,
    }
}

/// Store whose single-credential lookups take `delay`, leaving room for the
/// session to change underneath a pending decrypt.
pub struct SlowStore {
    pub inner: Arc<InMemoryCredentialStore>,
    pub delay: Duration,
}

#[async_trait]
impl CredentialStore for SlowStore {
    async fn get_enabled_credentials(&self, user_id: &str) -> AggregatorResult<Vec<Credential>> {
        self.inner.get_enabled_credentials(user_id).await
    }

    async fn get_credential(&self, id: CredentialId) -> AggregatorResult<Option<Credential>> {
        tokio::time::sleep(self.delay).await;
        self.inner.get_credential(id).await
    }

    async fn mark_credential_test_result(
        &self,
        id: CredentialId,
        success: bool,
        message: &str,
    ) -> AggregatorResult<()> {
        self.inner.mark_credential_test_result(id, success, message).await
    }
}
