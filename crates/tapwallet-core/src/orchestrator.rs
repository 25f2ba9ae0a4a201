//! Composition root: construct and wire the coordinators once, with no
//! ambient global lookup.

use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

use tapwallet_types::BringupOrigin;

use crate::bringup::SdkBringupCoordinator;
use crate::config::OrchestrationConfig;
use crate::engine::TokenizationEngine;
use crate::enrollment::EnrollmentCoordinator;
use crate::payment::PaymentSessionController;
use crate::push::PushMessageRouter;
use crate::registry::CardRegistry;

/// Configuration the device cannot run with; surfaced at construction,
/// never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("push-notification provider is not configured")]
    MissingPushProvider,
}

/// Owns the five coordinators and their background tasks for one engine.
pub struct WalletOrchestrator<E: TokenizationEngine> {
    pub bringup: Arc<SdkBringupCoordinator<E>>,
    pub enrollment: Arc<EnrollmentCoordinator<E>>,
    pub payments: Arc<PaymentSessionController<E>>,
    pub push_router: Arc<PushMessageRouter<E>>,
    pub cards: Arc<CardRegistry<E>>,
    tasks: Vec<JoinHandle<()>>,
}

impl<E: TokenizationEngine> std::fmt::Debug for WalletOrchestrator<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletOrchestrator")
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

impl<E: TokenizationEngine> WalletOrchestrator<E> {
    /// Wire the orchestration layer against one engine. Must be called on a
    /// runtime; the payment event pump and push flush/batch tasks are
    /// spawned here.
    pub fn new(engine: Arc<E>, config: OrchestrationConfig) -> Result<Self, ConfigError> {
        let push_provider = config.push_provider.ok_or(ConfigError::MissingPushProvider)?;
        let config = Arc::new(config);

        let bringup = Arc::new(SdkBringupCoordinator::new(
            Arc::clone(&engine),
            Arc::clone(&config),
        ));
        let cards = Arc::new(CardRegistry::new(
            Arc::clone(&engine),
            config.device.clone(),
            push_provider,
        ));
        let enrollment = Arc::new(EnrollmentCoordinator::new(
            Arc::clone(&engine),
            Arc::clone(&bringup),
            Arc::clone(&config),
        ));
        let payments = Arc::new(PaymentSessionController::new(
            Arc::clone(&engine),
            Arc::clone(&cards),
            Arc::clone(&config),
        ));
        let push_router = Arc::new(PushMessageRouter::new(
            engine,
            Arc::clone(&cards),
            Arc::clone(&bringup),
        ));

        let tasks = vec![
            payments.spawn_event_pump(),
            push_router.spawn_flush_task(),
            push_router.spawn_batch_task(),
        ];
        info!("wallet orchestrator wired");

        Ok(Self {
            bringup,
            enrollment,
            payments,
            push_router,
            cards,
            tasks,
        })
    }

    /// Kick engine bring-up for the given origin.
    pub fn start(&self, origin: BringupOrigin) {
        self.bringup.ensure_ready(origin);
    }
}

impl<E: TokenizationEngine> Drop for WalletOrchestrator<E> {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tapwallet_engine_mock::MockEngine;

    use super::{ConfigError, WalletOrchestrator};
    use crate::config::OrchestrationConfig;
    use crate::engine::MockEngineHandle;

    #[tokio::test]
    async fn missing_push_provider_is_a_fatal_configuration_error() {
        let config = OrchestrationConfig {
            push_provider: None,
            ..OrchestrationConfig::default()
        };
        let engine = Arc::new(MockEngineHandle::new(MockEngine::new()));
        let err = WalletOrchestrator::new(engine, config).unwrap_err();
        assert_eq!(err, ConfigError::MissingPushProvider);
    }
}
