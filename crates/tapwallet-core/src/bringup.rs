//! Engine bring-up: classified core-init retries, gateway configuration,
//! and the one-time secure-enrollment gate, published as an observable
//! init-state stream.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use tapwallet_types::{
    BringupOrigin, CoreInitError, EngineError, GatewayConfigError, InitState, InitUpdate,
    PaymentExperience, WseState,
};

use crate::config::OrchestrationConfig;
use crate::engine::TokenizationEngine;

/// Terminal bring-up failures surfaced on the init stream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BringupError {
    #[error("core initialization failed after {attempts} attempt(s): {source}")]
    CoreInit {
        attempts: u32,
        #[source]
        source: CoreInitError,
    },
    #[error("gateway configuration failed: {0}")]
    Gateway(#[from] GatewayConfigError),
    #[error("wallet secure enrollment failed: {0}")]
    SecureEnrollment(EngineError),
    #[error("engine call failed: {0}")]
    Engine(#[from] EngineError),
}

enum DriveOutcome {
    Ready,
    /// Another caller is initializing the core; it owns completion.
    DeferToPeer,
}

/// Brings the engine from uninitialized to ready exactly once per session,
/// tolerating transient failures, and publishes every transition.
pub struct SdkBringupCoordinator<E> {
    engine: Arc<E>,
    config: Arc<OrchestrationConfig>,
    state_tx: watch::Sender<InitUpdate>,
    driving: Mutex<bool>,
}

impl<E: TokenizationEngine> SdkBringupCoordinator<E> {
    pub fn new(engine: Arc<E>, config: Arc<OrchestrationConfig>) -> Self {
        let (state_tx, _) = watch::channel(InitUpdate::new(InitState::Inactive));
        Self {
            engine,
            config,
            state_tx,
            driving: Mutex::new(false),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<InitUpdate> {
        self.state_tx.subscribe()
    }

    pub fn current(&self) -> InitState {
        self.state_tx.borrow().state
    }

    /// Kick bring-up and return immediately; progress arrives on the init
    /// stream. No-op while a bring-up is in flight, once `Successful`, for
    /// deferred-mode app-startup calls, and after a fatal failure unless
    /// the call is an explicit retry.
    pub fn ensure_ready(self: &Arc<Self>, origin: BringupOrigin) {
        if self.config.payment_experience == PaymentExperience::DeferredUntilFirstTap
            && origin == BringupOrigin::AppStartup
        {
            debug!("deferred payment experience, skipping bring-up at app startup");
            return;
        }
        {
            let mut driving = self.driving_lock();
            if *driving {
                return;
            }
            match self.current() {
                InitState::Successful => return,
                InitState::Failed if origin != BringupOrigin::Retry => {
                    debug!("bring-up previously failed, waiting for manual retry");
                    return;
                }
                _ => {}
            }
            *driving = true;
        }
        self.publish(InitState::InProgress, None);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = this.drive().await;
            *this.driving_lock() = false;
            match outcome {
                Ok(DriveOutcome::Ready) => this.publish(InitState::Successful, None),
                Ok(DriveOutcome::DeferToPeer) => {}
                Err(err) => {
                    warn!(error = %err, "bring-up failed");
                    this.publish(InitState::Failed, Some(err.to_string()));
                }
            }
        });
    }

    /// Wait for the current bring-up to reach a terminal state.
    pub async fn wait_terminal(&self) -> InitUpdate {
        let mut rx = self.subscribe();
        loop {
            let update = rx.borrow_and_update().clone();
            match update.state {
                InitState::Successful | InitState::Failed => return update,
                _ => {
                    if rx.changed().await.is_err() {
                        return update;
                    }
                }
            }
        }
    }

    async fn drive(&self) -> Result<DriveOutcome, BringupError> {
        let mut failures = 0u32;
        loop {
            match self.engine.initialize_core().await {
                Ok(()) => break,
                Err(CoreInitError::AlreadyInitialized) => break,
                Err(CoreInitError::InitializationInProgress) => {
                    debug!("core initialization already in progress elsewhere");
                    return Ok(DriveOutcome::DeferToPeer);
                }
                Err(err) if err.is_transient() => {
                    failures += 1;
                    if failures >= self.config.core_init_max_attempts {
                        return Err(BringupError::CoreInit {
                            attempts: failures,
                            source: err,
                        });
                    }
                    warn!(
                        attempt = failures,
                        error = %err,
                        "transient core init failure, wiping persisted state and retrying"
                    );
                    if let Err(wipe_err) = self.engine.wipe_persisted_state().await {
                        warn!(error = %wipe_err, "failed to wipe persisted state before retry");
                    }
                    tokio::time::sleep(self.config.core_init_backoff).await;
                }
                Err(err) => {
                    return Err(BringupError::CoreInit {
                        attempts: failures + 1,
                        source: err,
                    });
                }
            }
        }

        // A tap-triggered cold start gets this window to service the
        // time-critical payment path before gateway configuration runs.
        tokio::time::sleep(self.config.gateway_settle_delay).await;

        match self.engine.configure_gateway().await {
            Ok(()) | Err(GatewayConfigError::AlreadyConfigured) => {}
            Err(err) => return Err(err.into()),
        }

        self.secure_enrollment_gate().await?;
        Ok(DriveOutcome::Ready)
    }

    /// Pre-existing provisioned cards may need a one-time secure-enrollment
    /// handshake before the engine is usable; run it before going ready.
    async fn secure_enrollment_gate(&self) -> Result<(), BringupError> {
        match self.engine.wallet_secure_enrollment_state().await? {
            WseState::NotRequired | WseState::Completed => Ok(()),
            WseState::Required | WseState::Started => {
                info!("wallet secure enrollment pending, completing handshake before ready");
                self.engine
                    .start_wallet_secure_enrollment()
                    .await
                    .map_err(BringupError::SecureEnrollment)
            }
        }
    }

    fn publish(&self, state: InitState, error: Option<String>) {
        let update = InitUpdate { state, error };
        if *self.state_tx.borrow() == update {
            return;
        }
        info!(state = ?update.state, "bring-up state changed");
        self.state_tx.send_replace(update);
    }

    fn driving_lock(&self) -> MutexGuard<'_, bool> {
        self.driving.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tapwallet_engine_mock::MockEngine;
    use tapwallet_types::{
        BringupOrigin, CoreInitError, InitState, PaymentExperience, WseState,
    };

    use super::SdkBringupCoordinator;
    use crate::config::OrchestrationConfig;
    use crate::engine::MockEngineHandle;

    fn coordinator(
        engine: MockEngine,
        config: OrchestrationConfig,
    ) -> (Arc<SdkBringupCoordinator<MockEngineHandle>>, MockEngineHandle) {
        let handle = MockEngineHandle::new(engine);
        let coordinator = Arc::new(SdkBringupCoordinator::new(
            Arc::new(handle.clone()),
            Arc::new(config),
        ));
        (coordinator, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn reaches_successful_without_failures() {
        let (bringup, handle) = coordinator(MockEngine::new(), OrchestrationConfig::default());
        bringup.ensure_ready(BringupOrigin::AppStartup);
        let terminal = bringup.wait_terminal().await;
        assert_eq!(terminal.state, InitState::Successful);

        let engine = handle.engine();
        let engine = engine.lock().unwrap();
        assert_eq!(engine.core_init_attempts, 1);
        assert_eq!(engine.gateway_config_calls, 1);
        assert_eq!(engine.wse_handshakes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures_up_to_the_bound() {
        for failures in 1..=2u32 {
            let mut engine = MockEngine::new();
            for _ in 0..failures {
                engine.core_failures.push_back(CoreInitError::Storage);
            }
            let (bringup, handle) = coordinator(engine, OrchestrationConfig::default());
            bringup.ensure_ready(BringupOrigin::AppStartup);
            let terminal = bringup.wait_terminal().await;
            assert_eq!(terminal.state, InitState::Successful);

            let engine = handle.engine();
            let engine = engine.lock().unwrap();
            assert_eq!(engine.core_init_attempts, failures + 1);
            assert_eq!(engine.wipe_calls, failures);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn three_transient_failures_are_fatal_without_a_fourth_attempt() {
        let mut engine = MockEngine::new();
        for _ in 0..3 {
            engine.core_failures.push_back(CoreInitError::Migration);
        }
        let (bringup, handle) = coordinator(engine, OrchestrationConfig::default());
        bringup.ensure_ready(BringupOrigin::AppStartup);
        let terminal = bringup.wait_terminal().await;
        assert_eq!(terminal.state, InitState::Failed);
        assert!(terminal.error.is_some());

        let engine = handle.engine();
        assert_eq!(engine.lock().unwrap().core_init_attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_failure_is_fatal_immediately() {
        let mut engine = MockEngine::new();
        engine.core_failures.push_back(CoreInitError::Other {
            code: 99,
            message: "unsupported".to_string(),
        });
        let (bringup, handle) = coordinator(engine, OrchestrationConfig::default());
        bringup.ensure_ready(BringupOrigin::AppStartup);
        assert_eq!(bringup.wait_terminal().await.state, InitState::Failed);
        assert_eq!(handle.engine().lock().unwrap().core_init_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn already_initialized_core_counts_as_success() {
        let mut engine = MockEngine::new();
        engine.core_initialized = true;
        let (bringup, _) = coordinator(engine, OrchestrationConfig::default());
        bringup.ensure_ready(BringupOrigin::AppStartup);
        assert_eq!(bringup.wait_terminal().await.state, InitState::Successful);
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_mode_skips_app_startup_calls() {
        let config = OrchestrationConfig {
            payment_experience: PaymentExperience::DeferredUntilFirstTap,
            ..OrchestrationConfig::default()
        };
        let (bringup, handle) = coordinator(MockEngine::new(), config);

        bringup.ensure_ready(BringupOrigin::AppStartup);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(bringup.current(), InitState::Inactive);
        assert_eq!(handle.engine().lock().unwrap().core_init_attempts, 0);

        bringup.ensure_ready(BringupOrigin::FirstTap);
        assert_eq!(bringup.wait_terminal().await.state, InitState::Successful);
    }

    #[tokio::test(start_paused = true)]
    async fn secure_enrollment_handshake_gates_success() {
        for state in [WseState::Required, WseState::Started] {
            let mut engine = MockEngine::new();
            engine.wse_state = state;
            let (bringup, handle) = coordinator(engine, OrchestrationConfig::default());
            bringup.ensure_ready(BringupOrigin::AppStartup);
            assert_eq!(bringup.wait_terminal().await.state, InitState::Successful);
            assert_eq!(handle.engine().lock().unwrap().wse_handshakes, 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_state_requires_an_explicit_retry() {
        let mut engine = MockEngine::new();
        for _ in 0..3 {
            engine.core_failures.push_back(CoreInitError::Storage);
        }
        let (bringup, handle) = coordinator(engine, OrchestrationConfig::default());
        bringup.ensure_ready(BringupOrigin::AppStartup);
        assert_eq!(bringup.wait_terminal().await.state, InitState::Failed);

        bringup.ensure_ready(BringupOrigin::FirstTap);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(bringup.current(), InitState::Failed);

        bringup.ensure_ready(BringupOrigin::Retry);
        assert_eq!(bringup.wait_terminal().await.state, InitState::Successful);
        assert_eq!(handle.engine().lock().unwrap().core_init_attempts, 4);
    }
}
