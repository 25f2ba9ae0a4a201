//! Payment session: one contactless tap cycle driven by the engine's
//! transaction callbacks.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tapwallet_types::{
    AmountMinor, AuthenticationMethod, CardId, CardStatus, CurrencyCode, EngineError, PaymentType,
    TransactionEvent,
};

use crate::config::OrchestrationConfig;
use crate::engine::TokenizationEngine;
use crate::registry::{CardRegistry, RegistryError};

const UPDATE_CAPACITY: usize = 64;
const TAP_TIMEOUT_MESSAGE: &str = "payment timed out waiting for tap";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PaymentError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("authentication failed: {0}")]
    Authentication(EngineError),
}

/// Phases of one tap cycle. Monotonic: a callback for an earlier phase is
/// dropped, and only a new `Started` callback resets the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentPhase {
    None,
    TransactionStarted,
    AuthenticationRequired,
    ReadyToTap,
    TransactionCompleted,
    Error,
}

impl PaymentPhase {
    fn rank(self) -> u8 {
        match self {
            Self::None => 0,
            Self::TransactionStarted => 1,
            Self::AuthenticationRequired => 2,
            Self::ReadyToTap => 3,
            Self::TransactionCompleted | Self::Error => 4,
        }
    }
}

/// Snapshot of the active tap cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSession {
    pub phase: PaymentPhase,
    pub amount_minor: AmountMinor,
    pub currency: Option<CurrencyCode>,
    pub active_card: Option<CardId>,
    pub auth_method: Option<AuthenticationMethod>,
    pub countdown_secs: Option<u32>,
    pub error: Option<String>,
}

impl PaymentSession {
    fn reset(active_card: Option<CardId>) -> Self {
        Self {
            phase: PaymentPhase::TransactionStarted,
            amount_minor: 0,
            currency: None,
            active_card,
            auth_method: None,
            countdown_secs: None,
            error: None,
        }
    }
}

/// Items on the payment observer stream. Terminal errors arrive as
/// `Phase` snapshots carrying the failing state and message.
#[derive(Debug, Clone)]
pub enum PaymentUpdate {
    Phase(PaymentSession),
    CountdownTick { remaining_secs: u32 },
    Interrupted { code: i32, retries_left: u32 },
}

struct Inner {
    session: PaymentSession,
    /// Tap-cycle generation; timers from a superseded cycle fall silent.
    cycle: u64,
    /// Error queued for debounced publication.
    pending_error: Option<String>,
}

pub struct PaymentSessionController<E> {
    engine: Arc<E>,
    registry: Arc<CardRegistry<E>>,
    config: Arc<OrchestrationConfig>,
    inner: Mutex<Inner>,
    updates_tx: broadcast::Sender<PaymentUpdate>,
}

impl<E: TokenizationEngine> PaymentSessionController<E> {
    pub fn new(
        engine: Arc<E>,
        registry: Arc<CardRegistry<E>>,
        config: Arc<OrchestrationConfig>,
    ) -> Self {
        let (updates_tx, _) = broadcast::channel(UPDATE_CAPACITY);
        Self {
            engine,
            registry,
            config,
            inner: Mutex::new(Inner {
                session: PaymentSession {
                    phase: PaymentPhase::None,
                    amount_minor: 0,
                    currency: None,
                    active_card: None,
                    auth_method: None,
                    countdown_secs: None,
                    error: None,
                },
                cycle: 0,
                pending_error: None,
            }),
            updates_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PaymentUpdate> {
        self.updates_tx.subscribe()
    }

    pub fn session(&self) -> PaymentSession {
        self.lock().session.clone()
    }

    /// Consume the engine's transaction event stream for the lifetime of
    /// the controller.
    pub fn spawn_event_pump(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let mut events = this.engine.transaction_events();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => this.handle_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "transaction event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub async fn handle_event(self: &Arc<Self>, event: TransactionEvent) {
        match event {
            TransactionEvent::Started => self.on_started(),
            TransactionEvent::AuthenticationRequired {
                method,
                amount_minor,
                currency,
            } => self.on_authentication_required(method, amount_minor, currency),
            TransactionEvent::ReadyToTap => self.on_ready_to_tap(),
            TransactionEvent::Completed {
                amount_minor,
                currency,
                card_id,
            } => self.on_completed(amount_minor, currency, card_id),
            TransactionEvent::Error { code, message } => self.on_error(code, message),
            TransactionEvent::Interrupted { code, retries_left } => {
                debug!(code, retries_left, "transaction interrupted");
                let _ = self
                    .updates_tx
                    .send(PaymentUpdate::Interrupted { code, retries_left });
            }
            TransactionEvent::NextTransactionReady { card_id, status } => {
                self.on_next_transaction_ready(card_id, status).await;
            }
        }
    }

    /// A new tap cycle: reset the session and resolve the default card for
    /// display. The blocking lookup is deliberate; no transaction context
    /// exists yet to carry the card.
    fn on_started(&self) {
        let default_card = self.engine.default_card_blocking(PaymentType::Contactless);
        let snapshot = {
            let mut inner = self.lock();
            inner.cycle += 1;
            inner.pending_error = None;
            inner.session = PaymentSession::reset(default_card);
            inner.session.clone()
        };
        self.publish(snapshot);
    }

    fn on_authentication_required(
        &self,
        method: AuthenticationMethod,
        amount_minor: AmountMinor,
        currency: CurrencyCode,
    ) {
        let snapshot = {
            let mut inner = self.lock();
            if !advance(&mut inner.session.phase, PaymentPhase::AuthenticationRequired) {
                return;
            }
            inner.session.amount_minor = amount_minor;
            inner.session.currency = Some(currency);
            inner.session.auth_method = Some(method);
            inner.session.clone()
        };
        self.publish(snapshot);
    }

    fn on_ready_to_tap(self: &Arc<Self>) {
        let (snapshot, cycle) = {
            let mut inner = self.lock();
            if !advance(&mut inner.session.phase, PaymentPhase::ReadyToTap) {
                return;
            }
            inner.session.countdown_secs = Some(self.config.tap_countdown_secs);
            (inner.session.clone(), inner.cycle)
        };
        self.publish(snapshot);

        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_countdown(cycle).await });
    }

    async fn run_countdown(&self, cycle: u64) {
        let mut remaining = self.config.tap_countdown_secs;
        loop {
            {
                let mut inner = self.lock();
                if inner.cycle != cycle || inner.session.phase != PaymentPhase::ReadyToTap {
                    return;
                }
                inner.session.countdown_secs = Some(remaining);
            }
            let _ = self.updates_tx.send(PaymentUpdate::CountdownTick {
                remaining_secs: remaining,
            });
            if remaining == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
            remaining -= 1;
        }

        let snapshot = {
            let mut inner = self.lock();
            if inner.cycle != cycle || inner.session.phase != PaymentPhase::ReadyToTap {
                return;
            }
            inner.session.phase = PaymentPhase::Error;
            inner.session.error = Some(TAP_TIMEOUT_MESSAGE.to_string());
            inner.session.clone()
        };
        warn!("tap window expired");
        self.publish(snapshot);
    }

    fn on_completed(&self, amount_minor: AmountMinor, currency: CurrencyCode, card_id: CardId) {
        let snapshot = {
            let mut inner = self.lock();
            match inner.session.phase {
                PaymentPhase::TransactionCompleted => {
                    debug!("duplicate completion callback, ignoring");
                    return;
                }
                PaymentPhase::Error => {
                    warn!("completion arrived after a published error, ignoring");
                    return;
                }
                _ => {}
            }
            // Cancels any error still waiting out its debounce window.
            inner.pending_error = None;
            inner.session.phase = PaymentPhase::TransactionCompleted;
            inner.session.amount_minor = amount_minor;
            inner.session.currency = Some(currency);
            inner.session.active_card = Some(card_id);
            inner.session.countdown_secs = None;
            inner.session.clone()
        };
        self.publish(snapshot);
    }

    /// Errors are withheld for a short window: a completion callback racing
    /// in just after (or just before) the error wins, and the queued error
    /// is dropped.
    fn on_error(self: &Arc<Self>, code: i32, message: String) {
        let cycle = {
            let mut inner = self.lock();
            if matches!(
                inner.session.phase,
                PaymentPhase::TransactionCompleted | PaymentPhase::Error
            ) {
                debug!(code, "error callback after terminal phase, ignoring");
                return;
            }
            inner.pending_error = Some(format!("payment failed: code={code}, message={message}"));
            inner.cycle
        };

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(this.config.error_debounce).await;
            let snapshot = {
                let mut inner = this.lock();
                if inner.cycle != cycle {
                    return;
                }
                let Some(message) = inner.pending_error.take() else {
                    debug!("queued error cancelled by completion");
                    return;
                };
                if inner.session.phase == PaymentPhase::TransactionCompleted {
                    return;
                }
                inner.session.phase = PaymentPhase::Error;
                inner.session.error = Some(message);
                inner.session.countdown_secs = None;
                inner.session.clone()
            };
            this.publish(snapshot);
        });
    }

    async fn on_next_transaction_ready(&self, card_id: CardId, status: CardStatus) {
        debug!(card = %card_id, ?status, "next transaction ready");
        self.registry.update_card_status(&card_id, status);
        if let Err(err) = self.registry.replenish(&card_id, false).await {
            warn!(card = %card_id, error = %err, "opportunistic replenishment failed");
        }
    }

    /// Pay with a specific card, temporarily making it the contactless
    /// default when it is not already. The original default is restored
    /// after authentication resolves, whatever the outcome; restoration
    /// failures are logged, never surfaced.
    pub async fn pay_with_card(&self, card_id: &CardId) -> Result<(), PaymentError> {
        if let Err(err) = self.engine.deactivate().await {
            warn!(error = %err, "failed to deactivate in-flight session");
        }

        let original = self.registry.swap_in_default(card_id).await?;
        let auth_result = self.engine.start_authentication(PaymentType::Contactless).await;
        if let Some(original) = &original {
            self.registry.restore_default(original).await;
        }
        auth_result.map_err(PaymentError::Authentication)
    }

    fn publish(&self, snapshot: PaymentSession) {
        info!(phase = ?snapshot.phase, "payment session changed");
        let _ = self.updates_tx.send(PaymentUpdate::Phase(snapshot));
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn advance(phase: &mut PaymentPhase, next: PaymentPhase) -> bool {
    if next.rank() <= phase.rank() {
        debug!(current = ?phase, requested = ?next, "out-of-order transaction callback, ignoring");
        return false;
    }
    *phase = next;
    true
}
