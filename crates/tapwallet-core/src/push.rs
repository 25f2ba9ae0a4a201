//! Push routing: classify inbound server messages, defer them until the
//! engine is ready, and batch the provisioning processor's per-card codes.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tapwallet_types::{
    push::ACTION_REPLENISHMENT_NEEDED, CardServerMessage, InitState, ProvisioningEvent,
    PushPayload, PushSender,
};

use crate::bringup::SdkBringupCoordinator;
use crate::engine::TokenizationEngine;
use crate::registry::CardRegistry;

const BATCH_CAPACITY: usize = 16;

pub struct PushMessageRouter<E> {
    engine: Arc<E>,
    registry: Arc<CardRegistry<E>>,
    bringup: Arc<SdkBringupCoordinator<E>>,
    /// Messages held back until the init stream reaches `Successful`,
    /// delivered in arrival order exactly once.
    deferred: Mutex<VecDeque<PushPayload>>,
    /// `(card, code)` pairs accumulated for the current processor batch.
    batch: Mutex<Vec<CardServerMessage>>,
    batches_tx: broadcast::Sender<Vec<CardServerMessage>>,
}

impl<E: TokenizationEngine> PushMessageRouter<E> {
    pub fn new(
        engine: Arc<E>,
        registry: Arc<CardRegistry<E>>,
        bringup: Arc<SdkBringupCoordinator<E>>,
    ) -> Self {
        let (batches_tx, _) = broadcast::channel(BATCH_CAPACITY);
        Self {
            engine,
            registry,
            bringup,
            deferred: Mutex::new(VecDeque::new()),
            batch: Mutex::new(Vec::new()),
            batches_tx,
        }
    }

    /// Observer stream of completed server-message batches.
    pub fn subscribe_batches(&self) -> broadcast::Receiver<Vec<CardServerMessage>> {
        self.batches_tx.subscribe()
    }

    /// Handle one inbound push message, deferring it while the engine is
    /// not yet ready.
    pub async fn handle(&self, payload: PushPayload) {
        if self.bringup.current() != InitState::Successful {
            debug!("engine not ready, deferring push message");
            self.deferred_lock().push_back(payload);
            return;
        }
        self.route(payload).await;
    }

    async fn route(&self, payload: PushPayload) {
        match payload.sender() {
            PushSender::Provisioning => {
                // The whole payload crosses the boundary; unrecognized keys
                // are the processor's business.
                if let Err(err) = self.engine.process_incoming_message(payload).await {
                    warn!(error = %err, "provisioning processor rejected push message");
                }
            }
            PushSender::Gateway => self.route_gateway(payload).await,
            PushSender::History => {
                debug!("ignoring transaction-history push message");
            }
            PushSender::Unknown => {
                warn!("ignoring push message from unknown sender");
            }
        }
    }

    async fn route_gateway(&self, payload: PushPayload) {
        match (payload.action(), payload.target_card_id()) {
            (Some(ACTION_REPLENISHMENT_NEEDED), Some(card_id)) => {
                info!(card = %card_id, "gateway requested key replenishment");
                if let Err(err) = self.registry.replenish(&card_id, true).await {
                    warn!(card = %card_id, error = %err, "forced replenishment failed");
                }
            }
            (action, _) => {
                debug!(?action, "ignoring gateway push message");
            }
        }
    }

    /// Flush deferred messages in arrival order whenever the init stream
    /// reaches `Successful`.
    pub fn spawn_flush_task(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut init = this.bringup.subscribe();
            loop {
                let ready = init.borrow_and_update().state == InitState::Successful;
                if ready {
                    this.flush().await;
                }
                if init.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    async fn flush(&self) {
        loop {
            let Some(payload) = self.deferred_lock().pop_front() else {
                break;
            };
            self.route(payload).await;
        }
    }

    /// Accumulate per-card server message codes and emit each batch exactly
    /// once on the processor's completion signal. A drained accumulator
    /// never re-emits stale entries.
    pub fn spawn_batch_task(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let mut events = this.engine.provisioning_events();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ProvisioningEvent::ServerMessage { card_id, code }) => {
                        this.batch_lock().push(CardServerMessage { card_id, code });
                    }
                    Ok(ProvisioningEvent::BatchComplete) => {
                        let batch = std::mem::take(&mut *this.batch_lock());
                        info!(messages = batch.len(), "server message batch complete");
                        let _ = this.batches_tx.send(batch);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "provisioning event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn deferred_lock(&self) -> MutexGuard<'_, VecDeque<PushPayload>> {
        self.deferred.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn batch_lock(&self) -> MutexGuard<'_, Vec<CardServerMessage>> {
        self.batch.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tapwallet_engine_mock::{provisioned_wallet, MockEngine};
    use tapwallet_types::{
        push::{
            ACTION_REPLENISHMENT_NEEDED, KEY_ACTION, KEY_DIGITAL_CARD_ID, KEY_SENDER,
            SENDER_GATEWAY, SENDER_HISTORY, SENDER_PROVISIONING,
        },
        BringupOrigin, CardId, DeviceProfile, DeviceSerial, InitState, ProvisioningEvent,
        PushPayload, PushProvider, ServerMessageCode,
    };

    use super::PushMessageRouter;
    use crate::bringup::SdkBringupCoordinator;
    use crate::config::OrchestrationConfig;
    use crate::engine::MockEngineHandle;
    use crate::registry::CardRegistry;

    struct Fixture {
        router: Arc<PushMessageRouter<MockEngineHandle>>,
        bringup: Arc<SdkBringupCoordinator<MockEngineHandle>>,
        handle: MockEngineHandle,
    }

    fn fixture(engine: MockEngine) -> Fixture {
        let handle = MockEngineHandle::new(engine);
        let engine = Arc::new(handle.clone());
        let config = Arc::new(OrchestrationConfig::default());
        let bringup = Arc::new(SdkBringupCoordinator::new(
            Arc::clone(&engine),
            Arc::clone(&config),
        ));
        let registry = Arc::new(CardRegistry::new(
            Arc::clone(&engine),
            DeviceProfile {
                serial: DeviceSerial::new("serial-1"),
                has_biometric: true,
                has_keyguard: true,
            },
            PushProvider::Fcm,
        ));
        let router = Arc::new(PushMessageRouter::new(engine, registry, Arc::clone(&bringup)));
        router.spawn_flush_task();
        router.spawn_batch_task();
        Fixture {
            router,
            bringup,
            handle,
        }
    }

    fn provisioning_message(marker: &str) -> PushPayload {
        PushPayload::from_pairs([(KEY_SENDER, SENDER_PROVISIONING), ("marker", marker)])
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn messages_are_deferred_until_ready_and_flushed_in_order() {
        let fixture = fixture(provisioned_wallet(1, Some(0)));

        for marker in ["m1", "m2", "m3"] {
            fixture.router.handle(provisioning_message(marker)).await;
        }
        assert!(fixture
            .handle
            .engine()
            .lock()
            .unwrap()
            .processed_payloads
            .is_empty());

        fixture.bringup.ensure_ready(BringupOrigin::AppStartup);
        let terminal = fixture.bringup.wait_terminal().await;
        assert_eq!(terminal.state, InitState::Successful);
        settle().await;

        fixture.router.handle(provisioning_message("m4")).await;
        settle().await;

        let engine = fixture.handle.engine();
        let engine = engine.lock().unwrap();
        let markers: Vec<_> = engine
            .processed_payloads
            .iter()
            .map(|payload| payload.get("marker").unwrap().to_string())
            .collect();
        assert_eq!(markers, vec!["m1", "m2", "m3", "m4"]);
    }

    #[tokio::test(start_paused = true)]
    async fn gateway_replenishment_action_forces_a_replenishment() {
        let fixture = fixture(provisioned_wallet(1, Some(0)));
        fixture.bringup.ensure_ready(BringupOrigin::AppStartup);
        fixture.bringup.wait_terminal().await;

        fixture
            .router
            .handle(PushPayload::from_pairs([
                (KEY_SENDER, SENDER_GATEWAY),
                (KEY_ACTION, ACTION_REPLENISHMENT_NEEDED),
                (KEY_DIGITAL_CARD_ID, "card-0"),
            ]))
            .await;

        let engine = fixture.handle.engine();
        let engine = engine.lock().unwrap();
        assert_eq!(engine.replenishments.len(), 1);
        assert!(engine.replenishments[0].forced);
        assert_eq!(engine.replenishments[0].card_id.as_str(), "card-0");
    }

    #[tokio::test(start_paused = true)]
    async fn gateway_message_without_a_target_card_is_ignored() {
        let fixture = fixture(provisioned_wallet(1, Some(0)));
        fixture.bringup.ensure_ready(BringupOrigin::AppStartup);
        fixture.bringup.wait_terminal().await;

        fixture
            .router
            .handle(PushPayload::from_pairs([
                (KEY_SENDER, SENDER_GATEWAY),
                (KEY_ACTION, ACTION_REPLENISHMENT_NEEDED),
            ]))
            .await;
        fixture
            .router
            .handle(PushPayload::from_pairs([
                (KEY_SENDER, SENDER_HISTORY),
                (KEY_ACTION, "newTransaction"),
            ]))
            .await;

        let engine = fixture.handle.engine();
        let engine = engine.lock().unwrap();
        assert!(engine.replenishments.is_empty());
        assert!(engine.processed_payloads.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn batches_are_emitted_once_and_never_replayed() {
        let mut engine = provisioned_wallet(1, Some(0));
        engine.on_incoming_message = vec![
            ProvisioningEvent::ServerMessage {
                card_id: CardId::new("card-0"),
                code: ServerMessageCode::new("0100"),
            },
            ProvisioningEvent::ServerMessage {
                card_id: CardId::new("card-0"),
                code: ServerMessageCode::new("0200"),
            },
            ProvisioningEvent::BatchComplete,
        ];
        let fixture = fixture(engine);
        let mut batches = fixture.router.subscribe_batches();
        fixture.bringup.ensure_ready(BringupOrigin::AppStartup);
        fixture.bringup.wait_terminal().await;

        fixture.router.handle(provisioning_message("b1")).await;
        settle().await;

        let batch = batches.try_recv().unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].code.as_str(), "0100");
        assert_eq!(batch[1].code.as_str(), "0200");

        // The next batch contains only its own messages.
        fixture
            .handle
            .engine()
            .lock()
            .unwrap()
            .on_incoming_message = vec![
            ProvisioningEvent::ServerMessage {
                card_id: CardId::new("card-0"),
                code: ServerMessageCode::new("0300"),
            },
            ProvisioningEvent::BatchComplete,
        ];
        fixture.router.handle(provisioning_message("b2")).await;
        settle().await;

        let batch = batches.try_recv().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].code.as_str(), "0300");
        assert!(batches.try_recv().is_err());
    }
}
