//! Card registry: the cached card list, the single-default invariant, and
//! replenishment scheduling. Every default-card mutation in the system goes
//! through here.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::join_all;
use thiserror::Error;
use tracing::{debug, info, warn};

use tapwallet_types::{
    Card, CardDetails, CardId, CardStatus, DeviceProfile, EngineError, PaymentType, PushProvider,
    VerificationCapability,
};

use crate::engine::{load_card, TokenizationEngine};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Neither biometric nor keyguard verification exists on this device.
    #[error("device unsuitable: no eligible verification method")]
    DeviceUnsuitable,
    #[error(transparent)]
    Engine(#[from] EngineError),
}

pub struct CardRegistry<E> {
    engine: Arc<E>,
    device: DeviceProfile,
    push_provider: PushProvider,
    cards: Mutex<Vec<Card>>,
    /// Serializes every default-card mutation, including the swap
    /// protocol's remember/set/restore steps.
    default_mutation: tokio::sync::Mutex<()>,
}

impl<E: TokenizationEngine> CardRegistry<E> {
    pub fn new(engine: Arc<E>, device: DeviceProfile, push_provider: PushProvider) -> Self {
        Self {
            engine,
            device,
            push_provider,
            cards: Mutex::new(Vec::new()),
            default_mutation: tokio::sync::Mutex::new(()),
        }
    }

    /// Load the card list from the engine, recovering exactly once from a
    /// verification-method gate, then enforce the single-default invariant
    /// and sweep for replenishment.
    pub async fn load_cards(&self) -> Result<Vec<Card>, RegistryError> {
        let ids = match self.engine.all_cards().await {
            Ok(ids) => ids,
            Err(EngineError::VerificationMethodRequired) => {
                let capability = self.pick_verification_capability()?;
                info!(?capability, "card list gated, initializing verification method");
                self.engine.init_verification_method(capability).await?;
                self.engine.all_cards().await?
            }
            Err(err) => return Err(err.into()),
        };

        let mut cards = Vec::with_capacity(ids.len());
        for id in &ids {
            cards.push(load_card(self.engine.as_ref(), id).await?);
        }

        if !cards.iter().any(|card| card.is_default_for_contactless) {
            self.select_first_default(&mut cards).await;
        }

        *self.cards_lock() = cards.clone();

        let sweeps = join_all(ids.iter().map(|id| self.replenish(id, false))).await;
        for (id, result) in ids.iter().zip(sweeps) {
            if let Err(err) = result {
                warn!(card = %id, error = %err, "opportunistic replenishment failed");
            }
        }

        Ok(cards)
    }

    fn pick_verification_capability(&self) -> Result<VerificationCapability, RegistryError> {
        if self.device.has_biometric {
            Ok(VerificationCapability::Biometric)
        } else if self.device.has_keyguard {
            Ok(VerificationCapability::Keyguard)
        } else {
            Err(RegistryError::DeviceUnsuitable)
        }
    }

    /// Single pass in list order, stopping at the first card the engine
    /// accepts as default.
    async fn select_first_default(&self, cards: &mut [Card]) {
        let _guard = self.default_mutation.lock().await;
        for card in cards.iter_mut() {
            match self
                .engine
                .set_default(&card.card_id, PaymentType::Contactless)
                .await
            {
                Ok(()) => {
                    info!(card = %card.card_id, "selected first card as contactless default");
                    card.is_default_for_contactless = true;
                    return;
                }
                Err(err) => {
                    warn!(card = %card.card_id, error = %err, "default selection failed, trying next card");
                }
            }
        }
    }

    pub async fn set_default_card(&self, card_id: &CardId) -> Result<(), RegistryError> {
        let _guard = self.default_mutation.lock().await;
        self.engine
            .set_default(card_id, PaymentType::Contactless)
            .await?;
        self.mark_default_cached(card_id);
        Ok(())
    }

    /// Always asks the engine; the default flag is never answered from the
    /// cache, which could race a concurrent `set_default` elsewhere.
    pub async fn is_default_card(&self, card_id: &CardId) -> Result<bool, RegistryError> {
        Ok(self
            .engine
            .is_default(card_id, PaymentType::Contactless)
            .await?)
    }

    /// First half of the temporary swap: make `target` the contactless
    /// default and return the card to restore afterwards. `None` means the
    /// target already was default and nothing needs restoring.
    pub async fn swap_in_default(&self, target: &CardId) -> Result<Option<CardId>, RegistryError> {
        let _guard = self.default_mutation.lock().await;
        if self
            .engine
            .is_default(target, PaymentType::Contactless)
            .await?
        {
            return Ok(None);
        }
        let original = self.engine.default_card_blocking(PaymentType::Contactless);
        self.engine
            .set_default(target, PaymentType::Contactless)
            .await?;
        self.mark_default_cached(target);
        debug!(target = %target, original = ?original, "temporary default swapped in");
        Ok(original)
    }

    /// Compensating half of the swap. Runs whatever the swapped-for
    /// operation did; failures are logged, never surfaced.
    pub async fn restore_default(&self, original: &CardId) {
        let _guard = self.default_mutation.lock().await;
        match self
            .engine
            .set_default(original, PaymentType::Contactless)
            .await
        {
            Ok(()) => {
                self.mark_default_cached(original);
                debug!(card = %original, "original default card restored");
            }
            Err(err) => {
                warn!(card = %original, error = %err, "failed to restore original default card");
            }
        }
    }

    /// Display details straight from the engine; not cached.
    pub async fn card_details(&self, card_id: &CardId) -> Result<CardDetails, RegistryError> {
        Ok(self.engine.card_details(card_id).await?)
    }

    pub async fn refresh_card(&self, card_id: &CardId) -> Result<CardStatus, RegistryError> {
        let status = self.engine.card_state(card_id).await?;
        self.update_card_status(card_id, status);
        Ok(status)
    }

    /// Apply a status the engine already reported (e.g. alongside a
    /// next-transaction-ready signal).
    pub fn update_card_status(&self, card_id: &CardId, status: CardStatus) {
        let mut cards = self.cards_lock();
        if let Some(card) = cards.iter_mut().find(|card| &card.card_id == card_id) {
            card.status = status;
        }
    }

    pub async fn replenish(&self, card_id: &CardId, forced: bool) -> Result<(), RegistryError> {
        self.engine
            .request_key_replenishment(card_id, self.push_provider, forced)
            .await?;
        Ok(())
    }

    pub async fn suspend_card(&self, card_id: &CardId) -> Result<(), RegistryError> {
        self.engine.suspend_card(card_id).await?;
        self.refresh_card(card_id).await?;
        Ok(())
    }

    pub async fn resume_card(&self, card_id: &CardId) -> Result<(), RegistryError> {
        self.engine.resume_card(card_id).await?;
        self.refresh_card(card_id).await?;
        Ok(())
    }

    pub async fn delete_card(&self, card_id: &CardId) -> Result<(), RegistryError> {
        self.engine.delete_card(card_id).await?;
        self.cards_lock().retain(|card| &card.card_id != card_id);
        Ok(())
    }

    /// Cards as of the last load, with statuses refreshed on demand.
    pub fn cached_cards(&self) -> Vec<Card> {
        self.cards_lock().clone()
    }

    fn mark_default_cached(&self, card_id: &CardId) {
        let mut cards = self.cards_lock();
        for card in cards.iter_mut() {
            card.is_default_for_contactless = &card.card_id == card_id;
        }
    }

    fn cards_lock(&self) -> MutexGuard<'_, Vec<Card>> {
        self.cards.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
