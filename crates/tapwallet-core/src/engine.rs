//! Engine seam: the asynchronous contract this layer drives, plus the
//! mock-backed handle used by tests.
//!
//! Every operation is a single awaited call; the engine's listener-style
//! callbacks surface here as the closed [`TransactionEvent`] and
//! [`ProvisioningEvent`] vocabularies on broadcast channels.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::broadcast;

use tapwallet_crypto::EncryptedInstrumentData;
use tapwallet_engine_mock::MockEngine;
use tapwallet_types::{
    Card, CardDetails, CardId, CardStatus, ConsentPrompt, ConsentSessionId, CoreInitError,
    DeviceSerial, DigitizationToken, DigitizeOutcome, EngineError, EnrollmentStatus,
    GatewayConfigError, IdvMethodId, InputMethod, PaymentType, ProvisioningEvent, PushPayload,
    PushProvider, PushToken, TransactionEvent, VerificationCapability, WalletId, WseState,
};

/// Contract with the external secure-element tokenization engine.
///
/// Implementations may wrap a vendor SDK binding or an in-memory mock; the
/// coordinators never see past this boundary.
#[async_trait]
pub trait TokenizationEngine: Send + Sync + 'static {
    async fn initialize_core(&self) -> Result<(), CoreInitError>;

    /// Wipe the engine's persisted state; called before retrying a
    /// transient core-init failure.
    async fn wipe_persisted_state(&self) -> Result<(), EngineError>;

    async fn configure_gateway(&self) -> Result<(), GatewayConfigError>;

    async fn wallet_secure_enrollment_state(&self) -> Result<WseState, EngineError>;

    /// Begin or join the wallet secure-enrollment handshake; resolves when
    /// the in-flight attempt completes.
    async fn start_wallet_secure_enrollment(&self) -> Result<(), EngineError>;

    async fn check_card_eligibility(
        &self,
        instrument: EncryptedInstrumentData,
        device_serial: &DeviceSerial,
        locale: &str,
        input_method: InputMethod,
    ) -> Result<ConsentPrompt, EngineError>;

    async fn accept_consent(
        &self,
        session: &ConsentSessionId,
    ) -> Result<DigitizationToken, EngineError>;

    async fn digitize_card(
        &self,
        token: &DigitizationToken,
    ) -> Result<DigitizeOutcome, EngineError>;

    async fn select_idv_method(
        &self,
        method: &IdvMethodId,
    ) -> Result<DigitizeOutcome, EngineError>;

    async fn enrollment_status(&self) -> Result<EnrollmentStatus, EngineError>;

    async fn enroll(
        &self,
        wallet_id: &WalletId,
        push_token: &PushToken,
        locale: &str,
    ) -> Result<(), EngineError>;

    async fn continue_enrollment(&self, locale: &str) -> Result<(), EngineError>;

    async fn send_activation_code(&self) -> Result<(), EngineError>;

    /// One keystroke on the engine's secure input channel.
    async fn input_activation_secret(&self, byte: u8) -> Result<(), EngineError>;

    async fn all_cards(&self) -> Result<Vec<CardId>, EngineError>;

    async fn card_state(&self, card: &CardId) -> Result<CardStatus, EngineError>;

    async fn card_details(&self, card: &CardId) -> Result<CardDetails, EngineError>;

    async fn is_default(
        &self,
        card: &CardId,
        payment_type: PaymentType,
    ) -> Result<bool, EngineError>;

    async fn set_default(
        &self,
        card: &CardId,
        payment_type: PaymentType,
    ) -> Result<(), EngineError>;

    async fn delete_card(&self, card: &CardId) -> Result<(), EngineError>;

    async fn suspend_card(&self, card: &CardId) -> Result<(), EngineError>;

    async fn resume_card(&self, card: &CardId) -> Result<(), EngineError>;

    /// Non-forced requests are an opportunistic check: the engine decides
    /// whether the card's single-use key pool actually needs topping up.
    async fn request_key_replenishment(
        &self,
        card: &CardId,
        provider: PushProvider,
        forced: bool,
    ) -> Result<(), EngineError>;

    async fn init_verification_method(
        &self,
        capability: VerificationCapability,
    ) -> Result<(), EngineError>;

    /// Run cardholder authentication; resolves when the engine's listener
    /// reports completion or failure.
    async fn start_authentication(&self, payment_type: PaymentType) -> Result<(), EngineError>;

    async fn deactivate(&self) -> Result<(), EngineError>;

    async fn process_incoming_message(&self, payload: PushPayload) -> Result<(), EngineError>;

    /// Synchronous default-card lookup. The one deliberate blocking call in
    /// the contract; used only where no asynchronous result is available.
    fn default_card_blocking(&self, payment_type: PaymentType) -> Option<CardId>;

    fn transaction_events(&self) -> broadcast::Receiver<TransactionEvent>;

    fn provisioning_events(&self) -> broadcast::Receiver<ProvisioningEvent>;
}

/// Engine handle backed by [`MockEngine`], used by unit and integration
/// tests.
#[derive(Clone)]
pub struct MockEngineHandle {
    engine: Arc<Mutex<MockEngine>>,
}

impl MockEngineHandle {
    pub fn new(engine: MockEngine) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
        }
    }

    /// Shared access for tests that script state mid-flow.
    pub fn engine(&self) -> Arc<Mutex<MockEngine>> {
        Arc::clone(&self.engine)
    }

    fn lock(&self) -> MutexGuard<'_, MockEngine> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TokenizationEngine for MockEngineHandle {
    async fn initialize_core(&self) -> Result<(), CoreInitError> {
        self.lock().initialize_core()
    }

    async fn wipe_persisted_state(&self) -> Result<(), EngineError> {
        self.lock().wipe_persisted_state()
    }

    async fn configure_gateway(&self) -> Result<(), GatewayConfigError> {
        self.lock().configure_gateway()
    }

    async fn wallet_secure_enrollment_state(&self) -> Result<WseState, EngineError> {
        self.lock().wallet_secure_enrollment_state()
    }

    async fn start_wallet_secure_enrollment(&self) -> Result<(), EngineError> {
        self.lock().start_wallet_secure_enrollment()
    }

    async fn check_card_eligibility(
        &self,
        instrument: EncryptedInstrumentData,
        device_serial: &DeviceSerial,
        locale: &str,
        input_method: InputMethod,
    ) -> Result<ConsentPrompt, EngineError> {
        self.lock()
            .check_card_eligibility(&instrument, device_serial, locale, input_method)
    }

    async fn accept_consent(
        &self,
        session: &ConsentSessionId,
    ) -> Result<DigitizationToken, EngineError> {
        self.lock().accept_consent(session)
    }

    async fn digitize_card(
        &self,
        token: &DigitizationToken,
    ) -> Result<DigitizeOutcome, EngineError> {
        self.lock().digitize_card(token)
    }

    async fn select_idv_method(
        &self,
        method: &IdvMethodId,
    ) -> Result<DigitizeOutcome, EngineError> {
        self.lock().select_idv_method(method)
    }

    async fn enrollment_status(&self) -> Result<EnrollmentStatus, EngineError> {
        self.lock().enrollment_status()
    }

    async fn enroll(
        &self,
        wallet_id: &WalletId,
        push_token: &PushToken,
        locale: &str,
    ) -> Result<(), EngineError> {
        self.lock().enroll(wallet_id, push_token, locale)
    }

    async fn continue_enrollment(&self, locale: &str) -> Result<(), EngineError> {
        self.lock().continue_enrollment(locale)
    }

    async fn send_activation_code(&self) -> Result<(), EngineError> {
        self.lock().send_activation_code()
    }

    async fn input_activation_secret(&self, byte: u8) -> Result<(), EngineError> {
        self.lock().input_activation_secret(byte)
    }

    async fn all_cards(&self) -> Result<Vec<CardId>, EngineError> {
        self.lock().all_cards()
    }

    async fn card_state(&self, card: &CardId) -> Result<CardStatus, EngineError> {
        self.lock().card(card).map(|entry| entry.card.status)
    }

    async fn card_details(&self, card: &CardId) -> Result<CardDetails, EngineError> {
        self.lock().card(card).map(|entry| entry.details.clone())
    }

    async fn is_default(
        &self,
        card: &CardId,
        payment_type: PaymentType,
    ) -> Result<bool, EngineError> {
        self.lock().is_default(card, payment_type)
    }

    async fn set_default(
        &self,
        card: &CardId,
        payment_type: PaymentType,
    ) -> Result<(), EngineError> {
        self.lock().set_default(card, payment_type)
    }

    async fn delete_card(&self, card: &CardId) -> Result<(), EngineError> {
        self.lock().delete_card(card)
    }

    async fn suspend_card(&self, card: &CardId) -> Result<(), EngineError> {
        self.lock().suspend_card(card)
    }

    async fn resume_card(&self, card: &CardId) -> Result<(), EngineError> {
        self.lock().resume_card(card)
    }

    async fn request_key_replenishment(
        &self,
        card: &CardId,
        provider: PushProvider,
        forced: bool,
    ) -> Result<(), EngineError> {
        self.lock().request_key_replenishment(card, provider, forced)
    }

    async fn init_verification_method(
        &self,
        capability: VerificationCapability,
    ) -> Result<(), EngineError> {
        self.lock().init_verification_method(capability)
    }

    async fn start_authentication(&self, payment_type: PaymentType) -> Result<(), EngineError> {
        self.lock().start_authentication(payment_type)
    }

    async fn deactivate(&self) -> Result<(), EngineError> {
        self.lock().deactivate()
    }

    async fn process_incoming_message(&self, payload: PushPayload) -> Result<(), EngineError> {
        self.lock().process_incoming_message(payload)
    }

    fn default_card_blocking(&self, payment_type: PaymentType) -> Option<CardId> {
        self.lock().default_card(payment_type)
    }

    fn transaction_events(&self) -> broadcast::Receiver<TransactionEvent> {
        self.lock().transaction_events()
    }

    fn provisioning_events(&self) -> broadcast::Receiver<ProvisioningEvent> {
        self.lock().provisioning_events()
    }
}

/// A full [`Card`] assembled from the engine's per-card operations; status
/// and default flag come from the engine, never from local caches.
pub(crate) async fn load_card<E: TokenizationEngine>(
    engine: &E,
    card_id: &CardId,
) -> Result<Card, EngineError> {
    let status = engine.card_state(card_id).await?;
    let details = engine.card_details(card_id).await?;
    let is_default = engine.is_default(card_id, PaymentType::Contactless).await?;
    Ok(Card {
        card_id: card_id.clone(),
        digital_card_id: details.digital_card_id,
        status,
        is_default_for_contactless: is_default,
        pending_activation: details.pending_activation,
    })
}
