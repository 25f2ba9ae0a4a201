//! MockEngine: scripted in-memory tokenization engine with call recording.

use std::collections::{HashMap, VecDeque};

use tokio::sync::broadcast;

use tapwallet_crypto::EncryptedInstrumentData;
use tapwallet_types::{
    Card, CardDetails, CardId, ConsentPrompt, ConsentSessionId, CoreInitError, DeviceSerial,
    DigitizationToken, DigitizeOutcome, EngineError, EnrollmentStatus, GatewayConfigError,
    IdvMethodId, InputMethod, PaymentType, ProvisioningEvent, PushPayload, PushProvider,
    PushToken, TransactionEvent, VerificationCapability, WalletId, WseState,
};

const EVENT_CAPACITY: usize = 64;

/// A card as the mock engine knows it.
#[derive(Debug, Clone)]
pub struct MockCard {
    pub card: Card,
    pub details: CardDetails,
    pub needs_replenishment: bool,
}

/// One recorded eligibility call.
#[derive(Debug, Clone)]
pub struct EligibilityCall {
    pub envelope_len: usize,
    pub device_serial: DeviceSerial,
    pub locale: String,
    pub input_method: InputMethod,
}

/// One recorded replenishment request.
#[derive(Debug, Clone)]
pub struct ReplenishmentRequest {
    pub card_id: CardId,
    pub provider: PushProvider,
    pub forced: bool,
}

/// In-memory engine with scripted outcomes. Every field is public so tests
/// can seed state directly and assert on recorded calls, in the same way
/// tests poke at the mock's tables instead of going through the trait.
#[derive(Debug)]
pub struct MockEngine {
    // Bring-up.
    pub core_initialized: bool,
    pub core_failures: VecDeque<CoreInitError>,
    pub core_init_attempts: u32,
    pub wipe_calls: u32,
    pub gateway_configured: bool,
    pub gateway_failures: VecDeque<GatewayConfigError>,
    pub gateway_config_calls: u32,
    pub wse_state: WseState,
    pub wse_handshakes: u32,
    pub wse_failure: Option<EngineError>,

    // Enrollment.
    pub eligibility_script: VecDeque<Result<ConsentPrompt, EngineError>>,
    pub eligibility_calls: Vec<EligibilityCall>,
    pub consent_accepts: Vec<ConsentSessionId>,
    pub accept_failure: Option<EngineError>,
    pub digitize_script: VecDeque<Result<DigitizeOutcome, EngineError>>,
    pub idv_select_script: VecDeque<Result<DigitizeOutcome, EngineError>>,
    pub idv_selections: Vec<IdvMethodId>,
    pub enrollment_status: EnrollmentStatus,
    pub provisioning_failure: Option<EngineError>,
    pub enroll_calls: Vec<(WalletId, PushToken, String)>,
    pub continue_calls: u32,
    pub send_code_calls: u32,
    pub secret_input: Vec<u8>,

    // Cards.
    pub card_order: Vec<CardId>,
    pub cards: HashMap<CardId, MockCard>,
    pub verification_required: bool,
    pub verification_initialized: Option<VerificationCapability>,
    pub card_list_calls: u32,
    pub set_default_failures: HashMap<CardId, EngineError>,
    pub default_mutations: Vec<CardId>,
    pub replenishments: Vec<ReplenishmentRequest>,

    // Payment.
    pub auth_script: VecDeque<Result<(), EngineError>>,
    pub auth_calls: u32,
    pub deactivate_calls: u32,

    // Push.
    pub processed_payloads: Vec<PushPayload>,
    /// Provisioning events replayed after each processed incoming message.
    pub on_incoming_message: Vec<ProvisioningEvent>,

    transaction_tx: broadcast::Sender<TransactionEvent>,
    provisioning_tx: broadcast::Sender<ProvisioningEvent>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    pub fn new() -> Self {
        let (transaction_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (provisioning_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            core_initialized: false,
            core_failures: VecDeque::new(),
            core_init_attempts: 0,
            wipe_calls: 0,
            gateway_configured: false,
            gateway_failures: VecDeque::new(),
            gateway_config_calls: 0,
            wse_state: WseState::NotRequired,
            wse_handshakes: 0,
            wse_failure: None,
            eligibility_script: VecDeque::new(),
            eligibility_calls: Vec::new(),
            consent_accepts: Vec::new(),
            accept_failure: None,
            digitize_script: VecDeque::new(),
            idv_select_script: VecDeque::new(),
            idv_selections: Vec::new(),
            enrollment_status: EnrollmentStatus::Complete,
            provisioning_failure: None,
            enroll_calls: Vec::new(),
            continue_calls: 0,
            send_code_calls: 0,
            secret_input: Vec::new(),
            card_order: Vec::new(),
            cards: HashMap::new(),
            verification_required: false,
            verification_initialized: None,
            card_list_calls: 0,
            set_default_failures: HashMap::new(),
            default_mutations: Vec::new(),
            replenishments: Vec::new(),
            auth_script: VecDeque::new(),
            auth_calls: 0,
            deactivate_calls: 0,
            processed_payloads: Vec::new(),
            on_incoming_message: Vec::new(),
            transaction_tx,
            provisioning_tx,
        }
    }

    pub fn add_card(&mut self, card: Card, details: CardDetails) {
        self.card_order.push(card.card_id.clone());
        self.cards.insert(
            card.card_id.clone(),
            MockCard {
                card,
                details,
                needs_replenishment: false,
            },
        );
    }

    pub fn initialize_core(&mut self) -> Result<(), CoreInitError> {
        self.core_init_attempts += 1;
        if let Some(err) = self.core_failures.pop_front() {
            return Err(err);
        }
        if self.core_initialized {
            return Err(CoreInitError::AlreadyInitialized);
        }
        self.core_initialized = true;
        Ok(())
    }

    pub fn wipe_persisted_state(&mut self) -> Result<(), EngineError> {
        self.wipe_calls += 1;
        Ok(())
    }

    pub fn configure_gateway(&mut self) -> Result<(), GatewayConfigError> {
        self.gateway_config_calls += 1;
        if let Some(err) = self.gateway_failures.pop_front() {
            return Err(err);
        }
        if self.gateway_configured {
            return Err(GatewayConfigError::AlreadyConfigured);
        }
        self.gateway_configured = true;
        Ok(())
    }

    pub fn wallet_secure_enrollment_state(&self) -> Result<WseState, EngineError> {
        Ok(self.wse_state)
    }

    pub fn start_wallet_secure_enrollment(&mut self) -> Result<(), EngineError> {
        self.wse_handshakes += 1;
        if let Some(err) = self.wse_failure.take() {
            return Err(err);
        }
        self.wse_state = WseState::Completed;
        Ok(())
    }

    pub fn check_card_eligibility(
        &mut self,
        instrument: &EncryptedInstrumentData,
        device_serial: &DeviceSerial,
        locale: &str,
        input_method: InputMethod,
    ) -> Result<ConsentPrompt, EngineError> {
        self.eligibility_calls.push(EligibilityCall {
            envelope_len: instrument.len(),
            device_serial: device_serial.clone(),
            locale: locale.to_string(),
            input_method,
        });
        self.eligibility_script
            .pop_front()
            .unwrap_or_else(|| Err(EngineError::Internal("no scripted eligibility outcome".to_string())))
    }

    pub fn accept_consent(
        &mut self,
        session_id: &ConsentSessionId,
    ) -> Result<DigitizationToken, EngineError> {
        self.consent_accepts.push(session_id.clone());
        if let Some(err) = self.accept_failure.take() {
            return Err(err);
        }
        Ok(DigitizationToken::new(format!("dig-{session_id}")))
    }

    pub fn digitize_card(
        &mut self,
        _token: &DigitizationToken,
    ) -> Result<DigitizeOutcome, EngineError> {
        self.digitize_script
            .pop_front()
            .unwrap_or_else(|| Err(EngineError::Internal("no scripted digitize outcome".to_string())))
    }

    pub fn select_idv_method(
        &mut self,
        method: &IdvMethodId,
    ) -> Result<DigitizeOutcome, EngineError> {
        self.idv_selections.push(method.clone());
        self.idv_select_script
            .pop_front()
            .unwrap_or_else(|| Err(EngineError::Internal("no scripted idv outcome".to_string())))
    }

    pub fn enrollment_status(&self) -> Result<EnrollmentStatus, EngineError> {
        Ok(self.enrollment_status)
    }

    pub fn enroll(
        &mut self,
        wallet_id: &WalletId,
        push_token: &PushToken,
        locale: &str,
    ) -> Result<(), EngineError> {
        self.enroll_calls
            .push((wallet_id.clone(), push_token.clone(), locale.to_string()));
        match self.provisioning_failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn continue_enrollment(&mut self, _locale: &str) -> Result<(), EngineError> {
        self.continue_calls += 1;
        match self.provisioning_failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn send_activation_code(&mut self) -> Result<(), EngineError> {
        self.send_code_calls += 1;
        match self.provisioning_failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn input_activation_secret(&mut self, byte: u8) -> Result<(), EngineError> {
        self.secret_input.push(byte);
        Ok(())
    }

    pub fn all_cards(&mut self) -> Result<Vec<CardId>, EngineError> {
        self.card_list_calls += 1;
        if self.verification_required && self.verification_initialized.is_none() {
            return Err(EngineError::VerificationMethodRequired);
        }
        Ok(self.card_order.clone())
    }

    pub fn card(&self, card_id: &CardId) -> Result<&MockCard, EngineError> {
        self.cards.get(card_id).ok_or_else(|| EngineError::Rejected {
            code: 30,
            message: format!("unknown card {card_id}"),
        })
    }

    fn card_mut(&mut self, card_id: &CardId) -> Result<&mut MockCard, EngineError> {
        self.cards.get_mut(card_id).ok_or_else(|| EngineError::Rejected {
            code: 30,
            message: format!("unknown card {card_id}"),
        })
    }

    pub fn is_default(
        &self,
        card_id: &CardId,
        _payment_type: PaymentType,
    ) -> Result<bool, EngineError> {
        Ok(self.card(card_id)?.card.is_default_for_contactless)
    }

    pub fn set_default(
        &mut self,
        card_id: &CardId,
        _payment_type: PaymentType,
    ) -> Result<(), EngineError> {
        if let Some(err) = self.set_default_failures.get(card_id) {
            return Err(err.clone());
        }
        self.card(card_id)?;
        for entry in self.cards.values_mut() {
            entry.card.is_default_for_contactless = false;
        }
        self.card_mut(card_id)?.card.is_default_for_contactless = true;
        self.default_mutations.push(card_id.clone());
        Ok(())
    }

    pub fn default_card(&self, _payment_type: PaymentType) -> Option<CardId> {
        self.card_order
            .iter()
            .find(|id| {
                self.cards
                    .get(*id)
                    .is_some_and(|c| c.card.is_default_for_contactless)
            })
            .cloned()
    }

    pub fn delete_card(&mut self, card_id: &CardId) -> Result<(), EngineError> {
        self.card(card_id)?;
        self.cards.remove(card_id);
        self.card_order.retain(|id| id != card_id);
        Ok(())
    }

    pub fn suspend_card(&mut self, card_id: &CardId) -> Result<(), EngineError> {
        self.card_mut(card_id)?.card.status = tapwallet_types::CardStatus::Suspended;
        Ok(())
    }

    pub fn resume_card(&mut self, card_id: &CardId) -> Result<(), EngineError> {
        self.card_mut(card_id)?.card.status = tapwallet_types::CardStatus::Active;
        Ok(())
    }

    pub fn request_key_replenishment(
        &mut self,
        card_id: &CardId,
        provider: PushProvider,
        forced: bool,
    ) -> Result<(), EngineError> {
        self.card(card_id)?;
        self.replenishments.push(ReplenishmentRequest {
            card_id: card_id.clone(),
            provider,
            forced,
        });
        if forced || self.card(card_id)?.needs_replenishment {
            self.card_mut(card_id)?.needs_replenishment = false;
        }
        Ok(())
    }

    pub fn init_verification_method(
        &mut self,
        capability: VerificationCapability,
    ) -> Result<(), EngineError> {
        self.verification_initialized = Some(capability);
        Ok(())
    }

    pub fn start_authentication(
        &mut self,
        _payment_type: PaymentType,
    ) -> Result<(), EngineError> {
        self.auth_calls += 1;
        self.auth_script.pop_front().unwrap_or(Ok(()))
    }

    pub fn deactivate(&mut self) -> Result<(), EngineError> {
        self.deactivate_calls += 1;
        Ok(())
    }

    pub fn process_incoming_message(&mut self, payload: PushPayload) -> Result<(), EngineError> {
        self.processed_payloads.push(payload);
        for event in self.on_incoming_message.clone() {
            self.emit_provisioning(event);
        }
        Ok(())
    }

    pub fn emit_transaction(&self, event: TransactionEvent) {
        let _ = self.transaction_tx.send(event);
    }

    pub fn emit_provisioning(&self, event: ProvisioningEvent) {
        let _ = self.provisioning_tx.send(event);
    }

    pub fn transaction_events(&self) -> broadcast::Receiver<TransactionEvent> {
        self.transaction_tx.subscribe()
    }

    pub fn provisioning_events(&self) -> broadcast::Receiver<ProvisioningEvent> {
        self.provisioning_tx.subscribe()
    }
}
