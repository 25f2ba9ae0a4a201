//! Shared data model for the orchestration layer.

use serde::{Deserialize, Serialize};

use crate::ids::{CardId, ConsentSessionId, DeviceSerial, DigitalCardId, IdvMethodId};

/// Readiness of the external engine, observed by every other component.
///
/// Only the bring-up coordinator mutates this; `Successful` is terminal for
/// the session and `Failed` is terminal until an external manual retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitState {
    Inactive,
    InProgress,
    Successful,
    Failed,
}

/// One published bring-up transition: the new state plus an error message
/// when the transition is a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitUpdate {
    pub state: InitState,
    pub error: Option<String>,
}

impl InitUpdate {
    pub fn new(state: InitState) -> Self {
        Self { state, error: None }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            state: InitState::Failed,
            error: Some(message.into()),
        }
    }
}

/// Card status as reported by the engine; never invented locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CardStatus {
    Active,
    Suspended,
    Retired,
    Unknown,
}

/// Payment token type the engine distinguishes for default-card bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentType {
    Contactless,
    Remote,
}

/// A provisioned card cached for the current foreground session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub card_id: CardId,
    pub digital_card_id: DigitalCardId,
    pub status: CardStatus,
    pub is_default_for_contactless: bool,
    pub pending_activation: Option<PendingActivationKind>,
}

/// Per-card record fetched from the engine on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardDetails {
    pub digital_card_id: DigitalCardId,
    pub masked_pan: String,
    pub expiry_month: u8,
    pub expiry_year: u16,
    pub pending_activation: Option<PendingActivationKind>,
}

/// Wallet secure-enrollment handshake state (one-time migration scenario).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WseState {
    NotRequired,
    Required,
    Started,
    Completed,
}

/// Provisioning enrollment status for this device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnrollmentStatus {
    Needed,
    InProgress,
    Complete,
}

/// Deferred-activation branches reached out of digitization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingActivationKind {
    IdvMethodNotSelected,
    OtpNeeded,
    /// Unsupported on this device; surfaced to the caller, never driven here.
    Web3ds,
    /// Unsupported on this device; surfaced to the caller, never driven here.
    App2App,
}

/// An identity-verification method the issuer offers during digitization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdvMethod {
    pub id: IdvMethodId,
    pub display_name: String,
}

/// Consent text and issuer metadata returned by a successful eligibility
/// check, exchanged for a digitization session on accept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentPrompt {
    pub session_id: ConsentSessionId,
    pub terms_text: String,
    pub issuer_name: String,
    pub terms_url: Option<String>,
}

/// How the card data entered the device for the eligibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputMethod {
    Keyed,
    CameraScan,
}

/// Cardholder verification the engine may require before a tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthenticationMethod {
    Biometric,
    DevicePasscode,
    None,
}

/// Device verification capability used to recover a gated card-list load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationCapability {
    Biometric,
    Keyguard,
}

/// Capabilities and identity of the device this wallet runs on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub serial: DeviceSerial,
    pub has_biometric: bool,
    pub has_keyguard: bool,
}

/// Push-token provider tagged onto replenishment requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PushProvider {
    Fcm,
    Hms,
}

/// When the engine is brought up: eagerly at startup, or lazily at the
/// first terminal tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentExperience {
    Immediate,
    DeferredUntilFirstTap,
}

/// Where a bring-up request originated; only app-startup calls are elided
/// under the deferred payment experience.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringupOrigin {
    AppStartup,
    FirstTap,
    Enrollment,
    Retry,
}
