//! Closed event vocabularies delivered by the engine's callback channels.

use zeroize::Zeroizing;

use crate::ids::{AmountMinor, CardId, CurrencyCode, ServerMessageCode};
use crate::model::{AuthenticationMethod, CardStatus, IdvMethod, PendingActivationKind};

/// Contactless transaction callbacks, consumed by the payment session
/// controller via pattern matching.
#[derive(Debug, Clone)]
pub enum TransactionEvent {
    Started,
    AuthenticationRequired {
        method: AuthenticationMethod,
        amount_minor: AmountMinor,
        currency: CurrencyCode,
    },
    ReadyToTap,
    Completed {
        amount_minor: AmountMinor,
        currency: CurrencyCode,
        card_id: CardId,
    },
    Error {
        code: i32,
        message: String,
    },
    Interrupted {
        code: i32,
        retries_left: u32,
    },
    /// Post-transaction housekeeping: the engine refreshed this card's
    /// status and the next transaction may be prepared.
    NextTransactionReady {
        card_id: CardId,
        status: CardStatus,
    },
}

/// Provisioning-processor callbacks: enrollment progress plus the per-card
/// server message codes batched for observers.
#[derive(Debug, Clone)]
pub enum ProvisioningEvent {
    /// The engine is ready to receive the activation secret on its secure
    /// input channel.
    ActivationSecretRequired,
    ServerMessage {
        card_id: CardId,
        code: ServerMessageCode,
    },
    /// Terminates the current incoming-message batch.
    BatchComplete,
    EnrollmentCompleted,
    EnrollmentError {
        code: i32,
        message: String,
    },
}

/// One `(card, message code)` pair observed during an incoming-message batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardServerMessage {
    pub card_id: CardId,
    pub code: ServerMessageCode,
}

/// The three ways digitization can resolve.
pub enum DigitizeOutcome {
    /// Card digitized; the activation code is held in a self-wiping buffer
    /// until the engine asks for it on the secure input channel.
    ActivationCode(Zeroizing<Vec<u8>>),
    /// The issuer requires interactive identity-verification selection.
    IdvSelectionRequired(Vec<IdvMethod>),
    /// Activation is deferred pending further user input.
    PendingActivation(PendingActivationKind),
}

impl std::fmt::Debug for DigitizeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ActivationCode(code) => write!(f, "ActivationCode({} bytes)", code.len()),
            Self::IdvSelectionRequired(methods) => {
                f.debug_tuple("IdvSelectionRequired").field(methods).finish()
            }
            Self::PendingActivation(kind) => {
                f.debug_tuple("PendingActivation").field(kind).finish()
            }
        }
    }
}
