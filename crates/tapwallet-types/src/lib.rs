pub mod error;
pub mod events;
pub mod ids;
pub mod model;
pub mod push;

pub use error::{CoreInitError, EngineError, GatewayConfigError, ValidationError};
pub use events::{CardServerMessage, DigitizeOutcome, ProvisioningEvent, TransactionEvent};
pub use ids::{
    AmountMinor, CardId, ConsentSessionId, CurrencyCode, DeviceSerial, DigitalCardId,
    DigitizationToken, IdvMethodId, PushToken, ServerMessageCode, WalletId,
};
pub use model::{
    AuthenticationMethod, BringupOrigin, Card, CardDetails, CardStatus, ConsentPrompt,
    DeviceProfile, EnrollmentStatus, IdvMethod, InitState, InitUpdate, InputMethod,
    PaymentExperience, PaymentType, PendingActivationKind, PushProvider, VerificationCapability,
    WseState,
};
pub use push::{PushPayload, PushSender};
