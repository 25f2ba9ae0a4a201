//! Instrument sealing and secret-buffer hygiene for the wallet layer.

pub mod instrument;
pub mod secret;

pub use instrument::{EncryptedInstrumentData, InstrumentData, OnboardingKey, SealError};
pub use secret::ActivationSecret;
