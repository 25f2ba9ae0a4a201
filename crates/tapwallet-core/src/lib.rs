//! Orchestration layer for a mobile contactless wallet built on an external
//! secure-element tokenization engine.
//!
//! This crate exposes:
//! - the engine seam (`TokenizationEngine`) with a mock-backed handle,
//! - engine bring-up with bounded classified retries (`SdkBringupCoordinator`),
//! - card enrollment from eligibility through provisioning (`EnrollmentCoordinator`),
//! - contactless transaction tracking (`PaymentSessionController`),
//! - push message routing with deferred delivery (`PushMessageRouter`),
//! - the card cache and single-default invariant (`CardRegistry`),
//! - a composition root wiring the above (`WalletOrchestrator`).

pub mod bringup;
pub mod config;
pub mod engine;
pub mod enrollment;
pub mod orchestrator;
pub mod payment;
pub mod push;
pub mod registry;

pub use bringup::{BringupError, SdkBringupCoordinator};
pub use config::OrchestrationConfig;
pub use engine::{MockEngineHandle, TokenizationEngine};
pub use enrollment::{EnrollmentCoordinator, EnrollmentPhase, EnrollmentUpdate};
pub use orchestrator::{ConfigError, WalletOrchestrator};
pub use payment::{
    PaymentError, PaymentPhase, PaymentSession, PaymentSessionController, PaymentUpdate,
};
pub use push::PushMessageRouter;
pub use registry::{CardRegistry, RegistryError};
