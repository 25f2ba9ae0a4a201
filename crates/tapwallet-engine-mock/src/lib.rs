//! In-memory tokenization engine for tests: scripted outcomes, recorded
//! calls, and injectable transaction/provisioning events.

pub mod mock_engine;
pub mod scenarios;

pub use mock_engine::{EligibilityCall, MockCard, MockEngine, ReplenishmentRequest};
pub use scenarios::{card_fixture, consent_prompt, provisioned_wallet};
