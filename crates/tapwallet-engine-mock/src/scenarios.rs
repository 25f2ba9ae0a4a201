//! Canned engine states shared by unit and integration tests.

use tapwallet_types::{
    Card, CardDetails, CardId, CardStatus, ConsentPrompt, ConsentSessionId, DigitalCardId,
};

use crate::mock_engine::MockEngine;

/// Build the n-th fixture card, optionally marked default.
pub fn card_fixture(n: u32, default: bool) -> (Card, CardDetails) {
    let card = Card {
        card_id: CardId::new(format!("card-{n}")),
        digital_card_id: DigitalCardId::new(format!("dpan-{n}")),
        status: CardStatus::Active,
        is_default_for_contactless: default,
        pending_activation: None,
    };
    let details = CardDetails {
        digital_card_id: card.digital_card_id.clone(),
        masked_pan: format!("**** {n:04}"),
        expiry_month: 12,
        expiry_year: 2030,
        pending_activation: None,
    };
    (card, details)
}

/// An engine holding `count` active cards; `default_index` marks one of them
/// default, `None` leaves the wallet with no default card.
pub fn provisioned_wallet(count: u32, default_index: Option<u32>) -> MockEngine {
    let mut engine = MockEngine::new();
    engine.core_initialized = true;
    engine.gateway_configured = true;
    for n in 0..count {
        let (card, details) = card_fixture(n, default_index == Some(n));
        engine.add_card(card, details);
    }
    engine
}

/// The consent prompt used across enrollment tests.
pub fn consent_prompt(terms: &str) -> ConsentPrompt {
    ConsentPrompt {
        session_id: ConsentSessionId::new("consent-1"),
        terms_text: terms.to_string(),
        issuer_name: "Acme Bank".to_string(),
        terms_url: None,
    }
}
