//! Inbound push payloads: a flat string-keyed map with well-known keys.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::CardId;

pub const KEY_SENDER: &str = "sender";
pub const KEY_ACTION: &str = "action";
pub const KEY_DIGITAL_CARD_ID: &str = "digitalCardID";

pub const SENDER_PROVISIONING: &str = "CardProvisioning";
pub const SENDER_GATEWAY: &str = "PaymentGateway";
pub const SENDER_HISTORY: &str = "TransactionHistory";

/// Gateway action that triggers a forced key replenishment for the target
/// card.
pub const ACTION_REPLENISHMENT_NEEDED: &str = "replenishmentNeeded";

/// Channel a push message originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PushSender {
    Provisioning,
    Gateway,
    History,
    Unknown,
}

impl PushSender {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            SENDER_PROVISIONING => Self::Provisioning,
            SENDER_GATEWAY => Self::Gateway,
            SENDER_HISTORY => Self::History,
            _ => Self::Unknown,
        }
    }
}

/// A push message payload in flat key/value form. Well-known keys are
/// extracted for routing; everything else is forwarded opaquely to the
/// provisioning processor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload(BTreeMap<String, String>);

impl PushPayload {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn sender(&self) -> PushSender {
        self.get(KEY_SENDER).map(PushSender::from_tag).unwrap_or(PushSender::Unknown)
    }

    pub fn action(&self) -> Option<&str> {
        self.get(KEY_ACTION)
    }

    /// Target card id, when present and non-empty.
    pub fn target_card_id(&self) -> Option<CardId> {
        self.get(KEY_DIGITAL_CARD_ID)
            .and_then(|raw| CardId::parse(raw).ok())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::{
        PushPayload, PushSender, ACTION_REPLENISHMENT_NEEDED, KEY_ACTION, KEY_DIGITAL_CARD_ID,
        KEY_SENDER, SENDER_GATEWAY,
    };

    #[test]
    fn extracts_well_known_keys() {
        let payload = PushPayload::from_pairs([
            (KEY_SENDER, SENDER_GATEWAY),
            (KEY_ACTION, ACTION_REPLENISHMENT_NEEDED),
            (KEY_DIGITAL_CARD_ID, "card-7"),
            ("opaque", "forwarded"),
        ]);
        assert_eq!(payload.sender(), PushSender::Gateway);
        assert_eq!(payload.action(), Some(ACTION_REPLENISHMENT_NEEDED));
        assert_eq!(payload.target_card_id().unwrap().as_str(), "card-7");
        assert_eq!(payload.get("opaque"), Some("forwarded"));
    }

    #[test]
    fn missing_or_empty_card_id_is_none() {
        let mut payload = PushPayload::new();
        assert!(payload.target_card_id().is_none());
        payload.insert(KEY_DIGITAL_CARD_ID, "");
        assert!(payload.target_card_id().is_none());
    }

    #[test]
    fn unknown_sender_tags_map_to_unknown() {
        assert_eq!(PushSender::from_tag("Marketing"), PushSender::Unknown);
        let payload = PushPayload::new();
        assert_eq!(payload.sender(), PushSender::Unknown);
    }
}
