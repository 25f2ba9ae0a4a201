use std::time::Duration;

use tapwallet_crypto::OnboardingKey;
use tapwallet_types::{
    DeviceProfile, DeviceSerial, PaymentExperience, PushProvider, PushToken, WalletId,
};

/// X25519 basepoint; deployments pin the issuer's onboarding key instead.
const PLACEHOLDER_ONBOARDING_KEY: [u8; 32] = {
    let mut bytes = [0u8; 32];
    bytes[0] = 9;
    bytes
};

/// Identity, timings, and mode switches for the orchestration layer.
#[derive(Debug, Clone)]
pub struct OrchestrationConfig {
    pub payment_experience: PaymentExperience,
    pub locale: String,
    pub wallet_id: WalletId,
    pub device: DeviceProfile,
    /// Required; a missing provider is a fatal configuration error.
    pub push_provider: Option<PushProvider>,
    pub push_token: PushToken,
    pub onboarding_key: OnboardingKey,
    pub core_init_max_attempts: u32,
    pub core_init_backoff: Duration,
    /// Breathing room between core init and gateway configuration so a
    /// tap-triggered cold start can service the payment path first.
    pub gateway_settle_delay: Duration,
    /// Window in which a completion cancels an adjacent error callback.
    pub error_debounce: Duration,
    pub tap_countdown_secs: u32,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            payment_experience: PaymentExperience::Immediate,
            locale: "en-US".to_string(),
            wallet_id: WalletId::new("wallet-default"),
            device: DeviceProfile {
                serial: DeviceSerial::new("device-unknown"),
                has_biometric: false,
                has_keyguard: true,
            },
            push_provider: Some(PushProvider::Fcm),
            push_token: PushToken::new("push-token-unset"),
            onboarding_key: OnboardingKey::from_bytes(PLACEHOLDER_ONBOARDING_KEY),
            core_init_max_attempts: 3,
            core_init_backoff: Duration::from_millis(2_500),
            gateway_settle_delay: Duration::from_millis(700),
            error_debounce: Duration::from_millis(300),
            tap_countdown_secs: 30,
        }
    }
}
