//! Instrument sealing under the fixed onboarding public key.
//!
//! PAN, expiry, and CVV never cross the engine boundary in the clear: they
//! are sealed into a one-shot envelope (ephemeral X25519, HKDF-SHA256,
//! ChaCha20-Poly1305) with the device serial bound as associated data.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use curve25519_dalek::montgomery::MontgomeryPoint;
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use tapwallet_types::DeviceSerial;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

const ENVELOPE_VERSION: u8 = 1;
const HKDF_SALT: &[u8] = b"tapwallet.onboarding.salt.v1";
const HKDF_INFO: &[u8] = b"tapwallet.onboarding.envelope.v1";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SealError {
    #[error("invalid instrument field `{0}`")]
    InvalidInstrument(&'static str),
    #[error("onboarding key produced a low-order shared secret")]
    LowOrderOnboardingKey,
    #[error("key derivation failed")]
    KeyDerivation,
    #[error("envelope encryption failed")]
    Encryption,
}

/// The issuer-pinned onboarding public key (X25519).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnboardingKey([u8; 32]);

impl OnboardingKey {
    pub const LEN: usize = 32;

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Cleartext card input collected from the user; wiped on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct InstrumentData {
    pub pan: String,
    pub expiry_month: u8,
    pub expiry_year: u16,
    pub cvv: String,
}

impl InstrumentData {
    pub fn new(
        pan: impl Into<String>,
        expiry_month: u8,
        expiry_year: u16,
        cvv: impl Into<String>,
    ) -> Self {
        Self {
            pan: pan.into(),
            expiry_month,
            expiry_year,
            cvv: cvv.into(),
        }
    }

    fn validate(&self) -> Result<(), SealError> {
        let pan_ok = (12..=19).contains(&self.pan.len())
            && self.pan.bytes().all(|b| b.is_ascii_digit());
        if !pan_ok {
            return Err(SealError::InvalidInstrument("pan"));
        }
        if !(1..=12).contains(&self.expiry_month) {
            return Err(SealError::InvalidInstrument("expiry_month"));
        }
        let cvv_ok =
            (3..=4).contains(&self.cvv.len()) && self.cvv.bytes().all(|b| b.is_ascii_digit());
        if !cvv_ok {
            return Err(SealError::InvalidInstrument("cvv"));
        }
        Ok(())
    }

    /// Seal the instrument for the engine's eligibility check.
    ///
    /// Each call uses a fresh ephemeral key, so the zero nonce is used once
    /// per derived key. The cleartext working buffer is wiped before return.
    pub fn seal(
        &self,
        onboarding_key: &OnboardingKey,
        device_serial: &DeviceSerial,
    ) -> Result<EncryptedInstrumentData, SealError> {
        self.validate()?;

        let mut ephemeral_secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut ephemeral_secret);
        let ephemeral_public = MontgomeryPoint::mul_base_clamped(ephemeral_secret);
        let shared = MontgomeryPoint(*onboarding_key.as_bytes()).mul_clamped(ephemeral_secret);
        if shared.as_bytes() == &[0u8; 32] {
            ephemeral_secret.zeroize();
            return Err(SealError::LowOrderOnboardingKey);
        }

        let hkdf = Hkdf::<Sha256>::new(Some(HKDF_SALT), shared.as_bytes());
        let mut envelope_key = Zeroizing::new([0u8; 32]);
        hkdf.expand(HKDF_INFO, envelope_key.as_mut())
            .map_err(|_| SealError::KeyDerivation)?;
        ephemeral_secret.zeroize();

        let plaintext = self.encode_plaintext();
        let cipher = ChaCha20Poly1305::new(Key::from_slice(envelope_key.as_ref()));
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&[0u8; 12]),
                Payload {
                    msg: plaintext.as_slice(),
                    aad: device_serial.as_str().as_bytes(),
                },
            )
            .map_err(|_| SealError::Encryption)?;

        let mut envelope = Vec::with_capacity(1 + 32 + ciphertext.len());
        envelope.push(ENVELOPE_VERSION);
        envelope.extend_from_slice(ephemeral_public.as_bytes());
        envelope.extend_from_slice(&ciphertext);
        Ok(EncryptedInstrumentData(envelope))
    }

    fn encode_plaintext(&self) -> Zeroizing<Vec<u8>> {
        let mut out = Zeroizing::new(Vec::with_capacity(2 + self.pan.len() + 3 + self.cvv.len()));
        out.push(self.pan.len() as u8);
        out.extend_from_slice(self.pan.as_bytes());
        out.push(self.expiry_month);
        out.extend_from_slice(&self.expiry_year.to_be_bytes());
        out.push(self.cvv.len() as u8);
        out.extend_from_slice(self.cvv.as_bytes());
        out
    }
}

/// Sealed envelope: `version || ephemeral public key || AEAD ciphertext`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedInstrumentData(Vec<u8>);

impl EncryptedInstrumentData {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chacha20poly1305::{
        aead::{Aead, KeyInit, Payload},
        ChaCha20Poly1305, Key, Nonce,
    };
    use curve25519_dalek::montgomery::MontgomeryPoint;
    use hkdf::Hkdf;
    use sha2::Sha256;
    use tapwallet_types::DeviceSerial;

    use super::{InstrumentData, OnboardingKey, SealError, HKDF_INFO, HKDF_SALT};

    const RECIPIENT_SECRET: [u8; 32] = [0x77; 32];

    fn onboarding_key() -> OnboardingKey {
        OnboardingKey::from_bytes(MontgomeryPoint::mul_base_clamped(RECIPIENT_SECRET).to_bytes())
    }

    fn instrument() -> InstrumentData {
        InstrumentData::new("4532015112830366", 9, 2029, "123")
    }

    fn serial(value: &str) -> DeviceSerial {
        DeviceSerial::new(value)
    }

    #[test]
    fn envelope_has_version_ephemeral_key_and_ciphertext() {
        let sealed = instrument().seal(&onboarding_key(), &serial("serial-1")).unwrap();
        let bytes = sealed.as_bytes();
        assert_eq!(bytes[0], 1);
        // 16 digits of PAN framed as in encode_plaintext, plus the AEAD tag.
        let plaintext_len = 1 + 16 + 1 + 2 + 1 + 3;
        assert_eq!(bytes.len(), 1 + 32 + plaintext_len + 16);
    }

    #[test]
    fn recipient_can_open_the_envelope() {
        let sealed = instrument().seal(&onboarding_key(), &serial("serial-1")).unwrap();
        let bytes = sealed.as_bytes();
        let ephemeral = MontgomeryPoint(bytes[1..33].try_into().unwrap());
        let shared = ephemeral.mul_clamped(RECIPIENT_SECRET);

        let hkdf = Hkdf::<Sha256>::new(Some(HKDF_SALT), shared.as_bytes());
        let mut key = [0u8; 32];
        hkdf.expand(HKDF_INFO, &mut key).unwrap();
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&[0u8; 12]),
                Payload {
                    msg: &bytes[33..],
                    aad: b"serial-1",
                },
            )
            .unwrap();

        assert_eq!(plaintext[0], 16);
        assert_eq!(&plaintext[1..17], b"4532015112830366");
        assert_eq!(plaintext[17], 9);
        assert_eq!(u16::from_be_bytes([plaintext[18], plaintext[19]]), 2029);
        assert_eq!(plaintext[20], 3);
        assert_eq!(&plaintext[21..], b"123");
    }

    #[test]
    fn wrong_device_serial_fails_to_open() {
        let sealed = instrument().seal(&onboarding_key(), &serial("serial-1")).unwrap();
        let bytes = sealed.as_bytes();
        let ephemeral = MontgomeryPoint(bytes[1..33].try_into().unwrap());
        let shared = ephemeral.mul_clamped(RECIPIENT_SECRET);

        let hkdf = Hkdf::<Sha256>::new(Some(HKDF_SALT), shared.as_bytes());
        let mut key = [0u8; 32];
        hkdf.expand(HKDF_INFO, &mut key).unwrap();
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let result = cipher.decrypt(
            Nonce::from_slice(&[0u8; 12]),
            Payload {
                msg: &bytes[33..],
                aad: b"serial-2",
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn rejects_malformed_instruments() {
        let key = onboarding_key();
        assert_eq!(
            InstrumentData::new("123", 9, 2029, "123").seal(&key, &serial("s")).unwrap_err(),
            SealError::InvalidInstrument("pan")
        );
        assert_eq!(
            InstrumentData::new("4532015112830366", 13, 2029, "123")
                .seal(&key, &serial("s"))
                .unwrap_err(),
            SealError::InvalidInstrument("expiry_month")
        );
        assert_eq!(
            InstrumentData::new("4532015112830366", 9, 2029, "12")
                .seal(&key, &serial("s"))
                .unwrap_err(),
            SealError::InvalidInstrument("cvv")
        );
    }
}
