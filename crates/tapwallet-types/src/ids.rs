use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub type AmountMinor = u64;

macro_rules! impl_opaque_id {
    ($name:ident) => {
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn parse(value: &str) -> Result<Self, ValidationError> {
                if value.is_empty() {
                    return Err(ValidationError::EmptyId {
                        kind: stringify!($name),
                    });
                }
                Ok(Self(value.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<&str> for $name {
            type Error = ValidationError;

            fn try_from(value: &str) -> Result<Self, Self::Error> {
                Self::parse(value)
            }
        }
    };
}

impl_opaque_id!(CardId);
impl_opaque_id!(DigitalCardId);
impl_opaque_id!(WalletId);
impl_opaque_id!(DeviceSerial);
impl_opaque_id!(PushToken);
impl_opaque_id!(ConsentSessionId);
impl_opaque_id!(DigitizationToken);
impl_opaque_id!(ServerMessageCode);
impl_opaque_id!(IdvMethodId);
impl_opaque_id!(CurrencyCode);
