use serde::{Deserialize, Deserializer, Serialize};
use std::{ops::Deref, str::FromStr};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum IdError {
    #[error("ID must be between {0} and 64 characters")]
    LengthError(usize),
    #[error("ID must be lowercase alphanumeric")]
    CharError,
    #[error("ID is not a valid UUID: {0}")]
    UuidError(String),
}

/// Macro for generating string-backed ID types with strict validation rules.
/// Allowed characters are `[a-z0-9-_]`, with a per-type minimum length.
macro_rules! new_string_id_type {
    ($type_name:ident, $min_len:expr) => {
        #[derive(
            Serialize, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, ToSchema,
        )]
        #[serde(transparent)]
        pub struct $type_name(String);

        impl $type_name {
            // take Into<String> instead of ToString so we benefit from
            // zero-cost conversions for the common String/&str cases
            pub fn new(id: impl Into<String>) -> Result<Self, IdError> {
                let id = id.into();

                if id.len() < $min_len || id.len() > 64 {
                    return Err(IdError::LengthError($min_len));
                }
                if !id
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_numeric() || c == '_' || c == '-')
                {
                    return Err(IdError::CharError);
                }
                Ok(Self(id))
            }
        }

        impl<'de> Deserialize<'de> for $type_name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                $type_name::new(s).map_err(serde::de::Error::custom)
            }
        }

        impl AsRef<str> for $type_name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Deref for $type_name {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl std::fmt::Display for $type_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $type_name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $type_name::new(s)
            }
        }

        impl TryFrom<&str> for $type_name {
            type Error = IdError;

            fn try_from(s: &str) -> Result<Self, Self::Error> {
                $type_name::new(s)
            }
        }
    };
}

/// Macro for generating UUIDv7-backed entity ID types.
macro_rules! new_uuid_id_type {
    ($type_name:ident) => {
        #[derive(
            Serialize,
            Deserialize,
            Clone,
            Copy,
            Debug,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            ToSchema,
        )]
        #[serde(transparent)]
        pub struct $type_name(Uuid);

        impl $type_name {
            /// New id from the v7 (time-ordered) generator.
            pub fn generate() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl std::fmt::Display for $type_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $type_name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|_| IdError::UuidError(s.to_string()))
            }
        }

        impl From<Uuid> for $type_name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

// The owner id comes out of token validation, so it shares the strict
// string rules. Event ids may be caller-provided (receivers deduplicate
// on them), so they only need to be non-empty.
new_string_id_type!(OwnerId, 3);
new_string_id_type!(EventId, 1);

impl EventId {
    /// Caller-provided ids are optional; the default is a v7 uuid string.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

new_uuid_id_type!(IntegrationId);
new_uuid_id_type!(WebhookId);
new_uuid_id_type!(DeliveryId);
new_uuid_id_type!(TemplateId);
new_uuid_id_type!(NotificationId);
new_uuid_id_type!(SubscriptionId);
new_uuid_id_type!(ReportId);
new_uuid_id_type!(ReportTemplateId);
new_uuid_id_type!(ExecutionId);
