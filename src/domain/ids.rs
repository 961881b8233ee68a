use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

uuid_id!(
    /// Identifier of a [`ServiceRequest`](super::request::ServiceRequest).
    RequestId
);
uuid_id!(ConversationId);
uuid_id!(MessageId);
uuid_id!(PaymentId);

impl RequestId {
    /// Deterministic id for an externally supplied label, stable across runs.
    pub fn from_label(label: &str) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, label.as_bytes()))
    }
}
