use super::actor::UserId;
use super::ids::RequestId;
use crate::error::{DispatchError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A 1 to 5 star rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Stars(u8);

impl Stars {
    pub fn new(value: u8) -> Result<Self> {
        if (1..=5).contains(&value) {
            Ok(Self(value))
        } else {
            Err(DispatchError::ValidationError(format!(
                "Rating must be between 1 and 5, got {value}"
            )))
        }
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Stars {
    type Error = DispatchError;

    fn try_from(value: u8) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Stars> for u8 {
    fn from(stars: Stars) -> Self {
        stars.0
    }
}

/// The customer's review of a completed request. Immutable once submitted,
/// apart from a single administrative response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub request_id: RequestId,
    pub customer_id: UserId,
    pub provider_id: UserId,
    pub stars: Stars,
    pub comment: String,
    pub created_at: DateTime<Utc>,
    pub admin_response: Option<String>,
    pub responded_at: Option<DateTime<Utc>>,
}

impl Review {
    pub fn respond(&mut self, response: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        if self.admin_response.is_some() {
            return Err(DispatchError::ValidationError(format!(
                "Review for request {} already has a response",
                self.request_id
            )));
        }
        let response = response.into();
        if response.trim().is_empty() {
            return Err(DispatchError::ValidationError(
                "Response must not be empty".to_string(),
            ));
        }
        self.admin_response = Some(response);
        self.responded_at = Some(now);
        Ok(())
    }
}
