use super::actor::UserId;
use super::ids::{ConversationId, PaymentId, RequestId};
use super::request::RequestStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    RequestCreated,
    RequestBroadcast,
    RequestClaimed { provider_id: UserId },
    /// Sent to broadcast candidates that lost the claim race.
    NoLongerAvailable,
    StatusChanged { from: RequestStatus, to: RequestStatus },
    QuotationUpdated,
    MessagePosted { conversation_id: ConversationId },
    SettlementInitiated { payment_id: PaymentId },
    PaymentSucceeded { payment_id: PaymentId },
    PaymentFailed { payment_id: PaymentId },
    PaymentRefunded { payment_id: PaymentId },
    ReviewSubmitted,
}

/// Something that happened to a request, and who is allowed to hear about
/// it. Delivery is left to whoever subscribes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchEvent {
    pub kind: EventKind,
    pub request_id: RequestId,
    pub recipients: Vec<UserId>,
    pub at: DateTime<Utc>,
}

impl DispatchEvent {
    pub fn new(kind: EventKind, request_id: RequestId) -> Self {
        Self {
            kind,
            request_id,
            recipients: Vec::new(),
            at: Utc::now(),
        }
    }

    pub fn to(mut self, recipients: impl IntoIterator<Item = UserId>) -> Self {
        for recipient in recipients {
            if !self.recipients.contains(&recipient) {
                self.recipients.push(recipient);
            }
        }
        self
    }

    pub fn is_visible_to(&self, user: UserId) -> bool {
        self.recipients.contains(&user)
    }
}
