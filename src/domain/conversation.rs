use super::actor::UserId;
use super::ids::{ConversationId, MessageId, RequestId};
use crate::error::{DispatchError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub reader: UserId,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender: UserId,
    pub body: String,
    pub kind: MessageKind,
    pub sent_at: DateTime<Utc>,
    /// One receipt per non-sender participant that has read the message.
    pub read_by: Vec<ReadReceipt>,
}

impl Message {
    pub fn new(sender: UserId, body: impl Into<String>, kind: MessageKind, now: DateTime<Utc>) -> Self {
        Self {
            id: MessageId::new(),
            sender,
            body: body.into(),
            kind,
            sent_at: now,
            read_by: Vec::new(),
        }
    }

    pub fn is_read_by(&self, reader: UserId) -> bool {
        self.read_by.iter().any(|r| r.reader == reader)
    }
}

/// The private channel between a request's customer and its provider.
///
/// Participants are fixed when the conversation is opened. Messages are
/// append-only; the only later mutation is a reader's receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub request_id: RequestId,
    pub customer_id: UserId,
    pub provider_id: UserId,
    pub messages: Vec<Message>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn open(
        request_id: RequestId,
        customer_id: UserId,
        provider_id: UserId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ConversationId::new(),
            request_id,
            customer_id,
            provider_id,
            messages: Vec::new(),
            active: true,
            created_at: now,
            deactivated_at: None,
        }
    }

    pub fn participants(&self) -> [UserId; 2] {
        [self.customer_id, self.provider_id]
    }

    pub fn is_participant(&self, user: UserId) -> bool {
        self.customer_id == user || self.provider_id == user
    }

    /// The participant on the other side of `user`.
    pub fn counterpart(&self, user: UserId) -> Option<UserId> {
        if user == self.customer_id {
            Some(self.provider_id)
        } else if user == self.provider_id {
            Some(self.customer_id)
        } else {
            None
        }
    }

    pub fn append(&mut self, message: Message) -> Result<()> {
        if !self.active {
            return Err(DispatchError::ConversationInactive(self.id.to_string()));
        }
        if !self.is_participant(message.sender) {
            return Err(DispatchError::Unauthorized(format!(
                "User {} is not part of conversation {}",
                message.sender, self.id
            )));
        }
        if message.body.trim().is_empty() {
            return Err(DispatchError::ValidationError(
                "Message body must not be empty".to_string(),
            ));
        }
        self.messages.push(message);
        Ok(())
    }

    /// Stamps every unread message from the other participant as read by
    /// `reader`; returns how many were newly marked.
    pub fn mark_read(&mut self, reader: UserId, now: DateTime<Utc>) -> Result<usize> {
        if !self.is_participant(reader) {
            return Err(DispatchError::Unauthorized(format!(
                "User {} is not part of conversation {}",
                reader, self.id
            )));
        }
        let mut marked = 0;
        for message in self
            .messages
            .iter_mut()
            .filter(|m| m.sender != reader && !m.is_read_by(reader))
        {
            message.read_by.push(ReadReceipt {
                reader,
                read_at: now,
            });
            marked += 1;
        }
        Ok(marked)
    }

    pub fn unread_count(&self, reader: UserId) -> usize {
        self.messages
            .iter()
            .filter(|m| m.sender != reader && !m.is_read_by(reader))
            .count()
    }

    pub fn deactivate(&mut self, now: DateTime<Utc>) {
        if self.active {
            self.active = false;
            self.deactivated_at = Some(now);
        }
    }
}
