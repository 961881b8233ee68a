use crate::domain::actor::{Actor, UserId};
use crate::domain::conversation::{Conversation, Message, MessageKind};
use crate::domain::ids::{ConversationId, RequestId};
use crate::domain::ports::{ConversationStoreRef, RequestStoreRef};
use crate::domain::request::ServiceRequest;
use crate::error::{DispatchError, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Owns the one-channel-per-assignment rule between a request and its chat.
///
/// Binding and deactivation run one at a time and act on the stored request,
/// never on a caller's copy of it.
#[derive(Clone)]
pub struct ConversationBinder {
    requests: RequestStoreRef,
    conversations: ConversationStoreRef,
    binding: Arc<Mutex<()>>,
}

impl ConversationBinder {
    pub fn new(requests: RequestStoreRef, conversations: ConversationStoreRef) -> Self {
        Self {
            requests,
            conversations,
            binding: Arc::new(Mutex::new(())),
        }
    }

    /// Returns the active conversation for the assignment `snapshot` was
    /// taken from, opening one if none exists.
    ///
    /// If the stored request no longer has the snapshot's provider the bind
    /// is refused with [`DispatchError::StaleRequest`] and nothing changes.
    pub async fn bind(&self, snapshot: &ServiceRequest) -> Result<Conversation> {
        let _binding = self.binding.lock().await;
        let current = self.load(snapshot.id).await?;
        if current.provider_id != snapshot.provider_id || !current.status.has_provider() {
            tracing::debug!(
                request_id = %snapshot.id,
                snapshot_provider = ?snapshot.provider_id,
                current_provider = ?current.provider_id,
                status = %current.status,
                "Stale conversation bind refused"
            );
            return Err(DispatchError::StaleRequest(snapshot.id.to_string()));
        }
        self.bind_current(&current).await
    }

    /// Returns the request's active conversation, opening one for the current
    /// customer/provider pair if none exists.
    ///
    /// Binding a request that has no provider is a caller bug and is reported
    /// as [`DispatchError::Invariant`].
    pub async fn get_or_create(&self, request_id: RequestId) -> Result<Conversation> {
        let _binding = self.binding.lock().await;
        let current = self.load(request_id).await?;
        self.bind_current(&current).await
    }

    /// Callers hold `binding` and pass the stored record.
    async fn bind_current(&self, request: &ServiceRequest) -> Result<Conversation> {
        let Some(provider_id) = request.provider_id else {
            tracing::error!(request_id = %request.id, status = %request.status, "Conversation bound to request without provider");
            return Err(DispatchError::Invariant(format!(
                "request {} has no assigned provider",
                request.id
            )));
        };

        let candidate = Conversation::open(request.id, request.customer_id, provider_id, Utc::now());
        let conversation = self.conversations.get_or_insert(candidate.clone()).await?;
        if conversation.provider_id == provider_id {
            if conversation.id == candidate.id {
                tracing::info!(request_id = %request.id, conversation_id = %conversation.id, "Conversation opened");
            }
            return Ok(conversation);
        }

        // Left over from a provider that has since been replaced.
        self.conversations
            .deactivate_for_request(request.id, Utc::now())
            .await?;
        let conversation = self.conversations.get_or_insert(candidate).await?;
        tracing::info!(request_id = %request.id, conversation_id = %conversation.id, "Conversation rebound");
        Ok(conversation)
    }

    async fn load(&self, request_id: RequestId) -> Result<ServiceRequest> {
        self.requests
            .get(request_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("request", request_id))
    }

    pub async fn get(&self, id: ConversationId) -> Result<Conversation> {
        self.conversations
            .get(id)
            .await?
            .ok_or_else(|| DispatchError::not_found("conversation", id))
    }

    pub async fn post_message(
        &self,
        id: ConversationId,
        sender: UserId,
        body: &str,
        kind: MessageKind,
    ) -> Result<Message> {
        let message = Message::new(sender, body, kind, Utc::now());
        self.conversations
            .append_message(id, message.clone())
            .await?;
        tracing::debug!(conversation_id = %id, %sender, "Message posted");
        Ok(message)
    }

    pub async fn mark_read(&self, id: ConversationId, reader: UserId) -> Result<usize> {
        self.conversations.mark_read(id, reader, Utc::now()).await
    }

    /// Full history for a participant; admins may read any conversation.
    pub async fn messages(&self, id: ConversationId, actor: &Actor) -> Result<Vec<Message>> {
        let conversation = self.get(id).await?;
        if !actor.is_admin() && !conversation.is_participant(actor.id) {
            return Err(DispatchError::Unauthorized(format!(
                "User {} is not part of conversation {}",
                actor.id, id
            )));
        }
        Ok(conversation.messages)
    }

    pub async fn unread_count(&self, id: ConversationId, reader: UserId) -> Result<usize> {
        let conversation = self.get(id).await?;
        if !conversation.is_participant(reader) {
            return Err(DispatchError::Unauthorized(format!(
                "User {} is not part of conversation {}",
                reader, id
            )));
        }
        Ok(conversation.unread_count(reader))
    }

    pub async fn deactivate(&self, request_id: RequestId) -> Result<Option<ConversationId>> {
        let _binding = self.binding.lock().await;
        let closed = self
            .conversations
            .deactivate_for_request(request_id, Utc::now())
            .await?;
        if let Some(conversation_id) = closed {
            tracing::info!(%request_id, %conversation_id, "Conversation deactivated");
        }
        Ok(closed)
    }
}
