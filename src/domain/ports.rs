//! Traits the engine consumes: its own durable stores plus the external
//! collaborators (identity, provider positions, payment gateway).

use super::actor::{Role, UserId};
use super::conversation::{Conversation, Message};
use super::geo::ProviderPosition;
use super::ids::{ConversationId, PaymentId, RequestId};
use super::money::Amount;
use super::payment::{GatewayCallback, GatewayOrder, Payment};
use super::request::{RequestGuard, ServiceRequest};
use super::review::{Review, Stars};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Result of a conditional request write.
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome {
    /// The guard matched; carries the stored record with its new version.
    Applied(ServiceRequest),
    /// Someone else changed the request first; carries what they left.
    Conflict(ServiceRequest),
    Missing,
}

#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Inserts a new request; fails if the id is already taken.
    async fn insert(&self, request: ServiceRequest) -> Result<()>;
    async fn get(&self, id: RequestId) -> Result<Option<ServiceRequest>>;
    /// Replaces the stored request with `next` only if its current
    /// `{status, provider}` still matches `guard`, in a single atomic step.
    async fn compare_and_set(&self, guard: RequestGuard, next: ServiceRequest)
    -> Result<CasOutcome>;
    async fn all(&self) -> Result<Vec<ServiceRequest>>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Returns the active conversation for `candidate.request_id` if one
    /// exists, otherwise stores `candidate`. Atomic per request.
    async fn get_or_insert(&self, candidate: Conversation) -> Result<Conversation>;
    async fn get(&self, id: ConversationId) -> Result<Option<Conversation>>;
    async fn active_for_request(&self, request_id: RequestId) -> Result<Option<Conversation>>;
    async fn append_message(&self, id: ConversationId, message: Message) -> Result<()>;
    async fn mark_read(&self, id: ConversationId, reader: UserId, at: DateTime<Utc>)
    -> Result<usize>;
    /// Deactivates the request's active conversation, if any.
    async fn deactivate_for_request(
        &self,
        request_id: RequestId,
        at: DateTime<Utc>,
    ) -> Result<Option<ConversationId>>;
}

/// Result of trying to settle a payment attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum SettleOutcome {
    Settled(Payment),
    /// Another attempt already settled the request; it is returned untouched.
    Duplicate(Payment),
    /// The request's settlement was refunded and cannot be settled again.
    Refunded(Payment),
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert(&self, payment: Payment) -> Result<()>;
    async fn get(&self, id: PaymentId) -> Result<Option<Payment>>;
    async fn for_request(&self, request_id: RequestId) -> Result<Vec<Payment>>;
    /// The successful attempt holding the request's settlement. A refunded
    /// settlement is not returned.
    async fn settled(&self, request_id: RequestId) -> Result<Option<Payment>>;
    async fn mark_failed(&self, id: PaymentId, reason: String, at: DateTime<Utc>)
    -> Result<Payment>;
    /// Marks a pending attempt successful unless another attempt already
    /// settled the same request, refunded or not. Check and write happen
    /// atomically.
    async fn settle(
        &self,
        id: PaymentId,
        gateway_payment_id: String,
        at: DateTime<Utc>,
    ) -> Result<SettleOutcome>;
    async fn refund(
        &self,
        id: PaymentId,
        gateway_refund_id: String,
        reason: String,
        at: DateTime<Utc>,
    ) -> Result<Payment>;
}

#[async_trait]
pub trait ReviewStore: Send + Sync {
    /// Stores the review unless the request already has one.
    async fn insert_if_absent(&self, review: Review) -> Result<bool>;
    async fn get(&self, request_id: RequestId) -> Result<Option<Review>>;
    async fn respond(
        &self,
        request_id: RequestId,
        response: String,
        at: DateTime<Utc>,
    ) -> Result<Option<Review>>;
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// `None` for unknown or unauthenticated actors.
    async fn role_of(&self, user: UserId) -> Result<Option<Role>>;
}

#[async_trait]
pub trait ProviderDirectory: Send + Sync {
    async fn positions(&self) -> Result<Vec<ProviderPosition>>;
    async fn record_rating(&self, provider: UserId, stars: Stars) -> Result<()>;
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_order(&self, amount: Amount, currency: &str, receipt: &str)
    -> Result<GatewayOrder>;
    async fn verify_signature(&self, callback: &GatewayCallback) -> Result<bool>;
    async fn refund(&self, gateway_payment_id: &str, amount: Amount) -> Result<String>;
}

pub type RequestStoreRef = Arc<dyn RequestStore>;
pub type ConversationStoreRef = Arc<dyn ConversationStore>;
pub type PaymentStoreRef = Arc<dyn PaymentStore>;
pub type ReviewStoreRef = Arc<dyn ReviewStore>;
pub type IdentityProviderRef = Arc<dyn IdentityProvider>;
pub type ProviderDirectoryRef = Arc<dyn ProviderDirectory>;
pub type PaymentGatewayRef = Arc<dyn PaymentGateway>;
