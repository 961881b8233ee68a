use crate::domain::actor::{Role, UserId};
use crate::domain::conversation::{Conversation, Message};
use crate::domain::geo::ProviderPosition;
use crate::domain::ids::{ConversationId, PaymentId, RequestId};
use crate::domain::payment::{Payment, PaymentStatus};
use crate::domain::ports::{
    CasOutcome, ConversationStore, IdentityProvider, PaymentStore, ProviderDirectory,
    RequestStore, ReviewStore, SettleOutcome,
};
use crate::domain::request::{RequestGuard, ServiceRequest};
use crate::domain::review::{Review, Stars};
use crate::error::{DispatchError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory store for service requests.
///
/// Conditional writes take the write lock for the whole check-and-replace,
/// which is what makes [`RequestStore::compare_and_set`] atomic here.
#[derive(Default, Clone)]
pub struct InMemoryRequestStore {
    requests: Arc<RwLock<HashMap<RequestId, ServiceRequest>>>,
}

impl InMemoryRequestStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn insert(&self, request: ServiceRequest) -> Result<()> {
        let mut requests = self.requests.write().await;
        if requests.contains_key(&request.id) {
            return Err(DispatchError::ValidationError(format!(
                "Request {} already exists",
                request.id
            )));
        }
        requests.insert(request.id, request);
        Ok(())
    }

    async fn get(&self, id: RequestId) -> Result<Option<ServiceRequest>> {
        let requests = self.requests.read().await;
        Ok(requests.get(&id).cloned())
    }

    async fn compare_and_set(
        &self,
        guard: RequestGuard,
        mut next: ServiceRequest,
    ) -> Result<CasOutcome> {
        let mut requests = self.requests.write().await;
        let Some(current) = requests.get(&next.id) else {
            return Ok(CasOutcome::Missing);
        };
        if !guard.matches(current) {
            return Ok(CasOutcome::Conflict(current.clone()));
        }
        next.version = current.version + 1;
        requests.insert(next.id, next.clone());
        Ok(CasOutcome::Applied(next))
    }

    async fn all(&self) -> Result<Vec<ServiceRequest>> {
        let requests = self.requests.read().await;
        Ok(requests.values().cloned().collect())
    }
}

#[derive(Default)]
struct ConversationTable {
    conversations: HashMap<ConversationId, Conversation>,
    active_by_request: HashMap<RequestId, ConversationId>,
}

#[derive(Default, Clone)]
pub struct InMemoryConversationStore {
    inner: Arc<RwLock<ConversationTable>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get_or_insert(&self, candidate: Conversation) -> Result<Conversation> {
        let mut table = self.inner.write().await;
        if let Some(existing) = table
            .active_by_request
            .get(&candidate.request_id)
            .and_then(|id| table.conversations.get(id))
        {
            return Ok(existing.clone());
        }
        table
            .active_by_request
            .insert(candidate.request_id, candidate.id);
        table.conversations.insert(candidate.id, candidate.clone());
        Ok(candidate)
    }

    async fn get(&self, id: ConversationId) -> Result<Option<Conversation>> {
        let table = self.inner.read().await;
        Ok(table.conversations.get(&id).cloned())
    }

    async fn active_for_request(&self, request_id: RequestId) -> Result<Option<Conversation>> {
        let table = self.inner.read().await;
        Ok(table
            .active_by_request
            .get(&request_id)
            .and_then(|id| table.conversations.get(id))
            .cloned())
    }

    async fn append_message(&self, id: ConversationId, message: Message) -> Result<()> {
        let mut table = self.inner.write().await;
        let conversation = table
            .conversations
            .get_mut(&id)
            .ok_or_else(|| DispatchError::not_found("conversation", id))?;
        conversation.append(message)
    }

    async fn mark_read(
        &self,
        id: ConversationId,
        reader: UserId,
        at: DateTime<Utc>,
    ) -> Result<usize> {
        let mut table = self.inner.write().await;
        let conversation = table
            .conversations
            .get_mut(&id)
            .ok_or_else(|| DispatchError::not_found("conversation", id))?;
        conversation.mark_read(reader, at)
    }

    async fn deactivate_for_request(
        &self,
        request_id: RequestId,
        at: DateTime<Utc>,
    ) -> Result<Option<ConversationId>> {
        let mut table = self.inner.write().await;
        let Some(id) = table.active_by_request.remove(&request_id) else {
            return Ok(None);
        };
        if let Some(conversation) = table.conversations.get_mut(&id) {
            conversation.deactivate(at);
        }
        Ok(Some(id))
    }
}

#[derive(Default)]
struct PaymentTable {
    payments: HashMap<PaymentId, Payment>,
    settled_by_request: HashMap<RequestId, PaymentId>,
}

/// In-memory payment attempts plus the per-request settlement index that
/// enforces at most one success.
#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    inner: Arc<RwLock<PaymentTable>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert(&self, payment: Payment) -> Result<()> {
        let mut table = self.inner.write().await;
        table.payments.insert(payment.id, payment);
        Ok(())
    }

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>> {
        let table = self.inner.read().await;
        Ok(table.payments.get(&id).cloned())
    }

    async fn for_request(&self, request_id: RequestId) -> Result<Vec<Payment>> {
        let table = self.inner.read().await;
        let mut payments: Vec<Payment> = table
            .payments
            .values()
            .filter(|p| p.request_id == request_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    async fn settled(&self, request_id: RequestId) -> Result<Option<Payment>> {
        let table = self.inner.read().await;
        Ok(table
            .settled_by_request
            .get(&request_id)
            .and_then(|id| table.payments.get(id))
            .filter(|p| p.status == PaymentStatus::Success)
            .cloned())
    }

    async fn mark_failed(
        &self,
        id: PaymentId,
        reason: String,
        at: DateTime<Utc>,
    ) -> Result<Payment> {
        let mut table = self.inner.write().await;
        let payment = table
            .payments
            .get_mut(&id)
            .ok_or_else(|| DispatchError::not_found("payment", id))?;
        payment.mark_failed(reason, at)?;
        Ok(payment.clone())
    }

    async fn settle(
        &self,
        id: PaymentId,
        gateway_payment_id: String,
        at: DateTime<Utc>,
    ) -> Result<SettleOutcome> {
        let mut table = self.inner.write().await;
        let request_id = table
            .payments
            .get(&id)
            .map(|p| p.request_id)
            .ok_or_else(|| DispatchError::not_found("payment", id))?;

        if let Some(existing) = table
            .settled_by_request
            .get(&request_id)
            .and_then(|settled| table.payments.get(settled))
        {
            return Ok(match existing.status {
                PaymentStatus::Refunded => SettleOutcome::Refunded(existing.clone()),
                _ => SettleOutcome::Duplicate(existing.clone()),
            });
        }

        let payment = table
            .payments
            .get_mut(&id)
            .ok_or_else(|| DispatchError::not_found("payment", id))?;
        payment.mark_success(gateway_payment_id, at)?;
        let settled = payment.clone();
        table.settled_by_request.insert(request_id, id);
        Ok(SettleOutcome::Settled(settled))
    }

    async fn refund(
        &self,
        id: PaymentId,
        gateway_refund_id: String,
        reason: String,
        at: DateTime<Utc>,
    ) -> Result<Payment> {
        let mut table = self.inner.write().await;
        let payment = table
            .payments
            .get_mut(&id)
            .ok_or_else(|| DispatchError::not_found("payment", id))?;
        payment.mark_refunded(gateway_refund_id, reason, at)?;
        Ok(payment.clone())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryReviewStore {
    reviews: Arc<RwLock<HashMap<RequestId, Review>>>,
}

impl InMemoryReviewStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReviewStore for InMemoryReviewStore {
    async fn insert_if_absent(&self, review: Review) -> Result<bool> {
        let mut reviews = self.reviews.write().await;
        if reviews.contains_key(&review.request_id) {
            return Ok(false);
        }
        reviews.insert(review.request_id, review);
        Ok(true)
    }

    async fn get(&self, request_id: RequestId) -> Result<Option<Review>> {
        let reviews = self.reviews.read().await;
        Ok(reviews.get(&request_id).cloned())
    }

    async fn respond(
        &self,
        request_id: RequestId,
        response: String,
        at: DateTime<Utc>,
    ) -> Result<Option<Review>> {
        let mut reviews = self.reviews.write().await;
        let Some(review) = reviews.get_mut(&request_id) else {
            return Ok(None);
        };
        review.respond(response, at)?;
        Ok(Some(review.clone()))
    }
}

#[derive(Debug, Clone)]
struct ProviderEntry {
    position: ProviderPosition,
    rating_count: u32,
}

#[derive(Default)]
struct DirectoryTable {
    roles: HashMap<UserId, Role>,
    providers: HashMap<UserId, ProviderEntry>,
}

/// Stand-in for the external identity service and provider-position feed.
#[derive(Default, Clone)]
pub struct InMemoryDirectory {
    inner: Arc<RwLock<DirectoryTable>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, user: UserId, role: Role) {
        let mut table = self.inner.write().await;
        table.roles.insert(user, role);
    }

    /// Registers `position.provider_id` as a provider and records where it is.
    pub async fn upsert_provider(&self, position: ProviderPosition) {
        let mut table = self.inner.write().await;
        table.roles.insert(position.provider_id, Role::Provider);
        let rating_count = table
            .providers
            .get(&position.provider_id)
            .map(|e| e.rating_count)
            .unwrap_or(u32::from(position.rating > 0.0));
        table.providers.insert(
            position.provider_id,
            ProviderEntry {
                position,
                rating_count,
            },
        );
    }

    pub async fn set_available(&self, provider: UserId, available: bool) -> Result<()> {
        let mut table = self.inner.write().await;
        let entry = table
            .providers
            .get_mut(&provider)
            .ok_or_else(|| DispatchError::not_found("provider", provider))?;
        entry.position.available = available;
        Ok(())
    }
}

#[async_trait]
impl IdentityProvider for InMemoryDirectory {
    async fn role_of(&self, user: UserId) -> Result<Option<Role>> {
        let table = self.inner.read().await;
        Ok(table.roles.get(&user).copied())
    }
}

#[async_trait]
impl ProviderDirectory for InMemoryDirectory {
    async fn positions(&self) -> Result<Vec<ProviderPosition>> {
        let table = self.inner.read().await;
        Ok(table
            .providers
            .values()
            .map(|e| e.position.clone())
            .collect())
    }

    async fn record_rating(&self, provider: UserId, stars: Stars) -> Result<()> {
        let mut table = self.inner.write().await;
        let entry = table
            .providers
            .get_mut(&provider)
            .ok_or_else(|| DispatchError::not_found("provider", provider))?;
        let total = entry.position.rating * f64::from(entry.rating_count) + f64::from(stars.value());
        entry.rating_count += 1;
        entry.position.rating = total / f64::from(entry.rating_count);
        Ok(())
    }
}
