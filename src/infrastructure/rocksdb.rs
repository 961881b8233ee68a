use crate::domain::actor::UserId;
use crate::domain::conversation::{Conversation, Message};
use crate::domain::ids::{ConversationId, PaymentId, RequestId};
use crate::domain::payment::{Payment, PaymentStatus};
use crate::domain::ports::{
    CasOutcome, ConversationStore, PaymentStore, RequestStore, ReviewStore, SettleOutcome,
};
use crate::domain::request::{RequestGuard, ServiceRequest};
use crate::domain::review::Review;
use crate::error::{DispatchError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for service requests, keyed by request id.
pub const CF_REQUESTS: &str = "requests";
/// Column Family for conversations, keyed by conversation id.
pub const CF_CONVERSATIONS: &str = "conversations";
/// Column Family mapping a request id to its active conversation id.
pub const CF_CONVERSATION_INDEX: &str = "conversation_index";
/// Column Family for payment attempts, keyed by payment id.
pub const CF_PAYMENTS: &str = "payments";
/// Column Family mapping a request id to the payment that settled it.
pub const CF_SETTLEMENTS: &str = "settlements";
/// Column Family for reviews, keyed by request id.
pub const CF_REVIEWS: &str = "reviews";

const COLUMN_FAMILIES: [&str; 6] = [
    CF_REQUESTS,
    CF_CONVERSATIONS,
    CF_CONVERSATION_INDEX,
    CF_PAYMENTS,
    CF_SETTLEMENTS,
    CF_REVIEWS,
];

/// A persistent store implementation using RocksDB.
///
/// Every record kind lives in its own Column Family as JSON. Writes that
/// check before they write (conditional request updates, settlement, the
/// conversation index) run under one writer lock, and writes touching more
/// than one key go through a single `WriteBatch`.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    writer: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path, creating
    /// any missing column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()));
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            writer: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            DispatchError::InternalError(Box::new(std::io::Error::other(format!(
                "{name} column family not found"
            ))))
        })
    }

    fn read<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write<T: Serialize>(&self, cf: &str, key: &[u8], value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.db.put_cf(self.cf(cf)?, key, bytes)?;
        Ok(())
    }

    fn scan<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>> {
        let mut values = Vec::new();
        for item in self.db.iterator_cf(self.cf(cf)?, IteratorMode::Start) {
            let (_key, value) = item?;
            values.push(serde_json::from_slice(&value)?);
        }
        Ok(values)
    }

    fn payment(&self, id: PaymentId) -> Result<Payment> {
        self.read(CF_PAYMENTS, id.as_bytes())?
            .ok_or_else(|| DispatchError::not_found("payment", id))
    }

    fn conversation(&self, id: ConversationId) -> Result<Conversation> {
        self.read(CF_CONVERSATIONS, id.as_bytes())?
            .ok_or_else(|| DispatchError::not_found("conversation", id))
    }

    fn active_conversation_id(&self, request_id: RequestId) -> Result<Option<ConversationId>> {
        self.read(CF_CONVERSATION_INDEX, request_id.as_bytes())
    }
}

#[async_trait]
impl RequestStore for RocksDBStore {
    async fn insert(&self, request: ServiceRequest) -> Result<()> {
        let _writer = self.writer.lock().await;
        if self
            .read::<ServiceRequest>(CF_REQUESTS, request.id.as_bytes())?
            .is_some()
        {
            return Err(DispatchError::ValidationError(format!(
                "Request {} already exists",
                request.id
            )));
        }
        self.write(CF_REQUESTS, request.id.as_bytes(), &request)
    }

    async fn get(&self, id: RequestId) -> Result<Option<ServiceRequest>> {
        self.read(CF_REQUESTS, id.as_bytes())
    }

    async fn compare_and_set(
        &self,
        guard: RequestGuard,
        mut next: ServiceRequest,
    ) -> Result<CasOutcome> {
        let _writer = self.writer.lock().await;
        let Some(current) = self.read::<ServiceRequest>(CF_REQUESTS, next.id.as_bytes())? else {
            return Ok(CasOutcome::Missing);
        };
        if !guard.matches(&current) {
            return Ok(CasOutcome::Conflict(current));
        }
        next.version = current.version + 1;
        self.write(CF_REQUESTS, next.id.as_bytes(), &next)?;
        Ok(CasOutcome::Applied(next))
    }

    async fn all(&self) -> Result<Vec<ServiceRequest>> {
        self.scan(CF_REQUESTS)
    }
}

#[async_trait]
impl ConversationStore for RocksDBStore {
    async fn get_or_insert(&self, candidate: Conversation) -> Result<Conversation> {
        let _writer = self.writer.lock().await;
        if let Some(id) = self.active_conversation_id(candidate.request_id)? {
            return self.conversation(id);
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_CONVERSATIONS)?,
            candidate.id.as_bytes(),
            serde_json::to_vec(&candidate)?,
        );
        batch.put_cf(
            self.cf(CF_CONVERSATION_INDEX)?,
            candidate.request_id.as_bytes(),
            serde_json::to_vec(&candidate.id)?,
        );
        self.db.write(batch)?;
        Ok(candidate)
    }

    async fn get(&self, id: ConversationId) -> Result<Option<Conversation>> {
        self.read(CF_CONVERSATIONS, id.as_bytes())
    }

    async fn active_for_request(&self, request_id: RequestId) -> Result<Option<Conversation>> {
        match self.active_conversation_id(request_id)? {
            Some(id) => self.read(CF_CONVERSATIONS, id.as_bytes()),
            None => Ok(None),
        }
    }

    async fn append_message(&self, id: ConversationId, message: Message) -> Result<()> {
        let _writer = self.writer.lock().await;
        let mut conversation = self.conversation(id)?;
        conversation.append(message)?;
        self.write(CF_CONVERSATIONS, id.as_bytes(), &conversation)
    }

    async fn mark_read(
        &self,
        id: ConversationId,
        reader: UserId,
        at: DateTime<Utc>,
    ) -> Result<usize> {
        let _writer = self.writer.lock().await;
        let mut conversation = self.conversation(id)?;
        let marked = conversation.mark_read(reader, at)?;
        if marked > 0 {
            self.write(CF_CONVERSATIONS, id.as_bytes(), &conversation)?;
        }
        Ok(marked)
    }

    async fn deactivate_for_request(
        &self,
        request_id: RequestId,
        at: DateTime<Utc>,
    ) -> Result<Option<ConversationId>> {
        let _writer = self.writer.lock().await;
        let Some(id) = self.active_conversation_id(request_id)? else {
            return Ok(None);
        };

        let mut batch = WriteBatch::default();
        if let Some(mut conversation) =
            self.read::<Conversation>(CF_CONVERSATIONS, id.as_bytes())?
        {
            conversation.deactivate(at);
            batch.put_cf(
                self.cf(CF_CONVERSATIONS)?,
                id.as_bytes(),
                serde_json::to_vec(&conversation)?,
            );
        }
        batch.delete_cf(self.cf(CF_CONVERSATION_INDEX)?, request_id.as_bytes());
        self.db.write(batch)?;
        Ok(Some(id))
    }
}

#[async_trait]
impl PaymentStore for RocksDBStore {
    async fn insert(&self, payment: Payment) -> Result<()> {
        let _writer = self.writer.lock().await;
        self.write(CF_PAYMENTS, payment.id.as_bytes(), &payment)
    }

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>> {
        self.read(CF_PAYMENTS, id.as_bytes())
    }

    async fn for_request(&self, request_id: RequestId) -> Result<Vec<Payment>> {
        let mut payments: Vec<Payment> = self
            .scan::<Payment>(CF_PAYMENTS)?
            .into_iter()
            .filter(|p| p.request_id == request_id)
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    async fn settled(&self, request_id: RequestId) -> Result<Option<Payment>> {
        match self.read::<PaymentId>(CF_SETTLEMENTS, request_id.as_bytes())? {
            Some(id) => Ok(self
                .read::<Payment>(CF_PAYMENTS, id.as_bytes())?
                .filter(|p| p.status == PaymentStatus::Success)),
            None => Ok(None),
        }
    }

    async fn mark_failed(
        &self,
        id: PaymentId,
        reason: String,
        at: DateTime<Utc>,
    ) -> Result<Payment> {
        let _writer = self.writer.lock().await;
        let mut payment = self.payment(id)?;
        payment.mark_failed(reason, at)?;
        self.write(CF_PAYMENTS, id.as_bytes(), &payment)?;
        Ok(payment)
    }

    async fn settle(
        &self,
        id: PaymentId,
        gateway_payment_id: String,
        at: DateTime<Utc>,
    ) -> Result<SettleOutcome> {
        let _writer = self.writer.lock().await;
        let mut payment = self.payment(id)?;

        if let Some(settled_id) =
            self.read::<PaymentId>(CF_SETTLEMENTS, payment.request_id.as_bytes())?
        {
            let existing = self.payment(settled_id)?;
            return Ok(match existing.status {
                PaymentStatus::Refunded => SettleOutcome::Refunded(existing),
                _ => SettleOutcome::Duplicate(existing),
            });
        }

        payment.mark_success(gateway_payment_id, at)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_PAYMENTS)?,
            id.as_bytes(),
            serde_json::to_vec(&payment)?,
        );
        batch.put_cf(
            self.cf(CF_SETTLEMENTS)?,
            payment.request_id.as_bytes(),
            serde_json::to_vec(&id)?,
        );
        self.db.write(batch)?;
        Ok(SettleOutcome::Settled(payment))
    }

    async fn refund(
        &self,
        id: PaymentId,
        gateway_refund_id: String,
        reason: String,
        at: DateTime<Utc>,
    ) -> Result<Payment> {
        let _writer = self.writer.lock().await;
        let mut payment = self.payment(id)?;
        payment.mark_refunded(gateway_refund_id, reason, at)?;
        self.write(CF_PAYMENTS, id.as_bytes(), &payment)?;
        Ok(payment)
    }
}

#[async_trait]
impl ReviewStore for RocksDBStore {
    async fn insert_if_absent(&self, review: Review) -> Result<bool> {
        let _writer = self.writer.lock().await;
        if self
            .read::<Review>(CF_REVIEWS, review.request_id.as_bytes())?
            .is_some()
        {
            return Ok(false);
        }
        self.write(CF_REVIEWS, review.request_id.as_bytes(), &review)?;
        Ok(true)
    }

    async fn get(&self, request_id: RequestId) -> Result<Option<Review>> {
        self.read(CF_REVIEWS, request_id.as_bytes())
    }

    async fn respond(
        &self,
        request_id: RequestId,
        response: String,
        at: DateTime<Utc>,
    ) -> Result<Option<Review>> {
        let _writer = self.writer.lock().await;
        let Some(mut review) = self.read::<Review>(CF_REVIEWS, request_id.as_bytes())? else {
            return Ok(None);
        };
        review.respond(response, at)?;
        self.write(CF_REVIEWS, request_id.as_bytes(), &review)?;
        Ok(Some(review))
    }
}
