mod common;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{ADMIN, CUSTOMER, harness, harness_with_stores};
use roadside_dispatch::application::claim::ClaimResult;
use roadside_dispatch::application::conversation::ConversationBinder;
use roadside_dispatch::application::engine::Stores;
use roadside_dispatch::domain::actor::UserId;
use roadside_dispatch::domain::conversation::{Conversation, Message, MessageKind};
use roadside_dispatch::domain::event::EventKind;
use roadside_dispatch::domain::ids::{ConversationId, RequestId};
use roadside_dispatch::domain::ports::ConversationStore;
use roadside_dispatch::domain::request::{LifecycleEvent, RequestStatus};
use roadside_dispatch::error::{DispatchError, Result};
use roadside_dispatch::infrastructure::in_memory::InMemoryConversationStore;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Behaves like the in-memory store but can be told to fail deactivation.
#[derive(Default)]
struct FlakyConversations {
    inner: InMemoryConversationStore,
    refuse_deactivation: AtomicBool,
}

#[async_trait]
impl ConversationStore for FlakyConversations {
    async fn get_or_insert(&self, candidate: Conversation) -> Result<Conversation> {
        self.inner.get_or_insert(candidate).await
    }

    async fn get(&self, id: ConversationId) -> Result<Option<Conversation>> {
        self.inner.get(id).await
    }

    async fn active_for_request(&self, request_id: RequestId) -> Result<Option<Conversation>> {
        self.inner.active_for_request(request_id).await
    }

    async fn append_message(&self, id: ConversationId, message: Message) -> Result<()> {
        self.inner.append_message(id, message).await
    }

    async fn mark_read(&self, id: ConversationId, reader: UserId, at: DateTime<Utc>) -> Result<usize> {
        self.inner.mark_read(id, reader, at).await
    }

    async fn deactivate_for_request(
        &self,
        request_id: RequestId,
        at: DateTime<Utc>,
    ) -> Result<Option<ConversationId>> {
        if self.refuse_deactivation.load(Ordering::SeqCst) {
            return Err(DispatchError::IoError(std::io::Error::other(
                "conversation store unavailable",
            )));
        }
        self.inner.deactivate_for_request(request_id, at).await
    }
}

#[tokio::test]
async fn test_claim_opens_one_conversation_for_the_pair() {
    let h = harness().await;
    let id = h.assigned_to(10).await;

    let first = h.engine.get_or_create_conversation(id).await.unwrap();
    let second = h.engine.get_or_create_conversation(id).await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(first.customer_id, UserId(CUSTOMER));
    assert_eq!(first.provider_id, UserId(10));
    assert!(first.active);
}

#[tokio::test]
async fn test_concurrent_get_or_create_agrees() {
    let h = harness().await;
    let id = h.assigned_to(10).await;

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let engine = h.engine.clone();
            tokio::spawn(async move { engine.get_or_create_conversation(id).await.unwrap().id })
        })
        .collect();
    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
}

#[tokio::test]
async fn test_no_conversation_before_assignment() {
    let h = harness().await;
    let id = h.pending().await;
    assert!(matches!(
        h.engine.get_or_create_conversation(id).await,
        Err(DispatchError::Invariant(_))
    ));
}

#[tokio::test]
async fn test_messages_unread_counts_and_receipts() {
    let h = harness().await;
    let id = h.assigned_to(10).await;
    let conversation = h.engine.get_or_create_conversation(id).await.unwrap();
    let mut events = h.engine.subscribe();

    h.engine
        .post_message(conversation.id, UserId(CUSTOMER), "Where are you?", MessageKind::Text)
        .await
        .unwrap();
    h.engine
        .post_message(conversation.id, UserId(CUSTOMER), "Blue hatchback", MessageKind::Text)
        .await
        .unwrap();
    h.engine
        .post_message(conversation.id, UserId(10), "Five minutes away", MessageKind::Text)
        .await
        .unwrap();

    let posted = events.recv().await.unwrap();
    assert_eq!(
        posted.kind,
        EventKind::MessagePosted {
            conversation_id: conversation.id
        }
    );
    assert_eq!(posted.recipients, vec![UserId(10)]);

    assert_eq!(h.engine.unread_count(conversation.id, UserId(10)).await.unwrap(), 2);
    assert_eq!(
        h.engine.unread_count(conversation.id, UserId(CUSTOMER)).await.unwrap(),
        1
    );

    assert_eq!(h.engine.mark_read(conversation.id, UserId(10)).await.unwrap(), 2);
    assert_eq!(h.engine.mark_read(conversation.id, UserId(10)).await.unwrap(), 0);
    assert_eq!(h.engine.unread_count(conversation.id, UserId(10)).await.unwrap(), 0);

    let history = h
        .engine
        .list_messages(conversation.id, UserId(ADMIN))
        .await
        .unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].body, "Where are you?");
    assert!(history[0].is_read_by(UserId(10)));
    assert!(!history[2].is_read_by(UserId(CUSTOMER)));
}

#[tokio::test]
async fn test_outsiders_cannot_post_or_read() {
    let h = harness().await;
    let id = h.assigned_to(10).await;
    let conversation = h.engine.get_or_create_conversation(id).await.unwrap();

    assert!(matches!(
        h.engine
            .post_message(conversation.id, UserId(11), "hello", MessageKind::Text)
            .await,
        Err(DispatchError::Unauthorized(_))
    ));
    assert!(matches!(
        h.engine.list_messages(conversation.id, UserId(11)).await,
        Err(DispatchError::Unauthorized(_))
    ));
    assert!(matches!(
        h.engine.mark_read(conversation.id, UserId(11)).await,
        Err(DispatchError::Unauthorized(_))
    ));
    assert!(matches!(
        h.engine
            .post_message(conversation.id, UserId(CUSTOMER), "  ", MessageKind::Text)
            .await,
        Err(DispatchError::ValidationError(_))
    ));
}

#[tokio::test]
async fn test_reject_closes_channel_and_new_provider_gets_fresh_one() {
    let h = harness().await;
    let id = h.assigned_to(10).await;
    let old = h.engine.get_or_create_conversation(id).await.unwrap();

    h.engine
        .transition(id, UserId(10), LifecycleEvent::Reject)
        .await
        .unwrap();
    assert!(matches!(
        h.engine
            .post_message(old.id, UserId(CUSTOMER), "hello?", MessageKind::Text)
            .await,
        Err(DispatchError::ConversationInactive(_))
    ));

    assert!(h.engine.claim(id, UserId(11)).await.unwrap().is_success());
    let fresh = h.engine.get_or_create_conversation(id).await.unwrap();
    assert_ne!(fresh.id, old.id);
    assert_eq!(fresh.provider_id, UserId(11));
    assert!(fresh.messages.is_empty());
}

#[tokio::test]
async fn test_cancel_closes_channel() {
    let h = harness().await;
    let id = h.assigned_to(10).await;
    let conversation = h.engine.get_or_create_conversation(id).await.unwrap();

    h.engine
        .transition(
            id,
            UserId(CUSTOMER),
            LifecycleEvent::Cancel {
                reason: "towed away".to_string(),
            },
        )
        .await
        .unwrap();

    assert!(matches!(
        h.engine
            .post_message(conversation.id, UserId(10), "on my way", MessageKind::Text)
            .await,
        Err(DispatchError::ConversationInactive(_))
    ));
    // History stays readable.
    assert!(
        h.engine
            .list_messages(conversation.id, UserId(CUSTOMER))
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_late_bind_from_replaced_provider_leaves_live_channel() {
    let stores = Stores::in_memory();
    let h = harness_with_stores(stores.clone()).await;
    // Stands in for a claim whose bind runs after the request has moved on.
    let late = ConversationBinder::new(stores.requests.clone(), stores.conversations.clone());
    let id = h.pending().await;

    let ClaimResult::Success(first_claim) = h.engine.claim(id, UserId(10)).await.unwrap() else {
        panic!("provider 10 should win an open request");
    };
    h.engine
        .transition(id, UserId(10), LifecycleEvent::Reject)
        .await
        .unwrap();

    // Rejected and not yet re-claimed: no channel may open.
    assert!(matches!(
        late.bind(&first_claim).await,
        Err(DispatchError::StaleRequest(_))
    ));
    assert!(stores.conversations.active_for_request(id).await.unwrap().is_none());

    assert!(h.engine.claim(id, UserId(11)).await.unwrap().is_success());
    let live = h.engine.get_or_create_conversation(id).await.unwrap();
    assert_eq!(live.provider_id, UserId(11));

    assert!(matches!(
        late.bind(&first_claim).await,
        Err(DispatchError::StaleRequest(_))
    ));
    let active = stores
        .conversations
        .active_for_request(id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.id, live.id);
    assert_eq!(active.participants(), [UserId(CUSTOMER), UserId(11)]);
    assert!(
        h.engine
            .post_message(live.id, UserId(11), "On my way", MessageKind::Text)
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn test_cancel_stands_when_conversation_store_fails() {
    let conversations = Arc::new(FlakyConversations::default());
    let stores = Stores {
        conversations: conversations.clone(),
        ..Stores::in_memory()
    };
    let h = harness_with_stores(stores).await;
    let id = h.assigned_to(10).await;
    let conversation = h.engine.get_or_create_conversation(id).await.unwrap();

    conversations.refuse_deactivation.store(true, Ordering::SeqCst);
    let cancelled = h
        .engine
        .transition(
            id,
            UserId(CUSTOMER),
            LifecycleEvent::Cancel {
                reason: "changed plans".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(cancelled.status, RequestStatus::Cancelled);
    assert_eq!(
        h.engine.request(id).await.unwrap().status,
        RequestStatus::Cancelled
    );
    // Only the close failed; the channel is still on record.
    assert!(conversations.get(conversation.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_reject_stands_when_conversation_store_fails() {
    let conversations = Arc::new(FlakyConversations::default());
    let stores = Stores {
        conversations: conversations.clone(),
        ..Stores::in_memory()
    };
    let h = harness_with_stores(stores).await;
    let id = h.assigned_to(10).await;

    conversations.refuse_deactivation.store(true, Ordering::SeqCst);
    let reopened = h
        .engine
        .transition(id, UserId(10), LifecycleEvent::Reject)
        .await
        .unwrap();
    assert_eq!(reopened.status, RequestStatus::Pending);

    // The leftover channel is replaced once someone else takes the job.
    conversations.refuse_deactivation.store(false, Ordering::SeqCst);
    assert!(h.engine.claim(id, UserId(11)).await.unwrap().is_success());
    let fresh = h.engine.get_or_create_conversation(id).await.unwrap();
    assert_eq!(fresh.provider_id, UserId(11));
}
