mod common;

use common::{ADMIN, CUSTOMER, amount, details, harness};
use roadside_dispatch::application::claim::ClaimResult;
use roadside_dispatch::domain::actor::UserId;
use roadside_dispatch::domain::event::EventKind;
use roadside_dispatch::domain::payment::PaymentStatus;
use roadside_dispatch::domain::request::{LifecycleEvent, RequestStatus};
use roadside_dispatch::error::DispatchError;
use rust_decimal_macros::dec;

#[tokio::test]
async fn test_two_providers_race_then_settle_once() {
    let h = harness().await;
    // Only the two nearest providers are in range.
    for far in [12, 13, 14] {
        h.directory.set_available(UserId(far), false).await.unwrap();
    }
    let mut events = h.engine.subscribe();

    let request = h
        .engine
        .create_request(UserId(CUSTOMER), details())
        .await
        .unwrap();
    assert_eq!(request.status, RequestStatus::Pending);

    let candidates = h.engine.broadcast(request.id).await.unwrap();
    assert_eq!(candidates, vec![UserId(10), UserId(11)]);

    let (a, b) = tokio::join!(
        {
            let engine = h.engine.clone();
            tokio::spawn(async move { engine.claim(request.id, UserId(10)).await })
        },
        {
            let engine = h.engine.clone();
            tokio::spawn(async move { engine.claim(request.id, UserId(11)).await })
        }
    );
    let (a, b) = (a.unwrap().unwrap(), b.unwrap().unwrap());
    let winner = match (&a, &b) {
        (ClaimResult::Success(_), ClaimResult::AlreadyClaimed) => UserId(10),
        (ClaimResult::AlreadyClaimed, ClaimResult::Success(_)) => UserId(11),
        other => panic!("expected exactly one winner, got {other:?}"),
    };
    let loser = if winner == UserId(10) { UserId(11) } else { UserId(10) };

    h.engine
        .set_quotation(request.id, winner, amount(dec!(750)))
        .await
        .unwrap();
    for event in [
        LifecycleEvent::StartTravel,
        LifecycleEvent::StartWork,
        LifecycleEvent::Complete { final_amount: None },
    ] {
        h.engine.transition(request.id, winner, event).await.unwrap();
    }

    let order = h.engine.initiate_settlement(request.id).await.unwrap();
    assert_eq!(order.amount, amount(dec!(750)));
    let callback = h.gateway.simulate_callback(&order.order_id).unwrap();
    let paid = h
        .engine
        .verify_settlement(order.payment_id, &callback)
        .await
        .unwrap();
    assert_eq!(paid.status, PaymentStatus::Success);
    assert_eq!(
        h.engine.request(request.id).await.unwrap().status,
        RequestStatus::Completed
    );

    // Same order, second verified callback.
    let replay = h.gateway.simulate_callback(&order.order_id).unwrap();
    match h.engine.verify_settlement(order.payment_id, &replay).await {
        Err(DispatchError::DuplicateSettlement { existing }) => {
            assert_eq!(*existing, paid);
        }
        other => panic!("expected duplicate settlement, got {other:?}"),
    }
    assert_eq!(
        h.engine.settled_payment(request.id).await.unwrap(),
        Some(paid)
    );

    let mut loser_told = false;
    while let Ok(event) = events.try_recv() {
        if event.kind == EventKind::NoLongerAvailable {
            assert_eq!(event.recipients, vec![loser]);
            loser_told = true;
        }
    }
    assert!(loser_told);
}

#[tokio::test]
async fn test_review_after_completion() {
    let h = harness().await;
    let id = h.completed(10).await;

    assert!(matches!(
        h.engine.submit_review(id, UserId(10), 5, "self review").await,
        Err(DispatchError::Unauthorized(_))
    ));
    assert!(matches!(
        h.engine.submit_review(id, UserId(CUSTOMER), 6, "too many").await,
        Err(DispatchError::ValidationError(_))
    ));

    let review = h
        .engine
        .submit_review(id, UserId(CUSTOMER), 4, "Quick and polite")
        .await
        .unwrap();
    assert_eq!(review.provider_id, UserId(10));
    assert!(matches!(
        h.engine.submit_review(id, UserId(CUSTOMER), 5, "again").await,
        Err(DispatchError::ReviewExists(_))
    ));

    assert!(matches!(
        h.engine.respond_to_review(id, UserId(CUSTOMER), "thanks").await,
        Err(DispatchError::Unauthorized(_))
    ));
    let answered = h
        .engine
        .respond_to_review(id, UserId(ADMIN), "Thanks for the feedback")
        .await
        .unwrap();
    assert_eq!(
        answered.admin_response.as_deref(),
        Some("Thanks for the feedback")
    );
    assert_eq!(h.engine.review(id).await.unwrap(), Some(answered));
}

#[tokio::test]
async fn test_review_before_completion_is_refused() {
    let h = harness().await;
    let id = h.in_progress(10).await;
    assert!(matches!(
        h.engine.submit_review(id, UserId(CUSTOMER), 5, "early").await,
        Err(DispatchError::ValidationError(_))
    ));
}
