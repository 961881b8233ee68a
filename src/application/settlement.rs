use crate::domain::ids::{PaymentId, RequestId};
use crate::domain::payment::{GatewayCallback, Payment, PaymentStatus, SettlementOrder};
use crate::domain::ports::{PaymentGatewayRef, PaymentStoreRef, RequestStoreRef, SettleOutcome};
use crate::domain::request::RequestStatus;
use crate::error::{DispatchError, Result};
use chrono::Utc;

/// Drives payment attempts for completed requests and guarantees that at
/// most one of them ever succeeds per request.
#[derive(Clone)]
pub struct SettlementCoordinator {
    requests: RequestStoreRef,
    payments: PaymentStoreRef,
    gateway: PaymentGatewayRef,
    currency: String,
}

impl SettlementCoordinator {
    pub fn new(
        requests: RequestStoreRef,
        payments: PaymentStoreRef,
        gateway: PaymentGatewayRef,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            requests,
            payments,
            gateway,
            currency: currency.into(),
        }
    }

    /// Opens a payment attempt for a completed request and returns the
    /// gateway order to pay against.
    ///
    /// An attempt that is still pending is handed back instead of opening a
    /// second one. A settled request yields [`DispatchError::DuplicateSettlement`];
    /// one whose settlement was refunded yields
    /// [`DispatchError::InvalidPaymentState`] and is never settled again.
    /// If the gateway cannot create an order, the attempt is stored as failed
    /// and the error returned; the request itself is left as it is.
    pub async fn initiate(&self, request_id: RequestId) -> Result<SettlementOrder> {
        let request = self
            .requests
            .get(request_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("request", request_id))?;

        if request.status != RequestStatus::Completed {
            return Err(DispatchError::ValidationError(format!(
                "Request {} is {}; only completed requests can be settled",
                request_id, request.status
            )));
        }
        let provider_id = request.provider_id.ok_or_else(|| {
            DispatchError::Invariant(format!("completed request {request_id} has no provider"))
        })?;
        let amount = request.settlement_amount().ok_or_else(|| {
            DispatchError::ValidationError(format!("Request {request_id} has no amount to settle"))
        })?;

        if let Some(existing) = self.payments.settled(request_id).await? {
            return Err(DispatchError::DuplicateSettlement {
                existing: Box::new(existing),
            });
        }
        let attempts = self.payments.for_request(request_id).await?;
        if let Some(refunded) = attempts.iter().find(|p| p.status == PaymentStatus::Refunded) {
            return Err(DispatchError::InvalidPaymentState {
                payment_id: refunded.id,
                status: refunded.status,
                expected: PaymentStatus::Success,
            });
        }
        if let Some(open) = attempts
            .into_iter()
            .rev()
            .find(|p| p.status == PaymentStatus::Pending && p.gateway_order_id.is_some())
            && let Some(order_id) = open.gateway_order_id
        {
            return Ok(SettlementOrder {
                payment_id: open.id,
                order_id,
                amount: open.amount,
                currency: open.currency,
            });
        }

        let now = Utc::now();
        let mut payment = Payment::pending(
            request_id,
            request.customer_id,
            provider_id,
            amount,
            self.currency.as_str(),
            now,
        );

        let receipt = format!("request_{request_id}");
        let order = match self
            .gateway
            .create_order(amount, &self.currency, &receipt)
            .await
        {
            Ok(order) => order,
            Err(e) => {
                tracing::warn!(%request_id, payment_id = %payment.id, error = %e, "Gateway order creation failed");
                payment.mark_failed(e.to_string(), now)?;
                self.payments.insert(payment).await?;
                return Err(e);
            }
        };

        payment.gateway_order_id = Some(order.order_id.clone());
        let settlement = SettlementOrder {
            payment_id: payment.id,
            order_id: order.order_id,
            amount,
            currency: order.currency,
        };
        self.payments.insert(payment).await?;

        tracing::info!(
            %request_id,
            payment_id = %settlement.payment_id,
            order_id = %settlement.order_id,
            %amount,
            "Settlement initiated"
        );
        Ok(settlement)
    }

    /// Checks a gateway callback and, if authentic, settles the attempt.
    ///
    /// A callback that fails verification marks a pending attempt failed and
    /// yields [`DispatchError::GatewayVerificationFailed`]. A verified callback
    /// for a request that is already settled leaves the settled payment
    /// untouched and yields [`DispatchError::DuplicateSettlement`].
    pub async fn verify(&self, payment_id: PaymentId, callback: &GatewayCallback) -> Result<Payment> {
        let payment = self
            .payments
            .get(payment_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("payment", payment_id))?;

        let order_matches = payment.gateway_order_id.as_deref() == Some(callback.order_id.as_str());
        let authentic = order_matches && self.gateway.verify_signature(callback).await?;
        if !authentic {
            tracing::debug!(%payment_id, order_matches, "Gateway callback failed verification");
            if payment.status == PaymentStatus::Pending {
                self.payments
                    .mark_failed(payment_id, "signature verification failed".to_string(), Utc::now())
                    .await?;
            }
            return Err(DispatchError::GatewayVerificationFailed { payment_id });
        }

        match self
            .payments
            .settle(payment_id, callback.gateway_payment_id.clone(), Utc::now())
            .await?
        {
            SettleOutcome::Settled(settled) => {
                tracing::info!(
                    request_id = %settled.request_id,
                    %payment_id,
                    amount = %settled.amount,
                    "Payment settled"
                );
                Ok(settled)
            }
            SettleOutcome::Duplicate(existing) => {
                tracing::warn!(
                    request_id = %existing.request_id,
                    %payment_id,
                    settled_by = %existing.id,
                    "Duplicate settlement rejected"
                );
                if existing.id != payment_id && payment.status == PaymentStatus::Pending {
                    self.payments
                        .mark_failed(payment_id, "request already settled".to_string(), Utc::now())
                        .await?;
                }
                Err(DispatchError::DuplicateSettlement {
                    existing: Box::new(existing),
                })
            }
            SettleOutcome::Refunded(refunded) => {
                tracing::warn!(
                    request_id = %refunded.request_id,
                    %payment_id,
                    refunded = %refunded.id,
                    "Settlement after refund rejected"
                );
                if payment.status == PaymentStatus::Pending {
                    self.payments
                        .mark_failed(payment_id, "request settlement was refunded".to_string(), Utc::now())
                        .await?;
                }
                Err(DispatchError::InvalidPaymentState {
                    payment_id: refunded.id,
                    status: refunded.status,
                    expected: PaymentStatus::Success,
                })
            }
        }
    }

    /// Returns a successful payment to the customer. This is the only way a
    /// settled payment changes again.
    pub async fn refund(&self, payment_id: PaymentId, reason: &str) -> Result<Payment> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(DispatchError::ValidationError(
                "Refund reason is required".to_string(),
            ));
        }
        let payment = self
            .payments
            .get(payment_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("payment", payment_id))?;
        if payment.status != PaymentStatus::Success {
            return Err(DispatchError::InvalidPaymentState {
                payment_id,
                status: payment.status,
                expected: PaymentStatus::Success,
            });
        }
        let gateway_payment_id = payment.gateway_payment_id.as_deref().ok_or_else(|| {
            DispatchError::Invariant(format!("settled payment {payment_id} has no gateway reference"))
        })?;

        let refund_id = self.gateway.refund(gateway_payment_id, payment.amount).await?;
        let refunded = self
            .payments
            .refund(payment_id, refund_id, reason.to_string(), Utc::now())
            .await?;
        tracing::info!(request_id = %refunded.request_id, %payment_id, "Payment refunded");
        Ok(refunded)
    }

    pub async fn payment(&self, payment_id: PaymentId) -> Result<Option<Payment>> {
        self.payments.get(payment_id).await
    }

    pub async fn payments_for_request(&self, request_id: RequestId) -> Result<Vec<Payment>> {
        self.payments.for_request(request_id).await
    }

    pub async fn settled_payment(&self, request_id: RequestId) -> Result<Option<Payment>> {
        self.payments.settled(request_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::actor::UserId;
    use crate::domain::geo::GeoPoint;
    use crate::domain::money::Amount;
    use crate::domain::ports::RequestStore;
    use crate::domain::request::{IssueCategory, RequestDetails, ServiceRequest};
    use crate::infrastructure::gateway::HmacGateway;
    use crate::infrastructure::in_memory::{InMemoryPaymentStore, InMemoryRequestStore};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    struct Fixture {
        settlement: SettlementCoordinator,
        gateway: HmacGateway,
        request_id: RequestId,
    }

    async fn completed(quotation: Option<Amount>) -> Fixture {
        let requests = Arc::new(InMemoryRequestStore::new());
        let details = RequestDetails::new(
            IssueCategory::Engine,
            GeoPoint::new(17.38, 78.48).unwrap(),
            "Banjara Hills",
        );
        let mut request =
            ServiceRequest::new(RequestId::new(), UserId(1), details, 10.0, Utc::now());
        request.assign(UserId(10), Utc::now());
        request.status = RequestStatus::Completed;
        request.quotation = quotation;
        let request_id = request.id;
        requests.insert(request).await.unwrap();

        let gateway = HmacGateway::new(b"test-secret".to_vec()).unwrap();
        let settlement = SettlementCoordinator::new(
            requests,
            Arc::new(InMemoryPaymentStore::new()),
            Arc::new(gateway.clone()),
            "INR",
        );
        Fixture {
            settlement,
            gateway,
            request_id,
        }
    }

    fn amount(v: rust_decimal::Decimal) -> Option<Amount> {
        Some(Amount::new(v).unwrap())
    }

    #[tokio::test]
    async fn test_verified_callback_settles_once() {
        let f = completed(amount(dec!(800))).await;
        let order = f.settlement.initiate(f.request_id).await.unwrap();
        let callback = f.gateway.simulate_callback(&order.order_id).unwrap();

        let paid = f.settlement.verify(order.payment_id, &callback).await.unwrap();
        assert_eq!(paid.status, PaymentStatus::Success);
        assert_eq!(paid.amount.value(), dec!(800));

        let replay = f.settlement.verify(order.payment_id, &callback).await.unwrap_err();
        match replay {
            DispatchError::DuplicateSettlement { existing } => assert_eq!(*existing, paid),
            other => panic!("expected duplicate settlement, got {other:?}"),
        }
        assert_eq!(
            f.settlement.settled_payment(f.request_id).await.unwrap(),
            Some(paid)
        );
    }

    #[tokio::test]
    async fn test_pending_attempt_is_reused() {
        let f = completed(amount(dec!(300))).await;
        let first = f.settlement.initiate(f.request_id).await.unwrap();
        let second = f.settlement.initiate(f.request_id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(
            f.settlement.payments_for_request(f.request_id).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_forged_callback_fails_attempt_and_allows_retry() {
        let f = completed(amount(dec!(450))).await;
        let order = f.settlement.initiate(f.request_id).await.unwrap();
        let forged = GatewayCallback {
            order_id: order.order_id.clone(),
            gateway_payment_id: "pay_forged".to_string(),
            signature: "00".repeat(32),
        };

        let err = f.settlement.verify(order.payment_id, &forged).await.unwrap_err();
        assert!(matches!(err, DispatchError::GatewayVerificationFailed { .. }));

        let retry = f.settlement.initiate(f.request_id).await.unwrap();
        assert_ne!(retry.payment_id, order.payment_id);
        let callback = f.gateway.simulate_callback(&retry.order_id).unwrap();
        f.settlement.verify(retry.payment_id, &callback).await.unwrap();

        let attempts = f.settlement.payments_for_request(f.request_id).await.unwrap();
        let statuses: Vec<PaymentStatus> = attempts.iter().map(|p| p.status).collect();
        assert!(statuses.contains(&PaymentStatus::Failed));
        assert_eq!(
            statuses.iter().filter(|s| **s == PaymentStatus::Success).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_callback_for_another_order_is_rejected() {
        let f = completed(amount(dec!(450))).await;
        let order = f.settlement.initiate(f.request_id).await.unwrap();
        let foreign = f.gateway.simulate_callback("order_somebody_else").unwrap();
        assert!(matches!(
            f.settlement.verify(order.payment_id, &foreign).await,
            Err(DispatchError::GatewayVerificationFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_settled_request_cannot_initiate_again() {
        let f = completed(amount(dec!(200))).await;
        let order = f.settlement.initiate(f.request_id).await.unwrap();
        let callback = f.gateway.simulate_callback(&order.order_id).unwrap();
        f.settlement.verify(order.payment_id, &callback).await.unwrap();

        assert!(matches!(
            f.settlement.initiate(f.request_id).await,
            Err(DispatchError::DuplicateSettlement { .. })
        ));
    }

    #[tokio::test]
    async fn test_refund_only_from_success() {
        let f = completed(amount(dec!(200))).await;
        let order = f.settlement.initiate(f.request_id).await.unwrap();

        assert!(matches!(
            f.settlement.refund(order.payment_id, "customer complaint").await,
            Err(DispatchError::InvalidPaymentState { .. })
        ));

        let callback = f.gateway.simulate_callback(&order.order_id).unwrap();
        f.settlement.verify(order.payment_id, &callback).await.unwrap();
        let refunded = f
            .settlement
            .refund(order.payment_id, "customer complaint")
            .await
            .unwrap();
        assert_eq!(refunded.status, PaymentStatus::Refunded);
        assert!(refunded.gateway_refund_id.unwrap().starts_with("rfnd_"));

        assert!(matches!(
            f.settlement.refund(order.payment_id, "again").await,
            Err(DispatchError::InvalidPaymentState { .. })
        ));
    }

    #[tokio::test]
    async fn test_nothing_to_settle_without_amount() {
        let f = completed(None).await;
        assert!(matches!(
            f.settlement.initiate(f.request_id).await,
            Err(DispatchError::ValidationError(_))
        ));
    }
}
