use super::actor::UserId;
use super::ids::{PaymentId, RequestId};
use super::money::Amount;
use crate::error::{DispatchError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
    Refunded,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        };
        f.write_str(name)
    }
}

/// One settlement attempt for a completed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub request_id: RequestId,
    pub customer_id: UserId,
    pub provider_id: UserId,
    pub amount: Amount,
    pub currency: String,
    pub status: PaymentStatus,
    pub gateway_order_id: Option<String>,
    pub gateway_payment_id: Option<String>,
    pub gateway_refund_id: Option<String>,
    pub failure_reason: Option<String>,
    pub refund_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl Payment {
    pub fn pending(
        request_id: RequestId,
        customer_id: UserId,
        provider_id: UserId,
        amount: Amount,
        currency: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PaymentId::new(),
            request_id,
            customer_id,
            provider_id,
            amount,
            currency: currency.into(),
            status: PaymentStatus::Pending,
            gateway_order_id: None,
            gateway_payment_id: None,
            gateway_refund_id: None,
            failure_reason: None,
            refund_reason: None,
            created_at: now,
            updated_at: now,
            settled_at: None,
            refunded_at: None,
        }
    }

    fn expect_status(&self, expected: PaymentStatus) -> Result<()> {
        if self.status == expected {
            Ok(())
        } else {
            Err(DispatchError::InvalidPaymentState {
                payment_id: self.id,
                status: self.status,
                expected,
            })
        }
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        self.expect_status(PaymentStatus::Pending)?;
        self.status = PaymentStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.updated_at = now;
        Ok(())
    }

    /// Only a pending attempt can settle; the store additionally checks that
    /// no other attempt has already settled the same request.
    pub fn mark_success(
        &mut self,
        gateway_payment_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.expect_status(PaymentStatus::Pending)?;
        self.status = PaymentStatus::Success;
        self.gateway_payment_id = Some(gateway_payment_id.into());
        self.settled_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_refunded(
        &mut self,
        gateway_refund_id: impl Into<String>,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.expect_status(PaymentStatus::Success)?;
        self.status = PaymentStatus::Refunded;
        self.gateway_refund_id = Some(gateway_refund_id.into());
        self.refund_reason = Some(reason.into());
        self.refunded_at = Some(now);
        self.updated_at = now;
        Ok(())
    }
}

/// An order opened with the payment gateway for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub order_id: String,
    pub amount: Amount,
    pub currency: String,
}

/// What the gateway reports back after the customer pays. Nothing in it is
/// trusted until the signature is verified against the order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayCallback {
    pub order_id: String,
    pub gateway_payment_id: String,
    pub signature: String,
}

/// Returned by `initiate_settlement`: the attempt plus the order the client
/// must pay against.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettlementOrder {
    pub payment_id: PaymentId,
    pub order_id: String,
    pub amount: Amount,
    pub currency: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn payment() -> Payment {
        Payment::pending(
            RequestId::new(),
            UserId(1),
            UserId(10),
            Amount::new(dec!(750)).unwrap(),
            "INR",
            Utc::now(),
        )
    }

    #[test]
    fn test_success_then_refund() {
        let mut p = payment();
        p.mark_success("pay_1", Utc::now()).unwrap();
        assert_eq!(p.status, PaymentStatus::Success);
        assert!(p.settled_at.is_some());

        p.mark_refunded("rfnd_1", "duplicate charge", Utc::now())
            .unwrap();
        assert_eq!(p.status, PaymentStatus::Refunded);
        assert_eq!(p.refund_reason.as_deref(), Some("duplicate charge"));
    }

    #[test]
    fn test_refund_requires_success() {
        let mut p = payment();
        assert!(matches!(
            p.mark_refunded("rfnd_1", "nope", Utc::now()),
            Err(DispatchError::InvalidPaymentState {
                status: PaymentStatus::Pending,
                expected: PaymentStatus::Success,
                ..
            })
        ));
    }

    #[test]
    fn test_failed_attempt_is_final() {
        let mut p = payment();
        p.mark_failed("bad signature", Utc::now()).unwrap();
        assert!(p.mark_success("pay_1", Utc::now()).is_err());
        assert!(p.mark_failed("again", Utc::now()).is_err());
        assert_eq!(p.status, PaymentStatus::Failed);
    }
}
