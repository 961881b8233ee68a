use crate::domain::payment::PaymentStatus;
use crate::domain::request::{RequestStatus, ServiceRequest};
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

/// Final state of one scripted request, as printed by the replay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestRow {
    pub request: String,
    pub status: RequestStatus,
    pub customer: u32,
    pub provider: Option<u32>,
    pub quotation: Option<String>,
    pub final_amount: Option<String>,
    pub payment: Option<PaymentStatus>,
}

impl RequestRow {
    pub fn new(label: &str, request: &ServiceRequest, payment: Option<PaymentStatus>) -> Self {
        Self {
            request: label.to_string(),
            status: request.status,
            customer: request.customer_id.0,
            provider: request.provider_id.map(|p| p.0),
            quotation: request.quotation.map(|a| a.to_string()),
            final_amount: request.final_amount.map(|a| a.to_string()),
            payment,
        }
    }
}

/// Writes request rows as CSV with a header line.
pub struct RequestWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> RequestWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_rows(&mut self, rows: impl IntoIterator<Item = RequestRow>) -> Result<()> {
        for row in rows {
            self.writer.serialize(row)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
