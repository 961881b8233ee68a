use crate::error::{DispatchError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

/// One scripted step against the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptOp {
    Create,
    Broadcast,
    Claim,
    Quote,
    Reject,
    Travel,
    Start,
    Complete,
    Cancel,
    /// Open (or reuse) a settlement and deliver a genuine gateway callback.
    Pay,
    /// Deliver a callback with a bad signature.
    Forge,
    Refund,
    Message,
    Read,
    Review,
    Respond,
}

/// A row of `op,request,actor,target,lat,lng,amount,rating,text[,issue]`.
///
/// `request` is a free-form label; which other columns matter depends on
/// the op. Empty cells read as absent, and the trailing `issue` column may
/// be left out entirely.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScriptEvent {
    pub op: ScriptOp,
    pub request: String,
    pub actor: Option<u32>,
    pub target: Option<u32>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub amount: Option<Decimal>,
    pub rating: Option<u8>,
    pub text: Option<String>,
    pub issue: Option<String>,
}

impl ScriptEvent {
    pub fn actor(&self) -> Result<u32> {
        self.actor.ok_or_else(|| self.missing("actor"))
    }

    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }

    pub fn missing(&self, column: &str) -> DispatchError {
        DispatchError::ValidationError(format!(
            "{:?} on {:?} requires the {column} column",
            self.op, self.request
        ))
    }
}

/// Reads scripted events from a CSV source.
///
/// This reader wraps `csv::Reader` and provides an iterator over
/// `Result<ScriptEvent>`. It trims whitespace and tolerates short rows.
pub struct EventReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> EventReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily reads and deserializes events, one per row.
    pub fn events(self) -> impl Iterator<Item = Result<ScriptEvent>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(DispatchError::from))
    }
}
