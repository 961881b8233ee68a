//! Outer adapters: CSV codecs and the script replay driving the engine.

pub mod csv;
pub mod replay;
