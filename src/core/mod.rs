//! Core abstractions shared by the engine, the providers and the CLI

pub mod cache;
pub mod config;
pub mod error;
pub mod log;
pub mod price;

// Re-export main types for cleaner imports
pub use error::{EngineError, ErrorKind, ErrorPayload};
pub use price::{PriceHistoryProvider, PricePoint, PriceSeries};
