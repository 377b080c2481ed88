//! Utility functions for identifiers and timestamp handling.

mod ids;
pub mod timestamps;

pub use ids::{idempotency_key, service_token};
pub use timestamps::{format_timestamp, iso_timestamp, parse_timestamp, Timestamp, TimestampError};
