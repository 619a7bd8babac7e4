//! xavyo Core Library
//!
//! Shared types for the xavyo journey engine.
//!
//! # Modules
//!
//! - [`ids`] - Strongly typed identifiers (JourneyId, CorrelationId)
//! - [`error`] - Caller-facing error codes (ErrorCode)
//!
//! # Example
//!
//! ```
//! use xavyo_core::{CorrelationId, ErrorCode, JourneyId};
//!
//! let journey = JourneyId::new();
//! let correlation = CorrelationId::new();
//! assert_ne!(journey.to_string(), correlation.to_string());
//!
//! assert_eq!(ErrorCode::SessionExpired.as_str(), "session_expired");
//! ```

pub mod error;
pub mod ids;

pub use error::{ErrorBody, ErrorCode};
pub use ids::{CorrelationId, JourneyId, ParseIdError};
