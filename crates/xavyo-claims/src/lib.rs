//! Claims bag and claims transformation pipeline.
//!
//! - [`ClaimsBag`]: the typed claims of one journey instance
//! - [`ClaimsDelta`]: ordered claim writes from an adapter or transformation
//! - [`transform`]: the built-in transformation kinds and the pipeline that
//!   runs a technical profile's transformations in declared order

pub mod bag;
pub mod error;
pub mod transform;

pub use bag::{ClaimsBag, ClaimsDelta};
pub use error::TransformationError;
pub use transform::{apply, run_pipeline, TransformContext};
pub use xavyo_policy::{ClaimDataType, ClaimValue};
