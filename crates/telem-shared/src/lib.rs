//! Shared types for telemd components.
//!
//! The sample record produced here is the only data contract consumers
//! of the daemon see, so it lives apart from the engine.

pub mod error;
pub mod sample;
pub mod value;

pub use error::TelemError;
pub use sample::{Sample, SampleBody};
pub use value::{PointKey, PointValue, Scalar, KEY_DELIMITER};
