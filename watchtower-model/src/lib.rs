//! Core data model definitions shared across watchtower crates.
//!
//! Records are owned by the backing table and never mutated here; the
//! [`Watermark`] is the only value the rest of the system moves forward.
#![allow(missing_docs)]

pub use ::chrono;

pub mod error;
pub mod records;
pub mod stream;
pub mod watermark;

pub use error::{ModelError, Result as ModelResult};
pub use records::{Domain, SocialLink, StreamRecord};
pub use stream::StreamKind;
pub use watermark::Watermark;
