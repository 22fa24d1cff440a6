//! driftsync Conflict - Divergence detection and resolution rules
//!
//! This crate decides; it does not transfer. Given the checksums and
//! timestamps of both replicas it classifies divergence, applies the
//! folder's configured strategy to produce an outcome, and names conflict
//! copies for keep-both resolutions. The sync engine executes the outcomes
//! through its retrying transfer machinery.

pub mod detector;
pub mod error;
pub mod namer;
pub mod strategy;

pub use detector::{ConflictDetector, Divergence, Side};
pub use error::ConflictError;
pub use namer::ConflictNamer;
pub use strategy::{decide, ConflictOutcome};
