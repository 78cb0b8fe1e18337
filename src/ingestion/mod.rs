//! Ingestion - sheet reading and record normalization.

pub mod calendar;
pub mod normalize;
pub mod sheet;

pub use normalize::{normalize, NormalizedDataset};
pub use sheet::RawSheet;
