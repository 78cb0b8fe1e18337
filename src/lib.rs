//! Advertising campaign KPI aggregation.
//!
//! Load a raw performance sheet and a campaign index sheet, slice the
//! normalized rows by date range and categorical filters, aggregate them by
//! any set of dimensions with re-derived KPIs, and export a multi-sheet
//! report. [`pipeline::CampaignPipeline`] ties it together.

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod dimensions;
pub mod error;
pub mod ingestion;
pub mod metrics;
pub mod pipeline;
pub mod promotion;
pub mod report;
pub mod safe_math;
pub mod schema;
pub mod totals;

pub use aggregate::{aggregate, AggregateGroup, AggregateTable};
pub use config::PipelineConfig;
pub use dimensions::{Dimension, DimensionSpec, FilterSpec, Granularity};
pub use error::{ParseWarning, PipelineError, Result};
pub use pipeline::{CampaignPipeline, Summary};
