//! Virtual-total expansion.
//!
//! The "ALL" group of a facet is computed from a full copy of the rows with
//! the facet overwritten, never by summing segment aggregates, so distinct
//! counts and mean rank come out right for the union.

use polars::prelude::*;
use tracing::debug;

use crate::dimensions::Dimension;
use crate::error::{PipelineError, Result};
use crate::schema::ALL_SENTINEL;

/// Original rows followed by a copy of every row with `facet` set to "ALL".
pub fn expand_with_total(frame: &DataFrame, facet: Dimension) -> Result<DataFrame> {
    if !facet.is_facet() {
        return Err(PipelineError::Config(format!(
            "'{}' is a time dimension and cannot be expanded with a total",
            facet
        )));
    }

    let column = facet.column();
    let totals = frame
        .clone()
        .lazy()
        .with_column(lit(ALL_SENTINEL).alias(column))
        .collect()?;

    let mut expanded = frame.clone();
    expanded.vstack_mut(&totals)?;
    debug!("Expanded '{}' with ALL rows: {} -> {} rows", column, frame.height(), expanded.height());
    Ok(expanded)
}
