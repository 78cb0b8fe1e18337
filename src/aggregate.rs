//! Dimension Aggregator
//!
//! Filter, optionally expand one facet with its "ALL" copy, group by the
//! requested dimensions, then re-derive every KPI from the group sums.

use chrono::NaiveDate;
use polars::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::dimensions::{Dimension, DimensionSpec, FilterSpec};
use crate::error::{PipelineError, Result};
use crate::metrics::{
    derive_metrics, DerivedMetrics, RawSums, ShareBasis, ARPPU, CAMPAIGNS, CPA, CPC, CTR_PCT, CVR_PCT, KEYWORDS,
    OPERATING_SHARE_PCT, ROAS_PCT,
};
use crate::schema::{
    ALL_SENTINEL, AVG_RANK, CAMPAIGN, CLICKS, CONVERSIONS, COST, DAY, IMPRESSIONS, KEYWORD, REVENUE, WEEK_LABEL,
};
use crate::totals::expand_with_total;

/// Aggregated view returned by [`aggregate`]. One row per group, sorted by
/// the grouping dimensions.
#[derive(Debug, Clone)]
pub struct AggregateTable {
    spec: DimensionSpec,
    frame: DataFrame,
}

/// One typed row of an [`AggregateTable`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateGroup {
    pub keys: Vec<(Dimension, Option<String>)>,
    pub week_label: Option<String>,
    pub sums: RawSums,
    pub avg_rank: Option<f64>,
    pub campaigns: u64,
    pub keywords: u64,
    pub metrics: DerivedMetrics,
}

impl AggregateGroup {
    pub fn key(&self, dim: Dimension) -> Option<&str> {
        self.keys
            .iter()
            .find(|(d, _)| *d == dim)
            .and_then(|(_, v)| v.as_deref())
    }

    /// True for the synthetic "ALL" row of `facet`.
    pub fn is_total_for(&self, facet: Dimension) -> bool {
        self.key(facet) == Some(ALL_SENTINEL)
    }
}

impl AggregateTable {
    pub fn spec(&self) -> &DimensionSpec {
        &self.spec
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn groups(&self) -> Result<Vec<AggregateGroup>> {
        let n = self.frame.height();

        let mut keys = Vec::with_capacity(self.spec.dimensions.len());
        for dim in &self.spec.dimensions {
            keys.push((*dim, str_values(&self.frame, dim.column())?));
        }
        let week_labels = if self.spec.dimensions.contains(&Dimension::Week) {
            str_values(&self.frame, WEEK_LABEL)?
        } else {
            vec![None; n]
        };

        let impressions = f64_values(&self.frame, IMPRESSIONS)?;
        let clicks = f64_values(&self.frame, CLICKS)?;
        let cost = f64_values(&self.frame, COST)?;
        let conversions = f64_values(&self.frame, CONVERSIONS)?;
        let revenue = f64_values(&self.frame, REVENUE)?;
        let avg_rank = f64_values(&self.frame, AVG_RANK)?;
        let campaigns = f64_values(&self.frame, CAMPAIGNS)?;
        let keywords = f64_values(&self.frame, KEYWORDS)?;
        let cpc = f64_values(&self.frame, CPC)?;
        let ctr = f64_values(&self.frame, CTR_PCT)?;
        let cpa = f64_values(&self.frame, CPA)?;
        let cvr = f64_values(&self.frame, CVR_PCT)?;
        let roas = f64_values(&self.frame, ROAS_PCT)?;
        let arppu = f64_values(&self.frame, ARPPU)?;
        let share = f64_values(&self.frame, OPERATING_SHARE_PCT)?;

        let zero = |v: Option<f64>| v.unwrap_or(0.0);

        Ok((0..n)
            .map(|i| AggregateGroup {
                keys: keys.iter().map(|(dim, values)| (*dim, values[i].clone())).collect(),
                week_label: week_labels[i].clone(),
                sums: RawSums {
                    impressions: zero(impressions[i]),
                    clicks: zero(clicks[i]),
                    cost: zero(cost[i]),
                    conversions: zero(conversions[i]),
                    revenue: zero(revenue[i]),
                },
                avg_rank: avg_rank[i],
                campaigns: zero(campaigns[i]) as u64,
                keywords: zero(keywords[i]) as u64,
                metrics: DerivedMetrics {
                    cpc: zero(cpc[i]),
                    ctr_pct: zero(ctr[i]),
                    cpa: zero(cpa[i]),
                    cvr_pct: zero(cvr[i]),
                    roas_pct: zero(roas[i]),
                    arppu: zero(arppu[i]),
                    operating_share_pct: zero(share[i]),
                },
            })
            .collect())
    }
}

/// Aggregate normalized rows by `dims` after applying `filters`.
///
/// Fails with [`PipelineError::EmptyResult`] when no row survives the filter.
pub fn aggregate(data: &DataFrame, dims: &DimensionSpec, filters: &FilterSpec) -> Result<AggregateTable> {
    dims.validate()?;
    let filtered = filter_rows(data, filters)?;

    let (source, basis) = match dims.total_facet {
        Some(facet) => (
            expand_with_total(&filtered, facet)?,
            ShareBasis::ExcludingTotals(facet.column()),
        ),
        None => (filtered, ShareBasis::AllRows),
    };

    let by_cols: Vec<Expr> = dims.key_columns().into_iter().map(col).collect();
    let grouped = if by_cols.is_empty() {
        source.lazy().select(measure_aggs())
    } else {
        source.lazy().group_by_stable(by_cols).agg(measure_aggs())
    };

    let mut result = derive_metrics(grouped, basis).unique_stable(None, UniqueKeepStrategy::First);

    let sort_keys = sort_exprs(dims);
    if !sort_keys.is_empty() {
        result = result.sort_by_exprs(
            sort_keys,
            SortMultipleOptions::default()
                .with_nulls_last(true)
                .with_maintain_order(true),
        );
    }

    let frame = result.collect()?;
    info!("📊 Aggregated by [{}]: {} group(s)", dims.key_columns().join(", "), frame.height());

    Ok(AggregateTable {
        spec: dims.clone(),
        frame,
    })
}

/// Rows of `data` passing `filters`; [`PipelineError::EmptyResult`] when none do.
///
/// Rows without a parsed day never pass, with or without a date range.
pub fn filter_rows(data: &DataFrame, filters: &FilterSpec) -> Result<DataFrame> {
    filters.validate()?;

    let mut rows = data.clone().lazy();
    if data.schema().contains(DAY) {
        rows = rows.filter(col(DAY).is_not_null());
    }
    if let Some(predicate) = filters.predicate() {
        rows = rows.filter(predicate);
    }
    let filtered = rows.collect()?;
    if filtered.height() == 0 {
        return Err(PipelineError::EmptyResult(format!(
            "{} row(s) loaded, none within the selected range and filters",
            data.height()
        )));
    }
    debug!("Filter kept {} of {} rows", filtered.height(), data.height());
    Ok(filtered)
}

/// First and last day present in `frame`.
pub fn observed_span(frame: &DataFrame) -> Result<Option<(NaiveDate, NaiveDate)>> {
    let days = frame.column(DAY)?.str()?;
    let mut parsed = Vec::with_capacity(days.len());
    for day in days.into_iter().flatten() {
        let date = NaiveDate::parse_from_str(day, "%Y-%m-%d")
            .map_err(|e| PipelineError::Config(format!("bad day key '{}': {}", day, e)))?;
        parsed.push(date);
    }
    Ok(parsed.iter().min().copied().zip(parsed.iter().max().copied()))
}

fn measure_aggs() -> Vec<Expr> {
    let sum = |name: &str| col(name).cast(DataType::Float64).sum().alias(name);
    vec![
        sum(IMPRESSIONS),
        sum(CLICKS),
        sum(COST),
        sum(CONVERSIONS),
        sum(REVENUE),
        col(AVG_RANK).cast(DataType::Float64).mean().alias(AVG_RANK),
        col(CAMPAIGN).drop_nulls().n_unique().cast(DataType::UInt64).alias(CAMPAIGNS),
        col(KEYWORD).drop_nulls().n_unique().cast(DataType::UInt64).alias(KEYWORDS),
    ]
}

/// Ascending by each dimension in order; within the total facet the "ALL"
/// row comes after the real values.
fn sort_exprs(dims: &DimensionSpec) -> Vec<Expr> {
    let mut exprs = Vec::new();
    for dim in &dims.dimensions {
        if dims.total_facet == Some(*dim) {
            exprs.push(col(dim.column()).eq(lit(ALL_SENTINEL)).fill_null(lit(false)));
        }
        exprs.push(col(dim.column()));
    }
    exprs
}

fn str_values(frame: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let series = frame.column(name)?.cast(&DataType::String)?;
    let values = series.str()?.into_iter().map(|v| v.map(str::to_string)).collect();
    Ok(values)
}

fn f64_values(frame: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let series = frame.column(name)?.cast(&DataType::Float64)?;
    let values = series.f64()?.into_iter().collect();
    Ok(values)
}
