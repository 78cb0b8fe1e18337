//! Metric Deriver
//!
//! Computes the fixed KPI set (CPC, CTR%, CPA, CVR%, ROAS%, ARPPU and
//! operating share) from raw sums. Derivation only reads the raw sum
//! columns, so running it again on its own output overwrites the derived
//! columns with identical values.

use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::safe_math::{safe_divide, safe_divide_expr};
use crate::schema::{ALL_SENTINEL, AVG_RANK, CLICKS, CONVERSIONS, COST, IMPRESSIONS, REVENUE};

pub const CPC: &str = "cpc";
pub const CTR_PCT: &str = "ctr_pct";
pub const CPA: &str = "cpa";
pub const CVR_PCT: &str = "cvr_pct";
pub const ROAS_PCT: &str = "roas_pct";
pub const ARPPU: &str = "arppu";
pub const OPERATING_SHARE_PCT: &str = "operating_share_pct";

/// Distinct campaign count per group.
pub const CAMPAIGNS: &str = "campaigns";
/// Distinct keyword count per group.
pub const KEYWORDS: &str = "keywords";

/// Which rows contribute to the operating-share denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareBasis {
    /// Sum of cost over every row of the frame.
    AllRows,
    /// Sum of cost over rows whose `column` is not the "ALL" sentinel.
    ExcludingTotals(&'static str),
}

/// Add the derived KPI columns to a frame holding raw sums.
///
/// Operating share is computed against the cost of the rows in `frame`
/// itself, so a filtered subset gets a subset-scoped basis.
pub fn derive_metrics(frame: LazyFrame, basis: ShareBasis) -> LazyFrame {
    let total_cost = match basis {
        ShareBasis::AllRows => col(COST).sum(),
        ShareBasis::ExcludingTotals(facet) => col(COST)
            .filter(col(facet).eq(lit(ALL_SENTINEL)).fill_null(lit(false)).not())
            .sum(),
    };

    frame.with_columns([
        safe_divide_expr(col(COST), col(CLICKS)).alias(CPC),
        (safe_divide_expr(col(CLICKS), col(IMPRESSIONS)) * lit(100.0)).alias(CTR_PCT),
        safe_divide_expr(col(COST), col(CONVERSIONS)).alias(CPA),
        (safe_divide_expr(col(CONVERSIONS), col(CLICKS)) * lit(100.0)).alias(CVR_PCT),
        (safe_divide_expr(col(REVENUE), col(COST)) * lit(100.0)).alias(ROAS_PCT),
        safe_divide_expr(col(REVENUE), col(CONVERSIONS)).alias(ARPPU),
        (safe_divide_expr(col(COST), total_cost) * lit(100.0)).alias(OPERATING_SHARE_PCT),
        col(AVG_RANK).round(1).alias(AVG_RANK),
    ])
}

/// Raw sums of one aggregate row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSums {
    pub impressions: f64,
    pub clicks: f64,
    pub cost: f64,
    pub conversions: f64,
    pub revenue: f64,
}

impl RawSums {
    pub fn add(&mut self, other: &RawSums) {
        self.impressions += other.impressions;
        self.clicks += other.clicks;
        self.cost += other.cost;
        self.conversions += other.conversions;
        self.revenue += other.revenue;
    }
}

/// Derived KPIs of one aggregate row. Percentages are on the 0–100 scale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    pub cpc: f64,
    pub ctr_pct: f64,
    pub cpa: f64,
    pub cvr_pct: f64,
    pub roas_pct: f64,
    pub arppu: f64,
    pub operating_share_pct: f64,
}

impl DerivedMetrics {
    /// Scalar derivation for single-row summaries. `share_basis` is the total
    /// cost the row's operating share is measured against.
    pub fn from_sums(sums: &RawSums, share_basis: Option<f64>) -> Self {
        Self {
            cpc: safe_divide(sums.cost, sums.clicks),
            ctr_pct: safe_divide(sums.clicks, sums.impressions) * 100.0,
            cpa: safe_divide(sums.cost, sums.conversions),
            cvr_pct: safe_divide(sums.conversions, sums.clicks) * 100.0,
            roas_pct: safe_divide(sums.revenue, sums.cost) * 100.0,
            arppu: safe_divide(sums.revenue, sums.conversions),
            operating_share_pct: share_basis
                .map(|basis| safe_divide(sums.cost, basis) * 100.0)
                .unwrap_or(0.0),
        }
    }
}
