//! Grouping and filtering value objects.
//!
//! A UI (or the CLI) only ever hands the pipeline a [`FilterSpec`] and a
//! [`DimensionSpec`]; both are plain hashable values so they double as cache
//! keys.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::schema;

/// Values meaning "no restriction" inside a set filter.
const UNRESTRICTED: &[&str] = &[schema::ALL_SENTINEL, "전체"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Day,
    Week,
    Month,
    Category,
    Campaign,
    AdGroup,
    Keyword,
    Region,
    Media,
    CampaignType,
    ProductType,
    PromotionPhase,
}

impl Dimension {
    pub fn column(self) -> &'static str {
        match self {
            Dimension::Day => schema::DAY,
            Dimension::Week => schema::WEEK,
            Dimension::Month => schema::MONTH,
            Dimension::Category => schema::CATEGORY,
            Dimension::Campaign => schema::CAMPAIGN,
            Dimension::AdGroup => schema::AD_GROUP,
            Dimension::Keyword => schema::KEYWORD,
            Dimension::Region => schema::REGION,
            Dimension::Media => schema::MEDIA,
            Dimension::CampaignType => schema::CAMPAIGN_TYPE,
            Dimension::ProductType => schema::PRODUCT_TYPE,
            Dimension::PromotionPhase => schema::PROMOTION_PHASE,
        }
    }

    pub fn is_time(self) -> bool {
        matches!(self, Dimension::Day | Dimension::Week | Dimension::Month)
    }

    /// Categorical dimensions may carry a virtual "ALL" row.
    pub fn is_facet(self) -> bool {
        !self.is_time()
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Dimension::Day => "Day",
            Dimension::Week => "Week",
            Dimension::Month => "Month",
            Dimension::Category => "Category",
            Dimension::Campaign => "Campaign",
            Dimension::AdGroup => "Ad group",
            Dimension::Keyword => "Keyword",
            Dimension::Region => "Region",
            Dimension::Media => "Media",
            Dimension::CampaignType => "Campaign type",
            Dimension::ProductType => "Product type",
            Dimension::PromotionPhase => "Phase",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// Time bucket used for period views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    #[default]
    Day,
    Week,
    Month,
}

impl Granularity {
    pub fn dimension(self) -> Dimension {
        match self {
            Granularity::Day => Dimension::Day,
            Granularity::Week => Dimension::Week,
            Granularity::Month => Dimension::Month,
        }
    }
}

impl FromStr for Granularity {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "day" | "daily" | "일별" => Ok(Granularity::Day),
            "week" | "weekly" | "주간" => Ok(Granularity::Week),
            "month" | "monthly" | "월별" => Ok(Granularity::Month),
            other => Err(PipelineError::Config(format!("unknown granularity '{}'", other))),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
        };
        f.write_str(name)
    }
}

/// Ordered grouping dimensions, plus the one facet to expand with "ALL".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DimensionSpec {
    pub dimensions: Vec<Dimension>,
    pub total_facet: Option<Dimension>,
}

impl DimensionSpec {
    pub fn new(dimensions: impl Into<Vec<Dimension>>) -> Self {
        Self {
            dimensions: dimensions.into(),
            total_facet: None,
        }
    }

    /// One grand-total row.
    pub fn grand_total() -> Self {
        Self::default()
    }

    pub fn with_total(mut self, facet: Dimension) -> Self {
        self.total_facet = Some(facet);
        self
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for dim in &self.dimensions {
            if !seen.insert(*dim) {
                return Err(PipelineError::Config(format!("dimension '{}' requested twice", dim)));
            }
        }
        if let Some(facet) = self.total_facet {
            if !facet.is_facet() {
                return Err(PipelineError::Config(format!(
                    "'{}' is a time dimension and cannot carry an ALL row",
                    facet
                )));
            }
            if !self.dimensions.contains(&facet) {
                return Err(PipelineError::Config(format!(
                    "total facet '{}' must also be a grouping dimension",
                    facet
                )));
            }
        }
        Ok(())
    }

    /// Columns the group key is built from. The week label rides along with
    /// the week; it never splits a group.
    pub fn key_columns(&self) -> Vec<&'static str> {
        let mut cols = Vec::with_capacity(self.dimensions.len() + 1);
        for dim in &self.dimensions {
            cols.push(dim.column());
            if *dim == Dimension::Week {
                cols.push(schema::WEEK_LABEL);
            }
        }
        cols
    }
}

/// Inclusive date range plus set-membership filters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FilterSpec {
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    pub sets: BTreeMap<Dimension, BTreeSet<String>>,
}

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_date_range(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.date_range = Some((start, end));
        self
    }

    /// Restrict `dim` to `values`. An empty list, or one containing "ALL",
    /// removes the restriction.
    pub fn with_values<I, S>(mut self, dim: Dimension, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: BTreeSet<String> = values
            .into_iter()
            .map(|v| v.into().trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();

        if values.is_empty() || values.iter().any(|v| UNRESTRICTED.contains(&v.as_str())) {
            self.sets.remove(&dim);
        } else {
            self.sets.insert(dim, values);
        }
        self
    }

    /// Values selected for `dim`, `None` when unrestricted.
    pub fn selected(&self, dim: Dimension) -> Option<&BTreeSet<String>> {
        self.sets.get(&dim)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some((start, end)) = self.date_range {
            if start > end {
                return Err(PipelineError::Config(format!(
                    "date range start {} is after end {}",
                    start, end
                )));
            }
        }
        if let Some(dim) = self.sets.keys().find(|d| d.is_time()) {
            return Err(PipelineError::Config(format!(
                "'{}' cannot be filtered by value; use the date range",
                dim
            )));
        }
        Ok(())
    }

    /// Row predicate for this filter, `None` when nothing is restricted.
    ///
    /// Rows with a missing date fall outside every date range, and rows with
    /// a missing value fall outside every set filter on that dimension.
    pub fn predicate(&self) -> Option<Expr> {
        let mut parts = Vec::new();

        if let Some((start, end)) = self.date_range {
            let day = col(schema::DAY);
            parts.push(
                day.clone()
                    .gt_eq(lit(start.format("%Y-%m-%d").to_string()))
                    .and(day.lt_eq(lit(end.format("%Y-%m-%d").to_string()))),
            );
        }

        for (dim, values) in &self.sets {
            let member = values
                .iter()
                .map(|v| col(dim.column()).eq(lit(v.clone())))
                .reduce(|acc, e| acc.or(e));
            if let Some(member) = member {
                parts.push(member);
            }
        }

        parts
            .into_iter()
            .reduce(|acc, e| acc.and(e))
            .map(|p| p.fill_null(lit(false)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_sentinel_means_unrestricted() {
        let filters = FilterSpec::new()
            .with_values(Dimension::Media, ["PC"])
            .with_values(Dimension::Media, ["ALL", "PC"]);
        assert!(filters.selected(Dimension::Media).is_none());

        let filters = FilterSpec::new().with_values(Dimension::Category, Vec::<String>::new());
        assert!(filters.predicate().is_none());
    }

    #[test]
    fn test_total_facet_must_be_categorical_and_grouped() {
        let spec = DimensionSpec::new([Dimension::Day]).with_total(Dimension::Day);
        assert!(spec.validate().is_err());

        let spec = DimensionSpec::new([Dimension::Day]).with_total(Dimension::ProductType);
        assert!(spec.validate().is_err());

        let spec = DimensionSpec::new([Dimension::Day, Dimension::ProductType]).with_total(Dimension::ProductType);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_week_key_carries_label() {
        let spec = DimensionSpec::new([Dimension::Week, Dimension::Media]);
        assert_eq!(spec.key_columns(), vec!["week", "week_label", "media"]);
    }

    #[test]
    fn test_reversed_date_range_rejected() {
        let d1 = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let d0 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert!(FilterSpec::new().with_date_range(d1, d0).validate().is_err());
        assert!(FilterSpec::new().with_date_range(d0, d1).validate().is_ok());
    }

    #[test]
    fn test_granularity_parsing() {
        assert_eq!("Weekly".parse::<Granularity>().unwrap(), Granularity::Week);
        assert_eq!("월별".parse::<Granularity>().unwrap(), Granularity::Month);
        assert!("hourly".parse::<Granularity>().is_err());
    }
}
