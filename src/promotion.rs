//! Before/after comparison around a promotion cutoff date.

use chrono::NaiveDate;
use polars::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::aggregate::{aggregate, AggregateGroup, AggregateTable};
use crate::dimensions::{Dimension, DimensionSpec, FilterSpec};
use crate::error::Result;
use crate::metrics::DerivedMetrics;
use crate::schema::{DAY, PROMOTION_PHASE};

/// Phase labels for `cutoff`. They sort "before" ahead of "from".
pub fn phase_labels(cutoff: NaiveDate) -> (String, String) {
    let day = cutoff.format("%Y-%m-%d");
    (format!("before {}", day), format!("from {}", day))
}

/// Add the promotion phase column. Undated rows get no phase and are dropped.
pub fn with_promotion_phase(frame: &DataFrame, cutoff: NaiveDate) -> Result<DataFrame> {
    let (before, after) = phase_labels(cutoff);
    let cutoff_day = cutoff.format("%Y-%m-%d").to_string();

    let phased = frame
        .clone()
        .lazy()
        .filter(col(DAY).is_not_null())
        .with_column(
            when(col(DAY).lt(lit(cutoff_day)))
                .then(lit(before))
                .otherwise(lit(after))
                .alias(PROMOTION_PHASE),
        )
        .collect()?;
    Ok(phased)
}

/// Phase x product type aggregate with a product type "ALL" row per phase.
pub fn promotion_table(frame: &DataFrame, cutoff: NaiveDate, filters: &FilterSpec) -> Result<AggregateTable> {
    let phased = with_promotion_phase(frame, cutoff)?;
    let dims = DimensionSpec::new([Dimension::PromotionPhase, Dimension::ProductType]).with_total(Dimension::ProductType);
    let table = aggregate(&phased, &dims, filters)?;
    info!("🏷️ Promotion comparison around {}: {} group(s)", cutoff, table.height());
    Ok(table)
}

/// One product type seen on both sides of the cutoff.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseChange {
    pub product_type: Option<String>,
    pub before: Option<DerivedMetrics>,
    pub after: Option<DerivedMetrics>,
    pub cost_before: f64,
    pub cost_after: f64,
    pub revenue_before: f64,
    pub revenue_after: f64,
}

impl PhaseChange {
    /// ROAS change in percentage points, after minus before.
    pub fn roas_change_pts(&self) -> f64 {
        let roas = |m: &Option<DerivedMetrics>| m.map(|m| m.roas_pct).unwrap_or(0.0);
        roas(&self.after) - roas(&self.before)
    }
}

/// Pair each product type's before and after groups, in first-seen order.
pub fn phase_changes(groups: &[AggregateGroup], cutoff: NaiveDate) -> Vec<PhaseChange> {
    let (before_label, after_label) = phase_labels(cutoff);
    let mut changes: Vec<PhaseChange> = Vec::new();

    for group in groups {
        let product_type = group.key(Dimension::ProductType).map(str::to_string);
        let idx = match changes.iter().position(|c| c.product_type == product_type) {
            Some(idx) => idx,
            None => {
                changes.push(PhaseChange {
                    product_type,
                    before: None,
                    after: None,
                    cost_before: 0.0,
                    cost_after: 0.0,
                    revenue_before: 0.0,
                    revenue_after: 0.0,
                });
                changes.len() - 1
            }
        };

        let change = &mut changes[idx];
        match group.key(Dimension::PromotionPhase) {
            Some(phase) if phase == before_label => {
                change.before = Some(group.metrics);
                change.cost_before = group.sums.cost;
                change.revenue_before = group.sums.revenue;
            }
            Some(phase) if phase == after_label => {
                change.after = Some(group.metrics);
                change.cost_after = group.sums.cost;
                change.revenue_after = group.sums.revenue;
            }
            _ => {}
        }
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> DataFrame {
        df! [
            "day" => [Some("2024-03-01"), Some("2024-03-10"), Some("2024-03-15"), None],
            "campaign" => ["A", "A", "B", "B"],
            "keyword" => ["k1", "k1", "k2", "k2"],
            "product_type" => ["Shoes", "Shoes", "Bags", "Bags"],
            "impressions" => [10.0, 10.0, 10.0, 10.0],
            "clicks" => [1.0, 1.0, 1.0, 1.0],
            "cost" => [100.0, 100.0, 200.0, 50.0],
            "conversions" => [1.0, 1.0, 1.0, 1.0],
            "revenue" => [100.0, 300.0, 500.0, 0.0],
            "avg_rank" => [1.0, 1.0, 1.0, 1.0]
        ]
        .unwrap()
    }

    fn cutoff() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
    }

    #[test]
    fn test_cutoff_day_belongs_to_after_phase() {
        let phased = with_promotion_phase(&rows(), cutoff()).unwrap();
        assert_eq!(phased.height(), 3);
        let phase: Vec<Option<&str>> = phased.column(PROMOTION_PHASE).unwrap().str().unwrap().into_iter().collect();
        assert_eq!(
            phase,
            vec![Some("before 2024-03-10"), Some("from 2024-03-10"), Some("from 2024-03-10")]
        );
    }

    #[test]
    fn test_phase_changes_pair_product_types() {
        let table = promotion_table(&rows(), cutoff(), &FilterSpec::new()).unwrap();
        let groups = table.groups().unwrap();
        // before: Shoes, ALL; after: Bags, Shoes, ALL
        assert_eq!(groups.len(), 5);

        let changes = phase_changes(&groups, cutoff());
        let shoes = changes
            .iter()
            .find(|c| c.product_type.as_deref() == Some("Shoes"))
            .unwrap();
        assert_eq!(shoes.cost_before, 100.0);
        assert_eq!(shoes.revenue_after, 300.0);
        assert_eq!(shoes.roas_change_pts(), 200.0);

        let bags = changes
            .iter()
            .find(|c| c.product_type.as_deref() == Some("Bags"))
            .unwrap();
        assert!(bags.before.is_none());
        assert_eq!(bags.roas_change_pts(), 250.0);
    }
}
