//! Report Row Mapper
//!
//! Turns aggregate groups into typed, ordered rows. Rounding and scaling
//! happen here and only here; the groups themselves keep full precision.

use std::cmp::Ordering;

use polars::prelude::*;
use serde::Serialize;

use crate::aggregate::AggregateGroup;
use crate::dimensions::Dimension;
use crate::error::Result;
use crate::schema;

/// How a column is scaled on export and formatted by the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnCategory {
    Currency,
    Count,
    /// Stored as a fraction, e.g. 0.25 for 25%.
    Percentage,
    Rank,
    Period,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Measure {
    Impressions,
    Clicks,
    Cost,
    Conversions,
    Revenue,
    AvgRank,
    Campaigns,
    Keywords,
    Cpc,
    CtrPct,
    Cpa,
    CvrPct,
    RoasPct,
    Arppu,
    OperatingSharePct,
}

impl Measure {
    pub fn category(self) -> ColumnCategory {
        match self {
            Measure::Cost | Measure::Revenue | Measure::Cpc | Measure::Cpa | Measure::Arppu => ColumnCategory::Currency,
            Measure::Impressions | Measure::Clicks | Measure::Conversions | Measure::Campaigns | Measure::Keywords => {
                ColumnCategory::Count
            }
            Measure::CtrPct | Measure::CvrPct | Measure::RoasPct | Measure::OperatingSharePct => {
                ColumnCategory::Percentage
            }
            Measure::AvgRank => ColumnCategory::Rank,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Measure::Impressions => "Impressions",
            Measure::Clicks => "Clicks",
            Measure::Cost => "Cost",
            Measure::Conversions => "Conversions",
            Measure::Revenue => "Revenue",
            Measure::AvgRank => "Avg. rank",
            Measure::Campaigns => "Campaigns",
            Measure::Keywords => "Keywords",
            Measure::Cpc => "CPC",
            Measure::CtrPct => "CTR",
            Measure::Cpa => "CPA",
            Measure::CvrPct => "CVR",
            Measure::RoasPct => "ROAS",
            Measure::Arppu => "ARPPU",
            Measure::OperatingSharePct => "Share",
        }
    }

    /// Unscaled value on the group, percentages on the 0-100 scale.
    pub fn value(self, group: &AggregateGroup) -> Option<f64> {
        let v = match self {
            Measure::Impressions => group.sums.impressions,
            Measure::Clicks => group.sums.clicks,
            Measure::Cost => group.sums.cost,
            Measure::Conversions => group.sums.conversions,
            Measure::Revenue => group.sums.revenue,
            Measure::AvgRank => return group.avg_rank,
            Measure::Campaigns => group.campaigns as f64,
            Measure::Keywords => group.keywords as f64,
            Measure::Cpc => group.metrics.cpc,
            Measure::CtrPct => group.metrics.ctr_pct,
            Measure::Cpa => group.metrics.cpa,
            Measure::CvrPct => group.metrics.cvr_pct,
            Measure::RoasPct => group.metrics.roas_pct,
            Measure::Arppu => group.metrics.arppu,
            Measure::OperatingSharePct => group.metrics.operating_share_pct,
        };
        Some(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportField {
    Key(Dimension),
    Measure(Measure),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportColumn {
    pub field: ReportField,
    pub header: String,
}

impl ReportColumn {
    pub fn key(dim: Dimension) -> Self {
        let header = if dim.is_time() { "Period" } else { dim.display_name() };
        Self {
            field: ReportField::Key(dim),
            header: header.to_string(),
        }
    }

    pub fn measure(measure: Measure) -> Self {
        Self {
            field: ReportField::Measure(measure),
            header: measure.label().to_string(),
        }
    }

    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = header.into();
        self
    }

    pub fn category(&self) -> ColumnCategory {
        match self.field {
            ReportField::Key(dim) if dim.is_time() => ColumnCategory::Period,
            ReportField::Key(_) => ColumnCategory::Text,
            ReportField::Measure(m) => m.category(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowLimit {
    /// Keep the `n` rows with the largest value.
    Top(Measure, usize),
    /// Keep the `n` rows with the smallest value.
    Bottom(Measure, usize),
}

/// Columns to emit plus optional ordering and row limit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ColumnSpec {
    pub columns: Vec<ReportColumn>,
    pub sort: Option<(Measure, SortDirection)>,
    pub limit: Option<RowLimit>,
}

impl ColumnSpec {
    pub fn new(columns: Vec<ReportColumn>) -> Self {
        Self {
            columns,
            sort: None,
            limit: None,
        }
    }

    pub fn sorted_by(mut self, measure: Measure, direction: SortDirection) -> Self {
        self.sort = Some((measure, direction));
        self
    }

    pub fn limited(mut self, limit: RowLimit) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Blank,
}

impl CellValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Headers, per-column category and typed rows, ready for a sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportTable {
    pub headers: Vec<String>,
    pub categories: Vec<ColumnCategory>,
    pub rows: Vec<Vec<CellValue>>,
}

impl ReportTable {
    pub fn new(headers: Vec<String>, categories: Vec<ColumnCategory>) -> Self {
        Self {
            headers,
            categories,
            rows: Vec::new(),
        }
    }

    pub fn width(&self) -> usize {
        self.headers.len()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, header: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == header)
    }
}

/// Map `groups` into a [`ReportTable`] following `spec`.
///
/// The limit picks rows first (ties keep input order), then the sort
/// directive reorders them. Both are stable and never touch values.
pub fn to_report_rows(groups: &[AggregateGroup], spec: &ColumnSpec) -> ReportTable {
    let mut selected: Vec<&AggregateGroup> = groups.iter().collect();

    if let Some(limit) = spec.limit {
        let (measure, n, direction) = match limit {
            RowLimit::Top(m, n) => (m, n, SortDirection::Descending),
            RowLimit::Bottom(m, n) => (m, n, SortDirection::Ascending),
        };
        selected.sort_by(|a, b| compare(measure, direction, a, b));
        selected.truncate(n);
    }

    if let Some((measure, direction)) = spec.sort {
        selected.sort_by(|a, b| compare(measure, direction, a, b));
    }

    let mut table = ReportTable::new(
        spec.columns.iter().map(|c| c.header.clone()).collect(),
        spec.columns.iter().map(ReportColumn::category).collect(),
    );
    table.rows = selected
        .into_iter()
        .map(|group| spec.columns.iter().map(|c| cell(group, c)).collect())
        .collect();
    table
}

/// Missing values sort last in either direction.
fn compare(measure: Measure, direction: SortDirection, a: &AggregateGroup, b: &AggregateGroup) -> Ordering {
    match (measure.value(a), measure.value(b)) {
        (Some(x), Some(y)) => {
            let ord = x.partial_cmp(&y).unwrap_or(Ordering::Equal);
            match direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn cell(group: &AggregateGroup, column: &ReportColumn) -> CellValue {
    match column.field {
        ReportField::Key(Dimension::Week) => group
            .week_label
            .clone()
            .or_else(|| group.key(Dimension::Week).map(str::to_string))
            .map(CellValue::Text)
            .unwrap_or(CellValue::Blank),
        ReportField::Key(dim) => group
            .key(dim)
            .map(|v| CellValue::Text(v.to_string()))
            .unwrap_or(CellValue::Blank),
        ReportField::Measure(measure) => measure
            .value(group)
            .map(|v| CellValue::Number(scale(measure.category(), v)))
            .unwrap_or(CellValue::Blank),
    }
}

/// Export scaling for one numeric value.
pub fn scale(category: ColumnCategory, value: f64) -> f64 {
    match category {
        ColumnCategory::Currency | ColumnCategory::Count => value.round(),
        ColumnCategory::Percentage => value / 100.0,
        ColumnCategory::Rank => (value * 10.0).round() / 10.0,
        ColumnCategory::Period | ColumnCategory::Text => value,
    }
}

/// Columns of the detail sheet, in display order.
const DETAIL_COLUMNS: &[(&str, &str, ColumnCategory)] = &[
    (schema::DAY, "Date", ColumnCategory::Period),
    (schema::CAMPAIGN_TYPE, "Campaign type", ColumnCategory::Text),
    (schema::CAMPAIGN, "Campaign", ColumnCategory::Text),
    (schema::AD_GROUP, "Ad group", ColumnCategory::Text),
    (schema::KEYWORD, "Keyword", ColumnCategory::Text),
    (schema::MEDIA, "Media", ColumnCategory::Text),
    (schema::CATEGORY, "Category", ColumnCategory::Text),
    (schema::REGION, "Region", ColumnCategory::Text),
    (schema::PRODUCT_TYPE, "Product type", ColumnCategory::Text),
    (schema::IMPRESSIONS, "Impressions", ColumnCategory::Count),
    (schema::CLICKS, "Clicks", ColumnCategory::Count),
    (schema::COST, "Cost", ColumnCategory::Currency),
    (schema::CONVERSIONS, "Conversions", ColumnCategory::Count),
    (schema::REVENUE, "Revenue", ColumnCategory::Currency),
    (schema::AVG_RANK, "Avg. rank", ColumnCategory::Rank),
];

/// Row-level table of normalized records, for the detail sheet.
pub fn detail_rows(frame: &DataFrame) -> Result<ReportTable> {
    let mut columns: Vec<Vec<CellValue>> = Vec::with_capacity(DETAIL_COLUMNS.len());
    for (name, _, category) in DETAIL_COLUMNS {
        let cells = match category {
            ColumnCategory::Period | ColumnCategory::Text => {
                let series = frame.column(name)?.cast(&DataType::String)?;
                let cells: Vec<CellValue> = series
                    .str()?
                    .into_iter()
                    .map(|v| v.map(|s| CellValue::Text(s.to_string())).unwrap_or(CellValue::Blank))
                    .collect();
                cells
            }
            _ => {
                let series = frame.column(name)?.cast(&DataType::Float64)?;
                let cells: Vec<CellValue> = series
                    .f64()?
                    .into_iter()
                    .map(|v| v.map(|x| CellValue::Number(scale(*category, x))).unwrap_or(CellValue::Blank))
                    .collect();
                cells
            }
        };
        columns.push(cells);
    }

    let mut table = ReportTable::new(
        DETAIL_COLUMNS.iter().map(|(_, header, _)| header.to_string()).collect(),
        DETAIL_COLUMNS.iter().map(|(_, _, category)| *category).collect(),
    );
    table.rows = (0..frame.height())
        .map(|i| columns.iter().map(|col| col[i].clone()).collect())
        .collect();
    Ok(table)
}
