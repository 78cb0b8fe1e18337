//! Report assembly
//!
//! Builds every analysis sheet of the exported workbook from the aggregator
//! and the row mapper. The result is plain data; sinks decide how it looks.

use itertools::Itertools;
use serde::Serialize;
use tracing::{info, warn};

use crate::aggregate::{aggregate, filter_rows, observed_span, AggregateGroup};
use crate::config::PipelineConfig;
use crate::dimensions::{Dimension, DimensionSpec, FilterSpec, Granularity};
use crate::error::Result;
use crate::ingestion::NormalizedDataset;
use crate::promotion::{phase_changes, promotion_table};
use crate::report::rows::{
    detail_rows, scale, to_report_rows, CellValue, ColumnCategory, ColumnSpec, Measure, ReportColumn, ReportTable,
    RowLimit, SortDirection,
};

/// Row of the sheet title.
pub const TITLE_ROW: u32 = 0;
/// Row of the first section; one blank row separates it from the title.
pub const FIRST_SECTION_ROW: u32 = 2;

pub const PERIOD_SHEET: &str = "Period";
pub const CHART_SHEET: &str = "Charts";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSection {
    pub subtitle: Option<String>,
    pub table: ReportTable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSheet {
    pub name: String,
    pub title: String,
    pub sections: Vec<ReportSection>,
    pub autofilter: bool,
}

/// Where a section lands on its sheet. Rows are zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionLayout {
    pub subtitle_row: Option<u32>,
    pub header_row: u32,
    pub first_data_row: u32,
    pub row_count: u32,
}

impl SectionLayout {
    /// Last data row, `None` for an empty table.
    pub fn last_data_row(&self) -> Option<u32> {
        (self.row_count > 0).then(|| self.first_data_row + self.row_count - 1)
    }
}

impl ReportSheet {
    pub fn new(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            sections: Vec::new(),
            autofilter: true,
        }
    }

    pub fn section(mut self, subtitle: Option<String>, table: ReportTable) -> Self {
        self.sections.push(ReportSection { subtitle, table });
        self
    }

    pub fn without_autofilter(mut self) -> Self {
        self.autofilter = false;
        self
    }

    /// Sections stack top to bottom with one blank row between them.
    pub fn layout(&self) -> Vec<SectionLayout> {
        let mut row = FIRST_SECTION_ROW;
        let mut layouts = Vec::with_capacity(self.sections.len());
        for section in &self.sections {
            let subtitle_row = section.subtitle.as_ref().map(|_| {
                row += 1;
                row - 1
            });
            let row_count = section.table.len() as u32;
            layouts.push(SectionLayout {
                subtitle_row,
                header_row: row,
                first_data_row: row + 1,
                row_count,
            });
            row += row_count + 2;
        }
        layouts
    }

    /// Widest table on the sheet.
    pub fn width(&self) -> usize {
        self.sections.iter().map(|s| s.table.width()).max().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Line,
    Column,
}

/// One chart drawn from cell ranges of another sheet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSpec {
    pub kind: ChartKind,
    pub title: String,
    pub source_sheet: String,
    pub header_row: u32,
    pub first_row: u32,
    pub last_row: u32,
    pub category_column: u16,
    pub value_columns: Vec<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSheet {
    pub name: String,
    pub charts: Vec<ChartSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkbookReport {
    pub title: String,
    pub sheets: Vec<ReportSheet>,
    pub chart_sheet: Option<ChartSheet>,
}

impl WorkbookReport {
    pub fn sheet(&self, name: &str) -> Option<&ReportSheet> {
        self.sheets.iter().find(|s| s.name == name)
    }
}

fn standard_measures() -> Vec<ReportColumn> {
    [
        Measure::Cost,
        Measure::OperatingSharePct,
        Measure::Revenue,
        Measure::RoasPct,
        Measure::Impressions,
        Measure::Clicks,
        Measure::CtrPct,
        Measure::Conversions,
        Measure::CvrPct,
        Measure::Cpc,
        Measure::Cpa,
    ]
    .into_iter()
    .map(ReportColumn::measure)
    .collect()
}

fn keyed(dims: &[Dimension], measures: Vec<ReportColumn>) -> ColumnSpec {
    let mut columns: Vec<ReportColumn> = dims.iter().map(|d| ReportColumn::key(*d)).collect();
    columns.extend(measures);
    ColumnSpec::new(columns)
}

/// Columns of the period sheet. The chart sheet reads Cost, Revenue and ROAS
/// from columns 1, 2 and 3.
fn period_spec(granularity: Granularity) -> ColumnSpec {
    keyed(
        &[granularity.dimension()],
        [
            Measure::Cost,
            Measure::Revenue,
            Measure::RoasPct,
            Measure::Impressions,
            Measure::Clicks,
            Measure::CtrPct,
            Measure::Conversions,
            Measure::CvrPct,
            Measure::Cpc,
            Measure::Cpa,
        ]
        .into_iter()
        .map(ReportColumn::measure)
        .collect(),
    )
}

const PERIOD_COST_COLUMN: u16 = 1;
const PERIOD_REVENUE_COLUMN: u16 = 2;
const PERIOD_ROAS_COLUMN: u16 = 3;

/// Assembles a [`WorkbookReport`] for one dataset, filter and granularity.
pub struct ReportBuilder<'a> {
    data: &'a NormalizedDataset,
    filters: &'a FilterSpec,
    granularity: Granularity,
    config: &'a PipelineConfig,
}

impl<'a> ReportBuilder<'a> {
    pub fn new(
        data: &'a NormalizedDataset,
        filters: &'a FilterSpec,
        granularity: Granularity,
        config: &'a PipelineConfig,
    ) -> Self {
        Self {
            data,
            filters,
            granularity,
            config,
        }
    }

    pub fn build(&self) -> Result<WorkbookReport> {
        info!("📝 Building report '{}' ({} granularity)", self.config.report_title, self.granularity);

        let mut sheets = vec![self.overview()?];

        let period = self.period()?;
        let chart_sheet = if self.config.include_charts {
            chart_sheet(&period)
        } else {
            None
        };
        sheets.push(period);

        sheets.push(self.breakdown("Campaign Type", "Performance by campaign type", Dimension::CampaignType)?);
        sheets.push(self.breakdown("Region", "Performance by region", Dimension::Region)?);
        sheets.push(self.breakdown("Media", "Performance by media", Dimension::Media)?);
        sheets.push(self.campaigns()?);
        sheets.push(self.categories()?);
        sheets.push(self.by_product("Weekly by Product", "Weekly performance by product type", Dimension::Week)?);
        sheets.push(self.by_product("Daily by Product", "Daily performance by product type", Dimension::Day)?);

        if let Some(sheet) = self.promotion()? {
            sheets.push(sheet);
        }

        sheets.push(self.insights()?);
        sheets.push(self.detail()?);

        info!(
            "✅ Report ready: {}",
            sheets.iter().map(|s| s.name.as_str()).join(", ")
        );

        Ok(WorkbookReport {
            title: self.config.report_title.clone(),
            sheets,
            chart_sheet,
        })
    }

    fn groups(&self, dims: DimensionSpec) -> Result<Vec<AggregateGroup>> {
        aggregate(self.data.frame(), &dims, self.filters)?.groups()
    }

    fn overview(&self) -> Result<ReportSheet> {
        let totals = self.groups(DimensionSpec::grand_total())?;
        let totals_table = to_report_rows(
            &totals,
            &ColumnSpec::new(
                [
                    Measure::Cost,
                    Measure::Revenue,
                    Measure::RoasPct,
                    Measure::Impressions,
                    Measure::Clicks,
                    Measure::CtrPct,
                    Measure::Conversions,
                    Measure::CvrPct,
                    Measure::Cpc,
                    Measure::Cpa,
                    Measure::Arppu,
                    Measure::Campaigns,
                    Measure::Keywords,
                ]
                .into_iter()
                .map(ReportColumn::measure)
                .collect(),
            ),
        );

        let selected = filter_rows(self.data.frame(), self.filters)?;
        let span = match observed_span(&selected)? {
            Some((start, end)) => format!("{} ~ {}", start, end),
            None => "-".to_string(),
        };
        let mut info_table = ReportTable::new(
            vec!["Item".to_string(), "Value".to_string()],
            vec![ColumnCategory::Text, ColumnCategory::Text],
        );
        let text = |s: String| CellValue::Text(s);
        info_table.rows = vec![
            vec![text("Period".into()), text(span)],
            vec![text("Granularity".into()), text(self.granularity.to_string())],
            vec![text("Rows loaded".into()), text(self.data.row_count().to_string())],
            vec![
                text("Campaigns without index entry".into()),
                text(self.data.unmatched_campaigns().len().to_string()),
            ],
            vec![text("Unparsed cells".into()), text(self.data.warnings().len().to_string())],
        ];
        for (dim, values) in &self.filters.sets {
            info_table
                .rows
                .push(vec![text(format!("Filter: {}", dim.display_name())), text(values.iter().join(", "))]);
        }

        Ok(ReportSheet::new("Overview", self.config.report_title.clone())
            .section(Some("Totals".to_string()), totals_table)
            .section(Some("Data".to_string()), info_table)
            .without_autofilter())
    }

    fn period(&self) -> Result<ReportSheet> {
        let groups = self.groups(DimensionSpec::new([self.granularity.dimension()]))?;
        let table = to_report_rows(&groups, &period_spec(self.granularity));
        Ok(ReportSheet::new(PERIOD_SHEET, format!("Performance by {}", self.granularity)).section(None, table))
    }

    fn breakdown(&self, name: &str, title: &str, dim: Dimension) -> Result<ReportSheet> {
        let groups = self.groups(DimensionSpec::new([dim]))?;
        let spec = keyed(&[dim], standard_measures()).sorted_by(Measure::Cost, SortDirection::Descending);
        Ok(ReportSheet::new(name, title).section(None, to_report_rows(&groups, &spec)))
    }

    fn campaigns(&self) -> Result<ReportSheet> {
        let groups = self.groups(DimensionSpec::new([Dimension::Campaign]))?;
        let mut measures = standard_measures();
        measures.push(ReportColumn::measure(Measure::Keywords));
        measures.push(ReportColumn::measure(Measure::AvgRank));
        let spec = keyed(&[Dimension::Campaign], measures).sorted_by(Measure::Cost, SortDirection::Descending);
        Ok(ReportSheet::new("Campaign", "Performance by campaign").section(None, to_report_rows(&groups, &spec)))
    }

    fn categories(&self) -> Result<ReportSheet> {
        let groups = self.groups(DimensionSpec::new([Dimension::Category]))?;
        let spec = keyed(
            &[Dimension::Category],
            [
                Measure::Campaigns,
                Measure::Keywords,
                Measure::Cost,
                Measure::OperatingSharePct,
                Measure::Revenue,
                Measure::RoasPct,
                Measure::Clicks,
                Measure::CtrPct,
                Measure::Conversions,
                Measure::CvrPct,
                Measure::AvgRank,
            ]
            .into_iter()
            .map(ReportColumn::measure)
            .collect(),
        )
        .sorted_by(Measure::Cost, SortDirection::Descending);
        Ok(ReportSheet::new("Category", "Performance by campaign category").section(None, to_report_rows(&groups, &spec)))
    }

    fn by_product(&self, name: &str, title: &str, time: Dimension) -> Result<ReportSheet> {
        let dims = DimensionSpec::new([time, Dimension::ProductType]).with_total(Dimension::ProductType);
        let groups = self.groups(dims)?;
        let spec = keyed(
            &[time, Dimension::ProductType],
            [
                Measure::Cost,
                Measure::OperatingSharePct,
                Measure::Revenue,
                Measure::RoasPct,
                Measure::Clicks,
                Measure::Conversions,
                Measure::CvrPct,
                Measure::Cpa,
            ]
            .into_iter()
            .map(ReportColumn::measure)
            .collect(),
        );
        Ok(ReportSheet::new(name, title).section(None, to_report_rows(&groups, &spec)))
    }

    fn promotion(&self) -> Result<Option<ReportSheet>> {
        let Some(cutoff) = self.config.promotion_cutoff else {
            return Ok(None);
        };

        let table = match promotion_table(self.data.frame(), cutoff, self.filters) {
            Ok(table) => table,
            Err(e) if e.is_empty_result() => {
                warn!("Skipping promotion sheet: {}", e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let groups = table.groups()?;

        let phases = to_report_rows(
            &groups,
            &keyed(
                &[Dimension::PromotionPhase, Dimension::ProductType],
                [
                    Measure::Cost,
                    Measure::Revenue,
                    Measure::RoasPct,
                    Measure::Clicks,
                    Measure::Conversions,
                    Measure::CvrPct,
                    Measure::Cpa,
                ]
                .into_iter()
                .map(ReportColumn::measure)
                .collect(),
            ),
        );

        let mut changes = ReportTable::new(
            [
                "Product type",
                "Cost before",
                "Cost after",
                "Revenue before",
                "Revenue after",
                "ROAS before",
                "ROAS after",
                "ROAS change",
            ]
            .iter()
            .map(|h| h.to_string())
            .collect(),
            vec![
                ColumnCategory::Text,
                ColumnCategory::Currency,
                ColumnCategory::Currency,
                ColumnCategory::Currency,
                ColumnCategory::Currency,
                ColumnCategory::Percentage,
                ColumnCategory::Percentage,
                ColumnCategory::Percentage,
            ],
        );
        let currency = |v: f64| CellValue::Number(scale(ColumnCategory::Currency, v));
        let pct = |v: Option<f64>| match v {
            Some(v) => CellValue::Number(scale(ColumnCategory::Percentage, v)),
            None => CellValue::Blank,
        };
        changes.rows = phase_changes(&groups, cutoff)
            .into_iter()
            .map(|c| {
                vec![
                    c.product_type
                        .clone()
                        .map(CellValue::Text)
                        .unwrap_or(CellValue::Blank),
                    currency(c.cost_before),
                    currency(c.cost_after),
                    currency(c.revenue_before),
                    currency(c.revenue_after),
                    pct(c.before.map(|m| m.roas_pct)),
                    pct(c.after.map(|m| m.roas_pct)),
                    pct(Some(c.roas_change_pts())),
                ]
            })
            .collect();

        Ok(Some(
            ReportSheet::new("Promotion", format!("Before / after {}", cutoff))
                .section(Some("By phase and product type".to_string()), phases)
                .section(Some("Change".to_string()), changes),
        ))
    }

    fn insights(&self) -> Result<ReportSheet> {
        let n = self.config.insights_top_n;
        let spent: Vec<AggregateGroup> = self
            .groups(DimensionSpec::new([Dimension::Campaign]))?
            .into_iter()
            .filter(|g| g.sums.cost > 0.0)
            .collect();

        let ranked = |limit: RowLimit| {
            let spec = keyed(
                &[Dimension::Campaign],
                [Measure::RoasPct, Measure::Cost, Measure::Revenue, Measure::Conversions, Measure::Cpa]
                    .into_iter()
                    .map(ReportColumn::measure)
                    .collect(),
            )
            .limited(limit);
            to_report_rows(&spent, &spec)
        };

        let categories = self.groups(DimensionSpec::new([Dimension::Category]))?;
        let category_spec = keyed(
            &[Dimension::Category],
            [Measure::RoasPct, Measure::Cost, Measure::Revenue, Measure::OperatingSharePct]
                .into_iter()
                .map(ReportColumn::measure)
                .collect(),
        )
        .sorted_by(Measure::RoasPct, SortDirection::Descending);

        Ok(ReportSheet::new("Insights", "Campaign insights")
            .section(
                Some(format!("Top {} campaigns by ROAS", n)),
                ranked(RowLimit::Top(Measure::RoasPct, n)),
            )
            .section(
                Some(format!("Bottom {} campaigns by ROAS", n)),
                ranked(RowLimit::Bottom(Measure::RoasPct, n)),
            )
            .section(
                Some("Categories by ROAS".to_string()),
                to_report_rows(&categories, &category_spec),
            )
            .without_autofilter())
    }

    fn detail(&self) -> Result<ReportSheet> {
        let rows = filter_rows(self.data.frame(), self.filters)?;
        Ok(ReportSheet::new("Detail", "Detail rows").section(None, detail_rows(&rows)?))
    }
}

/// Cost/revenue line chart and ROAS column chart over the period sheet.
fn chart_sheet(period: &ReportSheet) -> Option<ChartSheet> {
    let layout = period.layout().into_iter().next()?;
    let last_row = layout.last_data_row()?;

    let chart = |kind, title: &str, value_columns: Vec<u16>| ChartSpec {
        kind,
        title: title.to_string(),
        source_sheet: period.name.clone(),
        header_row: layout.header_row,
        first_row: layout.first_data_row,
        last_row,
        category_column: 0,
        value_columns,
    };

    Some(ChartSheet {
        name: CHART_SHEET.to_string(),
        charts: vec![
            chart(
                ChartKind::Line,
                "Cost and revenue",
                vec![PERIOD_COST_COLUMN, PERIOD_REVENUE_COLUMN],
            ),
            chart(ChartKind::Column, "ROAS", vec![PERIOD_ROAS_COLUMN]),
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rows: usize) -> ReportTable {
        let mut t = ReportTable::new(vec!["A".to_string()], vec![ColumnCategory::Text]);
        t.rows = vec![vec![CellValue::Blank]; rows];
        t
    }

    #[test]
    fn test_layout_stacks_sections() {
        let sheet = ReportSheet::new("S", "T")
            .section(None, table(3))
            .section(Some("Second".to_string()), table(2));
        let layout = sheet.layout();

        assert_eq!(layout[0].subtitle_row, None);
        assert_eq!(layout[0].header_row, 2);
        assert_eq!(layout[0].first_data_row, 3);
        assert_eq!(layout[0].last_data_row(), Some(5));

        // blank row 6, subtitle 7, header 8
        assert_eq!(layout[1].subtitle_row, Some(7));
        assert_eq!(layout[1].header_row, 8);
        assert_eq!(layout[1].last_data_row(), Some(10));
    }

    #[test]
    fn test_chart_ranges_follow_period_layout() {
        let sheet = ReportSheet::new(PERIOD_SHEET, "T").section(None, table(4));
        let charts = chart_sheet(&sheet).unwrap();
        assert_eq!(charts.charts.len(), 2);
        assert_eq!(charts.charts[0].first_row, 3);
        assert_eq!(charts.charts[0].last_row, 6);
        assert_eq!(charts.charts[1].value_columns, vec![PERIOD_ROAS_COLUMN]);

        let empty = ReportSheet::new(PERIOD_SHEET, "T").section(None, table(0));
        assert!(chart_sheet(&empty).is_none());
    }

    #[test]
    fn test_period_columns_match_chart_columns() {
        let spec = period_spec(Granularity::Month);
        assert_eq!(spec.columns[PERIOD_COST_COLUMN as usize].header, "Cost");
        assert_eq!(spec.columns[PERIOD_REVENUE_COLUMN as usize].header, "Revenue");
        assert_eq!(spec.columns[PERIOD_ROAS_COLUMN as usize].header, "ROAS");
    }
}
