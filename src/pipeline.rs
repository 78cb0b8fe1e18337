//! Pipeline facade
//!
//! `CampaignPipeline` is the one entry point a UI or the CLI needs:
//! load the two sheets (memoized on their content), ask for aggregate views,
//! build the workbook report and export it through a sink.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info};

use crate::aggregate::{aggregate, filter_rows, observed_span, AggregateTable};
use crate::cache::{content_key, AggregationCache, DatasetCache};
use crate::config::PipelineConfig;
use crate::dimensions::{DimensionSpec, FilterSpec, Granularity};
use crate::error::{PipelineError, Result};
use crate::ingestion::{normalize, NormalizedDataset, RawSheet};
use crate::metrics::{DerivedMetrics, RawSums};
use crate::report::{export, ReportBuilder, ReportSink, WorkbookReport};

pub struct CampaignPipeline {
    config: PipelineConfig,
    datasets: DatasetCache,
    views: AggregationCache,
}

/// Headline numbers for one filter selection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub date_span: Option<(NaiveDate, NaiveDate)>,
    pub rows: usize,
    pub sums: RawSums,
    pub metrics: DerivedMetrics,
    pub avg_rank: Option<f64>,
    pub campaigns: u64,
    pub keywords: u64,
    pub unmatched_campaigns: usize,
    pub parse_warnings: usize,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some((start, end)) = self.date_span {
            writeln!(f, "Period:       {} ~ {}", start, end)?;
        }
        writeln!(f, "Rows:         {}", self.rows)?;
        writeln!(f, "Campaigns:    {} ({} keywords)", self.campaigns, self.keywords)?;
        writeln!(f, "Cost:         {:.0}", self.sums.cost)?;
        writeln!(f, "Revenue:      {:.0}", self.sums.revenue)?;
        writeln!(f, "ROAS:         {:.1}%", self.metrics.roas_pct)?;
        writeln!(f, "Impressions:  {:.0}", self.sums.impressions)?;
        writeln!(f, "Clicks:       {:.0} (CTR {:.2}%)", self.sums.clicks, self.metrics.ctr_pct)?;
        writeln!(
            f,
            "Conversions:  {:.0} (CVR {:.2}%)",
            self.sums.conversions, self.metrics.cvr_pct
        )?;
        writeln!(f, "CPC / CPA:    {:.0} / {:.0}", self.metrics.cpc, self.metrics.cpa)?;
        if let Some(rank) = self.avg_rank {
            writeln!(f, "Avg. rank:    {:.1}", rank)?;
        }
        if self.unmatched_campaigns > 0 || self.parse_warnings > 0 {
            writeln!(
                f,
                "Warnings:     {} campaign(s) without index entry, {} unparsed cell(s)",
                self.unmatched_campaigns, self.parse_warnings
            )?;
        }
        Ok(())
    }
}

impl CampaignPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            datasets: DatasetCache::new(),
            views: AggregationCache::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Load both sheets from CSV bytes. Re-uploading identical bytes returns
    /// the cached dataset; anything new replaces it and drops cached views.
    pub fn load_bytes(&mut self, raw: &[u8], index: &[u8]) -> Result<Arc<NormalizedDataset>> {
        self.load_named("raw", raw, "index", index)
    }

    pub fn load_csv_files(&mut self, raw_path: impl AsRef<Path>, index_path: impl AsRef<Path>) -> Result<Arc<NormalizedDataset>> {
        let (raw_path, index_path) = (raw_path.as_ref(), index_path.as_ref());
        info!("📂 Loading raw sheet {} and index sheet {}", raw_path.display(), index_path.display());
        let raw = std::fs::read(raw_path)?;
        let index = std::fs::read(index_path)?;
        self.load_named(&sheet_name(raw_path), &raw, &sheet_name(index_path), &index)
    }

    fn load_named(&mut self, raw_name: &str, raw: &[u8], index_name: &str, index: &[u8]) -> Result<Arc<NormalizedDataset>> {
        let key = content_key(&[raw, index]);
        if let Some(data) = self.datasets.get(&key) {
            debug!("Dataset cache hit ({})", &key[..12]);
            return Ok(data);
        }

        let raw_sheet = RawSheet::from_bytes(raw_name, raw)?;
        let index_sheet = RawSheet::from_bytes(index_name, index)?;
        let data = Arc::new(normalize(&raw_sheet, &index_sheet, &self.config)?);

        self.views.clear();
        self.datasets.insert(key, Arc::clone(&data));
        Ok(data)
    }

    /// Drop the loaded dataset and every cached view.
    pub fn invalidate(&mut self) {
        self.datasets.invalidate();
        self.views.clear();
    }

    pub fn dataset(&self) -> Result<Arc<NormalizedDataset>> {
        self.datasets
            .current()
            .ok_or_else(|| PipelineError::Config("no dataset loaded".to_string()))
    }

    /// Aggregate view for one selection, memoized until the next upload.
    pub fn view(&mut self, dims: &DimensionSpec, filters: &FilterSpec) -> Result<Arc<AggregateTable>> {
        if let Some(table) = self.views.get(filters, dims) {
            return Ok(table);
        }
        let data = self.dataset()?;
        let table = Arc::new(aggregate(data.frame(), dims, filters)?);
        self.views.insert(filters.clone(), dims.clone(), Arc::clone(&table));
        Ok(table)
    }

    pub fn period_view(&mut self, granularity: Granularity, filters: &FilterSpec) -> Result<Arc<AggregateTable>> {
        self.view(&DimensionSpec::new([granularity.dimension()]), filters)
    }

    pub fn summary(&mut self, filters: &FilterSpec) -> Result<Summary> {
        let data = self.dataset()?;
        let table = self.view(&DimensionSpec::grand_total(), filters)?;
        let total = table
            .groups()?
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::EmptyResult("grand total produced no row".to_string()))?;

        let rows = filter_rows(data.frame(), filters)?;
        Ok(Summary {
            date_span: observed_span(&rows)?,
            rows: rows.height(),
            sums: total.sums,
            metrics: total.metrics,
            avg_rank: total.avg_rank,
            campaigns: total.campaigns,
            keywords: total.keywords,
            unmatched_campaigns: data.unmatched_campaigns().len(),
            parse_warnings: data.warnings().len(),
        })
    }

    pub fn build_report(&self, filters: &FilterSpec, granularity: Granularity) -> Result<WorkbookReport> {
        let data = self.dataset()?;
        ReportBuilder::new(&data, filters, granularity, &self.config).build()
    }

    pub fn export(&self, report: &WorkbookReport, sink: &mut dyn ReportSink) -> Result<()> {
        export(report, sink)
    }
}

fn sheet_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = "date,campaign type,campaign,ad group,keyword,media,impressions,clicks,cost,conversions,average impression rank,conversion revenue,campaign category,campaign country\n\
        2024-01-01,Search,Brand,G1,shoes,PC,100,10,100,1,2,50,,\n\
        2024-01-01,Shopping,Generic,G2,boots,Mobile,200,20,300,3,3,900,,\n";
    const INDEX: &str = "campaign,category,country\nBrand,Apparel,KR\nGeneric,Shoes,KR\n";

    #[test]
    fn test_reload_of_same_bytes_hits_cache() {
        let mut pipeline = CampaignPipeline::new(PipelineConfig::default());
        let first = pipeline.load_bytes(RAW.as_bytes(), INDEX.as_bytes()).unwrap();
        let second = pipeline.load_bytes(RAW.as_bytes(), INDEX.as_bytes()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_views_are_memoized_and_dropped_on_new_upload() {
        let mut pipeline = CampaignPipeline::new(PipelineConfig::default());
        pipeline.load_bytes(RAW.as_bytes(), INDEX.as_bytes()).unwrap();

        let dims = DimensionSpec::new([crate::dimensions::Dimension::Campaign]);
        let a = pipeline.view(&dims, &FilterSpec::new()).unwrap();
        let b = pipeline.view(&dims, &FilterSpec::new()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let other_raw = RAW.replace("300,3,3,900", "400,3,3,900");
        pipeline.load_bytes(other_raw.as_bytes(), INDEX.as_bytes()).unwrap();
        let c = pipeline.view(&dims, &FilterSpec::new()).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_summary_totals() {
        let mut pipeline = CampaignPipeline::new(PipelineConfig::default());
        pipeline.load_bytes(RAW.as_bytes(), INDEX.as_bytes()).unwrap();
        let summary = pipeline.summary(&FilterSpec::new()).unwrap();
        assert_eq!(summary.rows, 2);
        assert_eq!(summary.sums.cost, 400.0);
        assert_eq!(summary.metrics.roas_pct, 237.5);
        assert_eq!(summary.campaigns, 2);
        assert!(summary.to_string().contains("ROAS:         237.5%"));
    }

    #[test]
    fn test_view_without_dataset_is_config_error() {
        let mut pipeline = CampaignPipeline::new(PipelineConfig::default());
        let err = pipeline.view(&DimensionSpec::grand_total(), &FilterSpec::new()).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
