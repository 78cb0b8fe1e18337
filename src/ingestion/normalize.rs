//! Record Normalizer
//!
//! Turns the raw and index sheets into one typed polars frame:
//! headers resolved to canonical names, measures coerced to numbers, dates
//! parsed, category/region joined from the index, time buckets attached.
//! Bad cells never abort the load; they become nulls plus a [`ParseWarning`].

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{Datelike, Duration, NaiveDate};
use lazy_static::lazy_static;
use polars::prelude::*;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::{ParseWarning, PipelineError, Result};
use crate::ingestion::calendar::{self, WeekLabels};
use crate::ingestion::sheet::RawSheet;
use crate::schema::{
    HeaderAliases, CAMPAIGN, CAMPAIGN_TYPE, CATEGORY, DATE, DAY, INDEX_REQUIRED, MONTH,
    NUMERIC_COLUMNS, PRODUCT_TYPE, RAW_REQUIRED, REGION, TEXT_COLUMNS, WEEK, WEEK_LABEL,
};

/// Days from 0001-01-01 (CE) to 1970-01-01, the polars `Date` epoch.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

lazy_static! {
    static ref SEPARATED_DATE: Regex =
        Regex::new(r"^(\d{4})([-./])(\d{1,2})([-./])(\d{1,2})(?:[ T].*)?$").expect("valid date pattern");
    static ref COMPACT_DATE: Regex = Regex::new(r"^(\d{4})(\d{2})(\d{2})(?:[ T].*)?$").expect("valid date pattern");
    static ref NUMBER_NOISE: Regex = Regex::new(r"[,\s₩$]").expect("valid number pattern");
    static ref SPREADSHEET_SERIAL: Regex = Regex::new(r"^\d{5}(?:\.\d+)?$").expect("valid serial pattern");
}

/// The normalized, immutable data set every view is computed from.
#[derive(Debug, Clone)]
pub struct NormalizedDataset {
    frame: DataFrame,
    warnings: Vec<ParseWarning>,
    unmatched_campaigns: Vec<String>,
    date_span: Option<(NaiveDate, NaiveDate)>,
}

impl NormalizedDataset {
    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn warnings(&self) -> &[ParseWarning] {
        &self.warnings
    }

    /// Campaigns present in the raw sheet but absent from the index.
    pub fn unmatched_campaigns(&self) -> &[String] {
        &self.unmatched_campaigns
    }

    /// First and last parsed date.
    pub fn date_span(&self) -> Option<(NaiveDate, NaiveDate)> {
        self.date_span
    }

    pub fn row_count(&self) -> usize {
        self.frame.height()
    }

    /// Sorted distinct non-null values of a text column, e.g. to offer filter
    /// options or to expand an "ALL" selection.
    pub fn known_values(&self, column: &str) -> Result<Vec<String>> {
        let values: BTreeSet<String> = self
            .frame
            .column(column)?
            .str()?
            .into_iter()
            .flatten()
            .map(str::to_string)
            .collect();
        Ok(values.into_iter().collect())
    }
}

/// Normalize the raw sheet and join the index sheet onto it.
pub fn normalize(raw: &RawSheet, index: &RawSheet, config: &PipelineConfig) -> Result<NormalizedDataset> {
    info!("📥 Normalizing '{}' ({} rows) with index '{}' ({} rows)", raw.name, raw.len(), index.name, index.len());

    let raw_cols = resolve_columns(raw, &config.headers, RAW_REQUIRED)?;
    let index_frame = build_index_frame(index, &config.headers)?;

    let mut warnings = Vec::new();

    // Dates first: week labels depend on the whole set of observed dates.
    let date_idx = raw_cols[DATE];
    let mut dates: Vec<Option<NaiveDate>> = Vec::with_capacity(raw.len());
    for (row_no, row) in raw.rows.iter().enumerate() {
        let cell = row[date_idx].trim();
        match parse_date(cell) {
            Ok(date) => dates.push(date),
            Err(reason) => {
                warnings.push(ParseWarning {
                    row: row_no + 1,
                    column: DATE.to_string(),
                    value: cell.to_string(),
                    reason,
                });
                dates.push(None);
            }
        }
    }
    let labels = WeekLabels::from_dates(dates.iter().flatten());

    let mut columns: Vec<Series> = Vec::new();

    let epoch_days: Vec<Option<i32>> = dates
        .iter()
        .map(|d| d.map(|d| d.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE))
        .collect();
    columns.push(Series::new(DATE, epoch_days).cast(&DataType::Date)?);
    columns.push(Series::new(DAY, map_dates(&dates, calendar::day_key)));
    columns.push(Series::new(WEEK, map_dates(&dates, calendar::week_key)));
    columns.push(Series::new(
        WEEK_LABEL,
        dates.iter().map(|d| d.and_then(|d| labels.label(d))).collect::<Vec<_>>(),
    ));
    columns.push(Series::new(MONTH, map_dates(&dates, calendar::month_key)));

    for name in TEXT_COLUMNS {
        columns.push(Series::new(name, text_column(raw, raw_cols[*name])));
    }

    let product_types = match raw_cols.get(PRODUCT_TYPE) {
        Some(idx) => text_column(raw, *idx),
        None if config.product_type_from_campaign_type => {
            debug!("No product type column; falling back to campaign type");
            text_column(raw, raw_cols[CAMPAIGN_TYPE])
        }
        None => {
            warn!("No product type column and fallback disabled; product type will be empty");
            vec![None; raw.len()]
        }
    };
    columns.push(Series::new(PRODUCT_TYPE, product_types));

    for name in NUMERIC_COLUMNS {
        let idx = raw_cols[*name];
        let mut values = Vec::with_capacity(raw.len());
        for (row_no, row) in raw.rows.iter().enumerate() {
            match coerce_number(&row[idx]) {
                Ok(v) => values.push(v),
                Err(reason) => {
                    warnings.push(ParseWarning {
                        row: row_no + 1,
                        column: name.to_string(),
                        value: row[idx].trim().to_string(),
                        reason,
                    });
                    values.push(None);
                }
            }
        }
        columns.push(Series::new(name, values));
    }

    let raw_frame = DataFrame::new(columns)?;

    let indexed: HashSet<&str> = index_frame
        .column(CAMPAIGN)?
        .str()?
        .into_iter()
        .flatten()
        .collect();
    let unmatched_campaigns: Vec<String> = raw_frame
        .column(CAMPAIGN)?
        .str()?
        .into_iter()
        .flatten()
        .filter(|c| !indexed.contains(c))
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if !unmatched_campaigns.is_empty() {
        warn!(
            "{} campaign(s) not found in index; category/region left empty: {:?}",
            unmatched_campaigns.len(),
            unmatched_campaigns
        );
    }

    let frame = raw_frame
        .lazy()
        .join(
            index_frame.lazy(),
            [col(CAMPAIGN)],
            [col(CAMPAIGN)],
            JoinArgs::new(JoinType::Left),
        )
        .collect()?;

    if !warnings.is_empty() {
        warn!("⚠️ {} cell(s) could not be parsed and were loaded as empty", warnings.len());
        for w in warnings.iter().take(10) {
            debug!("parse warning: {}", w);
        }
    }

    let date_span = dates
        .iter()
        .flatten()
        .fold(None, |span: Option<(NaiveDate, NaiveDate)>, d| match span {
            None => Some((*d, *d)),
            Some((lo, hi)) => Some((lo.min(*d), hi.max(*d))),
        });

    info!("✅ Normalized {} rows ({} weeks observed)", frame.height(), labels.len());

    Ok(NormalizedDataset {
        frame,
        warnings,
        unmatched_campaigns,
        date_span,
    })
}

/// Map required canonical columns to their position in the sheet.
fn resolve_columns(sheet: &RawSheet, aliases: &HeaderAliases, required: &[&str]) -> Result<HashMap<String, usize>> {
    let resolved = aliases.resolve_all(&sheet.headers);
    let missing = HeaderAliases::missing(&resolved, required);
    if !missing.is_empty() {
        return Err(PipelineError::Schema {
            sheet: sheet.name.clone(),
            missing,
        });
    }

    Ok(resolved
        .into_iter()
        .enumerate()
        .filter_map(|(idx, canonical)| canonical.map(|c| (c, idx)))
        .collect())
}

/// Index sheet reduced to one row per campaign name, first seen wins.
fn build_index_frame(index: &RawSheet, aliases: &HeaderAliases) -> Result<DataFrame> {
    let cols = resolve_columns(index, aliases, INDEX_REQUIRED)?;
    let (campaign_idx, category_idx, region_idx) = (cols[CAMPAIGN], cols[CATEGORY], cols[REGION]);

    let mut seen = HashSet::new();
    let mut campaigns = Vec::new();
    let mut categories = Vec::new();
    let mut regions = Vec::new();

    for row in &index.rows {
        let campaign = row[campaign_idx].trim();
        if campaign.is_empty() {
            continue;
        }
        if !seen.insert(campaign.to_string()) {
            warn!("Duplicate index entry for campaign '{}'; keeping the first one", campaign);
            continue;
        }
        campaigns.push(campaign.to_string());
        categories.push(non_empty(&row[category_idx]));
        regions.push(non_empty(&row[region_idx]));
    }

    let frame = DataFrame::new(vec![
        Series::new(CAMPAIGN, campaigns),
        Series::new(CATEGORY, categories),
        Series::new(REGION, regions),
    ])?;
    Ok(frame)
}

fn text_column(sheet: &RawSheet, idx: usize) -> Vec<Option<String>> {
    sheet.rows.iter().map(|row| non_empty(&row[idx])).collect()
}

fn non_empty(cell: &str) -> Option<String> {
    let trimmed = cell.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn map_dates(dates: &[Option<NaiveDate>], key: fn(NaiveDate) -> String) -> Vec<Option<String>> {
    dates.iter().map(|d| d.map(key)).collect()
}

/// Parse a numeric cell: thousands separators, currency signs and one stray
/// leading sign are stripped. Empty cells are `Ok(None)`.
pub fn coerce_number(cell: &str) -> std::result::Result<Option<f64>, String> {
    let cleaned = NUMBER_NOISE.replace_all(cell.trim(), "");
    let cleaned = cleaned
        .strip_prefix(|c: char| c == '+' || c == '-')
        .unwrap_or(&cleaned[..]);
    if cleaned.is_empty() {
        return Ok(None);
    }
    match cleaned.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(Some(v)),
        Ok(_) => Err("not a finite number".to_string()),
        Err(_) => Err("not a number".to_string()),
    }
}

/// Parse a date cell. Accepts `YYYY-MM-DD`, `YYYY.MM.DD`, `YYYY/MM/DD`,
/// `YYYYMMDD` (optionally followed by a time) and spreadsheet day serials.
pub fn parse_date(cell: &str) -> std::result::Result<Option<NaiveDate>, String> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Ok(None);
    }

    if SPREADSHEET_SERIAL.is_match(cell) {
        let serial: f64 = cell.parse().map_err(|_| "not a date".to_string())?;
        let base = NaiveDate::from_ymd_opt(1899, 12, 30).ok_or_else(|| "not a date".to_string())?;
        // The fractional part is the time of day
        return Ok(Some(base + Duration::days(serial.trunc() as i64)));
    }

    // Both separators must be the same character
    let (caps, month, day) = match SEPARATED_DATE.captures(cell) {
        Some(caps) if caps.get(2).map(|m| m.as_str()) == caps.get(4).map(|m| m.as_str()) => (caps, 3, 5),
        Some(_) => return Err("mixed date separators".to_string()),
        None => {
            let caps = COMPACT_DATE
                .captures(cell)
                .ok_or_else(|| "not a date".to_string())?;
            (caps, 2, 3)
        }
    };
    let part = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
    match (part(1), part(month), part(day)) {
        (Some(y), Some(m), Some(d)) => NaiveDate::from_ymd_opt(y as i32, m, d)
            .map(Some)
            .ok_or_else(|| "calendar date out of range".to_string()),
        _ => Err("not a date".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_coerce_number() {
        assert_eq!(coerce_number("1,234"), Ok(Some(1234.0)));
        assert_eq!(coerce_number(" ₩12,000 "), Ok(Some(12000.0)));
        assert_eq!(coerce_number("+15"), Ok(Some(15.0)));
        assert_eq!(coerce_number("-"), Ok(None));
        assert_eq!(coerce_number(""), Ok(None));
        assert_eq!(coerce_number("3.5"), Ok(Some(3.5)));
        assert!(coerce_number("n/a").is_err());
        assert!(coerce_number("inf").is_err());
    }

    #[test]
    fn test_parse_date_formats() {
        assert_eq!(parse_date("2024-01-05"), Ok(Some(d(2024, 1, 5))));
        assert_eq!(parse_date("2024.1.5"), Ok(Some(d(2024, 1, 5))));
        assert_eq!(parse_date("2024/01/05 00:00:00"), Ok(Some(d(2024, 1, 5))));
        assert_eq!(parse_date("20240105"), Ok(Some(d(2024, 1, 5))));
        assert_eq!(parse_date("45296"), Ok(Some(d(2024, 1, 5))));
        assert_eq!(parse_date("45296.5"), Ok(Some(d(2024, 1, 5))));
        assert_eq!(parse_date(""), Ok(None));
        assert!(parse_date("2024-02-30").is_err());
        assert!(parse_date("yesterday").is_err());
    }

    #[test]
    fn test_parse_date_rejects_malformed_digits() {
        assert!(parse_date("202411").is_err());
        assert!(parse_date("2024123").is_err());
        assert!(parse_date("2024-1105").is_err());
        assert!(parse_date("2024-11.05").is_err());
        assert!(parse_date("2024-011-05").is_err());
    }

    fn sheet(name: &str, csv: &str) -> RawSheet {
        RawSheet::from_bytes(name, csv.as_bytes()).unwrap()
    }

    const RAW_HEADER: &str = "date,campaign type,campaign,ad group,keyword,media,impressions,clicks,cost,conversions,average impression rank,conversion revenue,campaign category,campaign country";

    #[test]
    fn test_missing_columns_is_schema_error() {
        let raw = sheet("raw", "date,campaign,clicks\n2024-01-01,A,1\n");
        let index = sheet("index", "campaign,category,country\nA,X,KR\n");
        let err = normalize(&raw, &index, &PipelineConfig::default()).unwrap_err();
        match err {
            PipelineError::Schema { sheet, missing } => {
                assert_eq!(sheet, "raw");
                assert!(missing.contains(&"cost".to_string()));
                assert!(missing.contains(&"region".to_string()));
                assert!(!missing.contains(&"clicks".to_string()));
            }
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn test_bad_cells_become_null_with_warnings() {
        let raw = sheet(
            "raw",
            &format!(
                "{RAW_HEADER}\n\
                 2024-01-01,Search,Brand,G1,shoes,PC,\"1,000\",10,oops,1,2.5,5000,x,y\n\
                 not-a-date,Search,Brand,G1,shoes,PC,10,1,100,0,1,0,x,y\n"
            ),
        );
        let index = sheet("index", "campaign,category,country\nBrand,Apparel,KR\n");
        let data = normalize(&raw, &index, &PipelineConfig::default()).unwrap();

        assert_eq!(data.row_count(), 2);
        assert_eq!(data.warnings().len(), 2);
        let cost: Vec<Option<f64>> = data.frame().column("cost").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(cost, vec![None, Some(100.0)]);
        let impressions: Vec<Option<f64>> =
            data.frame().column("impressions").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(impressions, vec![Some(1000.0), Some(10.0)]);
        let day: Vec<Option<&str>> = data.frame().column(DAY).unwrap().str().unwrap().into_iter().collect();
        assert_eq!(day, vec![Some("2024-01-01"), None]);
    }

    #[test]
    fn test_index_join_keeps_unmatched_and_first_duplicate() {
        let raw = sheet(
            "raw",
            &format!(
                "{RAW_HEADER}\n\
                 2024-01-01,Search, Brand ,G1,k,PC,1,1,1,1,1,1,x,y\n\
                 2024-01-01,Search,Orphan,G1,k,PC,1,1,1,1,1,1,x,y\n"
            ),
        );
        let index = sheet(
            "index",
            "campaign,category,country\nBrand,Apparel,KR\nBrand,Shoes,JP\n",
        );
        let data = normalize(&raw, &index, &PipelineConfig::default()).unwrap();

        assert_eq!(data.row_count(), 2);
        let category: Vec<Option<&str>> = data.frame().column(CATEGORY).unwrap().str().unwrap().into_iter().collect();
        let region: Vec<Option<&str>> = data.frame().column(REGION).unwrap().str().unwrap().into_iter().collect();
        assert_eq!(category, vec![Some("Apparel"), None]);
        assert_eq!(region, vec![Some("KR"), None]);
        assert_eq!(data.unmatched_campaigns(), &["Orphan".to_string()]);
    }

    #[test]
    fn test_product_type_falls_back_to_campaign_type() {
        let raw = sheet(
            "raw",
            &format!("{RAW_HEADER}\n2024-01-01,Shopping,Brand,G1,k,PC,1,1,1,1,1,1,x,y\n"),
        );
        let index = sheet("index", "campaign,category,country\nBrand,Apparel,KR\n");
        let data = normalize(&raw, &index, &PipelineConfig::default()).unwrap();
        assert_eq!(data.known_values(PRODUCT_TYPE).unwrap(), vec!["Shopping".to_string()]);
    }

    #[test]
    fn test_week_buckets_and_labels() {
        let raw = sheet(
            "raw",
            &format!(
                "{RAW_HEADER}\n\
                 2024-01-03,S,A,G,k,PC,1,1,1,1,1,1,x,y\n\
                 2024-01-05,S,A,G,k,PC,1,1,1,1,1,1,x,y\n\
                 2024-02-01,S,A,G,k,PC,1,1,1,1,1,1,x,y\n"
            ),
        );
        let index = sheet("index", "campaign,category,country\nA,C,KR\n");
        let data = normalize(&raw, &index, &PipelineConfig::default()).unwrap();

        let week: Vec<Option<&str>> = data.frame().column(WEEK).unwrap().str().unwrap().into_iter().collect();
        assert_eq!(week, vec![Some("2024-01-01"), Some("2024-01-01"), Some("2024-01-29")]);
        let label: Vec<Option<&str>> = data.frame().column(WEEK_LABEL).unwrap().str().unwrap().into_iter().collect();
        assert_eq!(label[0], Some("W1 (2024.01.03~2024.01.05)"));
        let month: Vec<Option<&str>> = data.frame().column(MONTH).unwrap().str().unwrap().into_iter().collect();
        assert_eq!(month, vec![Some("2024-01"), Some("2024-01"), Some("2024-02")]);
        assert_eq!(data.date_span(), Some((d(2024, 1, 3), d(2024, 2, 1))));
    }
}
