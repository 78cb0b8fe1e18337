use campaign_kpi::dimensions::{FilterSpec, Granularity};
use campaign_kpi::pipeline::CampaignPipeline;
use campaign_kpi::report::{CellValue, ColumnCategory, CsvDirSink, XlsxSink};
use campaign_kpi::PipelineConfig;
use chrono::NaiveDate;
use std::fs;

const RAW_CSV: &str = "\
date,campaign type,campaign,ad group,keyword,media,impressions,clicks,cost,conversions,average impression rank,conversion revenue,campaign category,campaign country
2024-02-05,Search,Brand,G1,shoes,PC,1000,50,10000,5,1.5,40000,,
2024-02-06,Search,Brand,G1,boots,Mobile,500,20,5000,1,2.5,10000,,
2024-02-12,Shopping,Generic,G2,shoes,PC,800,40,8000,2,3,12000,,
2024-02-13,Shopping,Sale,G3,sandals,Mobile,200,10,1000,0,2,0,,
2024-03-04,Search,Brand,G1,shoes,PC,900,45,9000,6,1.2,60000,,
";

const INDEX_CSV: &str = "\
campaign,category,country
Brand,Apparel,KR
Generic,Footwear,US
Sale,Footwear,US
";

fn pipeline(config: PipelineConfig) -> CampaignPipeline {
    let mut pipeline = CampaignPipeline::new(config);
    pipeline.load_bytes(RAW_CSV.as_bytes(), INDEX_CSV.as_bytes()).unwrap();
    pipeline
}

fn promo_config() -> PipelineConfig {
    PipelineConfig {
        promotion_cutoff: NaiveDate::from_ymd_opt(2024, 2, 12),
        insights_top_n: 2,
        ..PipelineConfig::default()
    }
}

#[test]
fn test_report_contains_every_sheet() {
    let report = pipeline(promo_config())
        .build_report(&FilterSpec::new(), Granularity::Month)
        .unwrap();

    let names: Vec<&str> = report.sheets.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "Overview",
            "Period",
            "Campaign Type",
            "Region",
            "Media",
            "Campaign",
            "Category",
            "Weekly by Product",
            "Daily by Product",
            "Promotion",
            "Insights",
            "Detail",
        ]
    );
    assert!(report.chart_sheet.is_some());
    assert!(!report.sheet("Overview").unwrap().autofilter);
    assert!(report.sheet("Period").unwrap().autofilter);
}

#[test]
fn test_period_sheet_rows_are_scaled() {
    let report = pipeline(PipelineConfig::default())
        .build_report(&FilterSpec::new(), Granularity::Month)
        .unwrap();
    let table = &report.sheet("Period").unwrap().sections[0].table;

    assert_eq!(table.headers[..4], ["Period", "Cost", "Revenue", "ROAS"]);
    assert_eq!(table.categories[0], ColumnCategory::Period);
    assert_eq!(table.len(), 2);
    assert_eq!(table.rows[0][0], CellValue::Text("2024-02".to_string()));
    assert_eq!(table.rows[0][1], CellValue::Number(24_000.0));
    // 62,000 / 24,000 as a fraction
    let roas = table.rows[0][3].as_number().unwrap();
    assert!((roas - 62_000.0 / 24_000.0).abs() < 1e-12);

    let charts = report.chart_sheet.unwrap();
    assert_eq!(charts.charts[0].first_row, 3);
    assert_eq!(charts.charts[0].last_row, 4);
}

#[test]
fn test_no_promotion_sheet_without_cutoff_and_no_charts_when_disabled() {
    let config = PipelineConfig {
        include_charts: false,
        ..PipelineConfig::default()
    };
    let report = pipeline(config).build_report(&FilterSpec::new(), Granularity::Week).unwrap();
    assert!(report.sheet("Promotion").is_none());
    assert!(report.chart_sheet.is_none());
}

#[test]
fn test_insights_rank_campaigns_by_roas() {
    let report = pipeline(promo_config())
        .build_report(&FilterSpec::new(), Granularity::Day)
        .unwrap();
    let insights = report.sheet("Insights").unwrap();

    let names = |idx: usize| -> Vec<String> {
        insights.sections[idx]
            .table
            .rows
            .iter()
            .filter_map(|r| r[0].as_text().map(str::to_string))
            .collect()
    };
    // ROAS: Brand ~458%, Generic 150%, Sale 0%
    assert_eq!(names(0), vec!["Brand", "Generic"]);
    assert_eq!(names(1), vec!["Sale", "Generic"]);
    assert_eq!(names(2), vec!["Apparel", "Footwear"]);
}

#[test]
fn test_promotion_sheet_splits_on_cutoff() {
    let report = pipeline(promo_config())
        .build_report(&FilterSpec::new(), Granularity::Day)
        .unwrap();
    let promo = report.sheet("Promotion").unwrap();

    let phases: Vec<String> = promo.sections[0]
        .table
        .rows
        .iter()
        .filter_map(|r| r[0].as_text().map(str::to_string))
        .collect();
    assert_eq!(phases.first().map(String::as_str), Some("before 2024-02-12"));
    assert_eq!(phases.last().map(String::as_str), Some("from 2024-02-12"));

    let changes = &promo.sections[1].table;
    assert_eq!(changes.headers[0], "Product type");
    assert!(!changes.is_empty());
}

#[test]
fn test_export_to_csv_and_xlsx() {
    let pipeline = pipeline(promo_config());
    let report = pipeline.build_report(&FilterSpec::new(), Granularity::Week).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let mut csv_sink = CsvDirSink::new(dir.path().join("csv")).unwrap();
    pipeline.export(&report, &mut csv_sink).unwrap();
    assert_eq!(csv_sink.written().len(), report.sheets.len() + 1);
    let period = fs::read_to_string(dir.path().join("csv").join("period.csv")).unwrap();
    assert!(period.starts_with("Performance by week"));
    assert!(dir.path().join("csv").join("charts.json").exists());

    let xlsx_path = dir.path().join("report.xlsx");
    let mut xlsx_sink = XlsxSink::new(&xlsx_path);
    pipeline.export(&report, &mut xlsx_sink).unwrap();
    assert!(fs::metadata(&xlsx_path).unwrap().len() > 0);

    // Export only borrows the report
    assert_eq!(report.sheets.len(), 12);
}
