//! Report sinks
//!
//! A [`ReportSink`] receives one sheet at a time. [`XlsxSink`] writes a
//! formatted workbook; [`CsvDirSink`] writes one CSV file per sheet.

use std::fs;
use std::path::{Path, PathBuf};

use csv::WriterBuilder;
use rust_xlsxwriter::{Chart, ChartType, Color, Format, FormatAlign, FormatBorder, Workbook, Worksheet};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::report::builder::{ChartKind, ChartSheet, ReportSheet, WorkbookReport, TITLE_ROW};
use crate::report::rows::{CellValue, ColumnCategory};

pub trait ReportSink {
    fn write_sheet(&mut self, sheet: &ReportSheet) -> Result<()>;

    fn write_chart_sheet(&mut self, charts: &ChartSheet) -> Result<()>;

    /// Flush everything written so far to the destination.
    fn finish(&mut self) -> Result<()>;
}

/// Write every sheet of `report`, then its chart sheet, then finish.
///
/// The report is only borrowed; a failed export leaves it usable.
pub fn export(report: &WorkbookReport, sink: &mut dyn ReportSink) -> Result<()> {
    for sheet in &report.sheets {
        debug!("Writing sheet '{}'", sheet.name);
        sink.write_sheet(sheet)?;
    }
    if let Some(charts) = &report.chart_sheet {
        sink.write_chart_sheet(charts)?;
    }
    sink.finish()?;
    info!("💾 Exported {} sheet(s)", report.sheets.len() + usize::from(report.chart_sheet.is_some()));
    Ok(())
}

const ZOOM: u16 = 85;
const MIN_COLUMN_WIDTH: f64 = 10.0;
const MAX_COLUMN_WIDTH: f64 = 48.0;

struct Formats {
    title: Format,
    subtitle: Format,
    header: Format,
    text: Format,
    currency: Format,
    count: Format,
    percentage: Format,
    rank: Format,
}

impl Formats {
    fn new() -> Self {
        let cell = || Format::new().set_border(FormatBorder::Thin);
        Self {
            title: Format::new().set_bold().set_font_size(16).set_align(FormatAlign::Left),
            subtitle: Format::new().set_bold().set_font_size(12),
            header: cell()
                .set_bold()
                .set_align(FormatAlign::Center)
                .set_background_color(Color::RGB(0xD9E1F2)),
            text: cell(),
            currency: cell().set_num_format("#,##0"),
            count: cell().set_num_format("#,##0"),
            percentage: cell().set_num_format("0.00%"),
            rank: cell().set_num_format("0.0"),
        }
    }

    fn for_category(&self, category: ColumnCategory) -> &Format {
        match category {
            ColumnCategory::Currency => &self.currency,
            ColumnCategory::Count => &self.count,
            ColumnCategory::Percentage => &self.percentage,
            ColumnCategory::Rank => &self.rank,
            ColumnCategory::Period | ColumnCategory::Text => &self.text,
        }
    }
}

/// Formatted `.xlsx` workbook written on [`ReportSink::finish`].
pub struct XlsxSink {
    path: PathBuf,
    workbook: Workbook,
    formats: Formats,
}

impl XlsxSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            workbook: Workbook::new(),
            formats: Formats::new(),
        }
    }
}

impl ReportSink for XlsxSink {
    fn write_sheet(&mut self, sheet: &ReportSheet) -> Result<()> {
        let formats = &self.formats;
        let worksheet = self.workbook.add_worksheet();
        worksheet.set_name(&sheet.name)?;
        worksheet.set_zoom(ZOOM);

        write_title(worksheet, &sheet.title, sheet.width(), &formats.title)?;

        let mut widths = vec![MIN_COLUMN_WIDTH; sheet.width()];
        for (idx, (section, layout)) in sheet.sections.iter().zip(sheet.layout()).enumerate() {
            if let (Some(subtitle), Some(row)) = (&section.subtitle, layout.subtitle_row) {
                worksheet.write_string_with_format(row, 0, subtitle, &formats.subtitle)?;
            }

            let table = &section.table;
            for (col, header) in table.headers.iter().enumerate() {
                worksheet.write_string_with_format(layout.header_row, col as u16, header, &formats.header)?;
                widen(&mut widths, col, header.chars().count());
            }

            for (offset, row) in table.rows.iter().enumerate() {
                let row_idx = layout.first_data_row + offset as u32;
                for (col, value) in row.iter().enumerate() {
                    let format = formats.for_category(table.categories[col]);
                    match value {
                        CellValue::Text(text) => {
                            worksheet.write_string_with_format(row_idx, col as u16, text, format)?;
                            widen(&mut widths, col, text.chars().count());
                        }
                        CellValue::Number(number) => {
                            worksheet.write_number_with_format(row_idx, col as u16, *number, format)?;
                        }
                        CellValue::Blank => {}
                    }
                }
            }

            // One autofilter per worksheet; it goes on the first table.
            if sheet.autofilter && idx == 0 && table.width() > 0 {
                let last_row = layout.last_data_row().unwrap_or(layout.header_row);
                worksheet.autofilter(layout.header_row, 0, last_row, (table.width() - 1) as u16)?;
            }
        }

        for (col, width) in widths.iter().enumerate() {
            worksheet.set_column_width(col as u16, *width)?;
        }
        Ok(())
    }

    fn write_chart_sheet(&mut self, charts: &ChartSheet) -> Result<()> {
        let worksheet = self.workbook.add_worksheet();
        worksheet.set_name(&charts.name)?;
        worksheet.set_zoom(ZOOM);

        for (i, spec) in charts.charts.iter().enumerate() {
            let mut chart = Chart::new(match spec.kind {
                ChartKind::Line => ChartType::Line,
                ChartKind::Column => ChartType::Column,
            });
            chart.title().set_name(spec.title.as_str());

            let sheet = spec.source_sheet.as_str();
            for value_col in &spec.value_columns {
                chart
                    .add_series()
                    .set_name((sheet, spec.header_row, *value_col))
                    .set_categories((sheet, spec.first_row, spec.category_column, spec.last_row, spec.category_column))
                    .set_values((sheet, spec.first_row, *value_col, spec.last_row, *value_col));
            }

            worksheet.insert_chart(1 + (i as u32) * 20, 1, &chart)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        self.workbook.save(&self.path)?;
        info!("Saved workbook to {}", self.path.display());
        Ok(())
    }
}

fn write_title(worksheet: &mut Worksheet, title: &str, width: usize, format: &Format) -> Result<()> {
    if width > 1 {
        worksheet.merge_range(TITLE_ROW, 0, TITLE_ROW, (width - 1) as u16, title, format)?;
    } else {
        worksheet.write_string_with_format(TITLE_ROW, 0, title, format)?;
    }
    Ok(())
}

fn widen(widths: &mut [f64], col: usize, chars: usize) {
    if let Some(width) = widths.get_mut(col) {
        *width = width.max((chars as f64 + 2.0).min(MAX_COLUMN_WIDTH));
    }
}

/// One CSV file per sheet in a directory, plus `charts.json` describing the
/// chart ranges.
pub struct CsvDirSink {
    dir: PathBuf,
    written: Vec<PathBuf>,
}

impl CsvDirSink {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            written: Vec::new(),
        })
    }

    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    fn file_for(&self, sheet_name: &str, extension: &str) -> PathBuf {
        let stem: String = sheet_name
            .chars()
            .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect();
        self.dir.join(format!("{}.{}", stem, extension))
    }
}

impl ReportSink for CsvDirSink {
    fn write_sheet(&mut self, sheet: &ReportSheet) -> Result<()> {
        let path = self.file_for(&sheet.name, "csv");
        let mut writer = WriterBuilder::new().flexible(true).from_path(&path)?;

        writer.write_record([sheet.title.as_str()])?;
        for (i, section) in sheet.sections.iter().enumerate() {
            if i > 0 {
                writer.write_record([""])?;
            }
            if let Some(subtitle) = &section.subtitle {
                writer.write_record([subtitle.as_str()])?;
            }
            writer.write_record(&section.table.headers)?;
            for row in &section.table.rows {
                writer.write_record(row.iter().map(|cell| match cell {
                    CellValue::Text(text) => text.clone(),
                    CellValue::Number(number) => number.to_string(),
                    CellValue::Blank => String::new(),
                }))?;
            }
        }
        writer.flush()?;
        self.written.push(path);
        Ok(())
    }

    fn write_chart_sheet(&mut self, charts: &ChartSheet) -> Result<()> {
        let path = self.file_for(&charts.name, "json");
        let file = fs::File::create(&path)?;
        serde_json::to_writer_pretty(file, charts)?;
        self.written.push(path);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.written.is_empty() {
            return Err(PipelineError::Export(format!("nothing was written to {}", self.dir.display())));
        }
        info!("Wrote {} file(s) to {}", self.written.len(), self.dir.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::rows::ReportTable;

    fn report() -> WorkbookReport {
        let mut table = ReportTable::new(
            vec!["Period".to_string(), "Cost".to_string(), "ROAS".to_string()],
            vec![ColumnCategory::Period, ColumnCategory::Currency, ColumnCategory::Percentage],
        );
        table.rows = vec![
            vec![CellValue::Text("2024-01".into()), CellValue::Number(100.0), CellValue::Number(2.375)],
            vec![CellValue::Text("2024-02".into()), CellValue::Blank, CellValue::Number(0.5)],
        ];
        WorkbookReport {
            title: "Test".to_string(),
            sheets: vec![ReportSheet::new("Period", "Performance by month").section(None, table)],
            chart_sheet: None,
        }
    }

    #[test]
    fn test_csv_sink_writes_one_file_per_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvDirSink::new(dir.path()).unwrap();
        export(&report(), &mut sink).unwrap();

        let content = fs::read_to_string(dir.path().join("period.csv")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "Performance by month");
        assert_eq!(lines[1], "Period,Cost,ROAS");
        assert_eq!(lines[2], "2024-01,100,2.375");
        assert_eq!(lines[3], "2024-02,,0.5");
    }

    #[test]
    fn test_xlsx_sink_saves_workbook() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("report.xlsx");
        let mut sink = XlsxSink::new(&path);
        export(&report(), &mut sink).unwrap();

        let bytes = fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"PK"));
    }

    #[test]
    fn test_empty_csv_export_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvDirSink::new(dir.path()).unwrap();
        let empty = WorkbookReport {
            title: "Empty".to_string(),
            sheets: Vec::new(),
            chart_sheet: None,
        };
        assert!(matches!(export(&empty, &mut sink), Err(PipelineError::Export(_))));
    }
}
