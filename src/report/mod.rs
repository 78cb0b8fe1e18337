//! Report - row mapping, workbook assembly and sinks.

pub mod builder;
pub mod rows;
pub mod sink;

pub use builder::{ChartSheet, ReportBuilder, ReportSheet, WorkbookReport};
pub use rows::{to_report_rows, CellValue, ColumnCategory, ColumnSpec, Measure, ReportColumn, ReportTable};
pub use sink::{export, CsvDirSink, ReportSink, XlsxSink};
