pub mod csv_report;

pub use csv_report::{write_optional_report, CsvReportSink, ReportRow};
