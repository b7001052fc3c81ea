pub mod meter_reading_csv_file;
pub mod meter_reading_db;

pub use meter_reading_csv_file::MeterReadingCsvFileSource;
pub use meter_reading_db::MeterReadingDbSource;
