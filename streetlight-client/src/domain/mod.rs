mod asset;
mod meter_reading;

pub use asset::{AssetRow, NodeComponentRow, NominalWattageRow};
pub use meter_reading::{MeterReading, MeterReadingRow};
