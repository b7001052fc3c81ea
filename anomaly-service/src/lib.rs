pub mod pipeline;
pub mod config;
pub mod sources;
pub mod sinks;
pub mod transform;
pub mod observability;
pub mod metrics_server;
pub mod suntime;
pub mod calendar;
pub mod assets;
pub mod classifier;
pub mod energy;
pub mod report;
pub mod analysis;

pub use pipeline::{Pipeline, Envelope};
