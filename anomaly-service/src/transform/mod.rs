use crate::pipeline::{Envelope, PipelineError, Transform};
use streetlight_client::domain::MeterReading;
use time::macros::datetime;

/// Pure validation of a `MeterReading` record.
///
/// Rules:
/// - kWh must be finite and non-negative.
/// - ts must be within a broad sanity window [2000-01-01, 2100-01-01).
pub fn validate_meter_reading(env: Envelope<MeterReading>) -> Result<Envelope<MeterReading>, PipelineError> {
    let r = &env.payload;

    if !r.kwh.is_finite() || r.kwh < 0.0 {
        return Err(PipelineError::Transform(format!(
            "asset {} meter {}: kwh {} must be a non-negative number",
            r.asset_id, r.meter_component_id, r.kwh
        )));
    }

    let min_ts = datetime!(2000-01-01 00:00:00 UTC);
    let max_ts = datetime!(2100-01-01 00:00:00 UTC);

    if r.ts < min_ts || r.ts >= max_ts {
        return Err(PipelineError::Transform(format!(
            "asset {} meter {}: timestamp {} out of allowed range",
            r.asset_id, r.meter_component_id, r.ts
        )));
    }

    Ok(env)
}

#[derive(Clone, Default)]
pub struct MeterReadingValidation;

#[async_trait::async_trait]
impl Transform<MeterReading, MeterReading> for MeterReadingValidation {
    async fn apply(
        &self,
        input: Envelope<MeterReading>,
    ) -> Result<Envelope<MeterReading>, PipelineError> {
        match validate_meter_reading(input) {
            Ok(env) => Ok(env),
            Err(e) => {
                metrics::counter!("readings_rejected_total").increment(1);
                Err(e)
            }
        }
    }
}
