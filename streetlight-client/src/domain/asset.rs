use time::Date;

/// Static description of a lighting asset as stored in `assets`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AssetRow {
    pub asset_id: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub installation_date: Date,
    pub commissioning_date: Date,
    pub street_name: Option<String>,
}

/// Rated wattage of the luminaire mounted on an asset.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NominalWattageRow {
    pub asset_id: i64,
    pub luminaire_type: Option<String>,
    pub nominal_wattage: Option<f64>,
}

/// Registered communication node of an asset; the node carries the dimming calendar.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NodeComponentRow {
    pub asset_id: i64,
    pub component_id: i64,
}
