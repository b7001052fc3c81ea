use std::collections::BTreeMap;

use streetlight_client::domain::{AssetRow, NodeComponentRow, NominalWattageRow};
use time::Date;

/// Reference data the classifier needs for one asset.
#[derive(Debug, Clone, PartialEq)]
pub struct Asset {
    pub asset_id: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub installation_date: Date,
    pub commissioning_date: Date,
    pub street_name: Option<String>,
    pub luminaire_type: Option<String>,
    pub nominal_wattage: Option<f64>,
    pub node_component_id: Option<i64>,
}

impl Asset {
    pub fn new(row: AssetRow) -> Self {
        Self {
            asset_id: row.asset_id,
            latitude: row.latitude,
            longitude: row.longitude,
            installation_date: row.installation_date,
            commissioning_date: row.commissioning_date,
            street_name: row.street_name,
            luminaire_type: None,
            nominal_wattage: None,
            node_component_id: None,
        }
    }

    /// Rated wattage when it is usable for classification.
    pub fn usable_nominal_wattage(&self) -> Option<f64> {
        self.nominal_wattage.filter(|w| w.is_finite() && *w > 0.0)
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }
}

/// All assets of a run keyed by id, populated once from the reference queries.
#[derive(Debug, Clone, Default)]
pub struct AssetRegistry {
    assets: BTreeMap<i64, Asset>,
}

impl AssetRegistry {
    /// Joins the three reference row sets. Wattage and node rows for unknown
    /// assets are ignored; when an asset has several, the first one wins.
    pub fn from_rows(
        assets: Vec<AssetRow>,
        wattages: Vec<NominalWattageRow>,
        nodes: Vec<NodeComponentRow>,
    ) -> Self {
        let mut map: BTreeMap<i64, Asset> = assets.into_iter().map(|r| (r.asset_id, Asset::new(r))).collect();

        for w in wattages {
            if let Some(asset) = map.get_mut(&w.asset_id) {
                if asset.nominal_wattage.is_none() {
                    asset.nominal_wattage = w.nominal_wattage;
                    asset.luminaire_type = w.luminaire_type;
                }
            }
        }

        for n in nodes {
            if let Some(asset) = map.get_mut(&n.asset_id) {
                asset.node_component_id.get_or_insert(n.component_id);
            }
        }

        Self { assets: map }
    }

    pub fn insert(&mut self, asset: Asset) {
        self.assets.insert(asset.asset_id, asset);
    }

    pub fn get(&self, asset_id: i64) -> Option<&Asset> {
        self.assets.get(&asset_id)
    }

    /// Keeps only the listed assets.
    pub fn retain_ids(&mut self, ids: &[i64]) {
        self.assets.retain(|id, _| ids.contains(id));
    }

    pub fn iter(&self) -> impl Iterator<Item = &Asset> {
        self.assets.values()
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn row(asset_id: i64) -> AssetRow {
        AssetRow {
            asset_id,
            latitude: Some(41.38),
            longitude: Some(2.17),
            installation_date: date!(2016-02-19),
            commissioning_date: date!(2016-02-19),
            street_name: Some("Placa de Sant Jaume".to_string()),
        }
    }

    #[test]
    fn joins_reference_rows_by_asset() {
        let registry = AssetRegistry::from_rows(
            vec![row(1), row(2)],
            vec![
                NominalWattageRow { asset_id: 1, luminaire_type: Some("LED-72".to_string()), nominal_wattage: Some(72.0) },
                NominalWattageRow { asset_id: 1, luminaire_type: Some("other".to_string()), nominal_wattage: Some(10.0) },
                NominalWattageRow { asset_id: 9, luminaire_type: None, nominal_wattage: Some(50.0) },
            ],
            vec![NodeComponentRow { asset_id: 2, component_id: 3957 }],
        );

        assert_eq!(registry.len(), 2);
        let one = registry.get(1).unwrap();
        assert_eq!(one.nominal_wattage, Some(72.0));
        assert_eq!(one.luminaire_type.as_deref(), Some("LED-72"));
        assert_eq!(one.node_component_id, None);
        let two = registry.get(2).unwrap();
        assert_eq!(two.nominal_wattage, None);
        assert_eq!(two.node_component_id, Some(3957));
        assert!(registry.get(9).is_none());
    }

    #[test]
    fn unusable_wattage_is_filtered() {
        let mut asset = Asset::new(row(1));
        asset.nominal_wattage = Some(0.0);
        assert_eq!(asset.usable_nominal_wattage(), None);
        asset.nominal_wattage = Some(f64::NAN);
        assert_eq!(asset.usable_nominal_wattage(), None);
        asset.nominal_wattage = Some(100.0);
        assert_eq!(asset.usable_nominal_wattage(), Some(100.0));
    }

    #[test]
    fn retain_ids_filters_registry() {
        let mut registry = AssetRegistry::from_rows(vec![row(1), row(2), row(3)], vec![], vec![]);
        registry.retain_ids(&[3, 1]);
        let ids: Vec<i64> = registry.iter().map(|a| a.asset_id).collect();
        assert_eq!(ids, vec![1, 3]);
    }
}
