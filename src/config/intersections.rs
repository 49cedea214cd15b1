//! Intersection tables and hazards configuration.

use super::read_yaml;
use crate::error::Error;
use crate::error::Result;
use crate::hazard::HazardDefinition;
use crate::hazard::Threshold;
use crate::hazard::ValueClass;
use crate::hazard::ValueOrder;
use crate::store::valid_ident;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IntersectionsConfig {
    #[serde(default)]
    pub intersection_tables: BTreeMap<String, IntersectionTableConfig>,
    #[serde(default)]
    pub hazards: BTreeMap<String, HazardConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IntersectionTableConfig {
    pub source_table: String,
    pub source_unique_id_column: String,
    pub source_geometry_column: String,
    pub buffer_distance: f64,
    pub buffer_quadrant_segments: i32,
    #[serde(default)]
    pub hazards: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HazardConfig {
    pub source_table: String,
    pub source_geom_column: String,
    pub hazard_field: String,
    pub hazard_value_classification: ValueClass,
    pub hazard_values_order: ValueOrder,
    pub hazard_value_threshold: Threshold,
}

impl HazardConfig {
    pub fn definition(&self) -> HazardDefinition {
        HazardDefinition {
            source_table: self.source_table.clone(),
            geometry_column: self.source_geom_column.clone(),
            value_field: self.hazard_field.clone(),
            class: self.hazard_value_classification,
            order: self.hazard_values_order.clone(),
            threshold: self.hazard_value_threshold.clone(),
        }
    }
}

impl IntersectionsConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = read_yaml(path)?;
        config.validate()?;
        log::debug!(
            "intersection configuration loaded ({} tables, {} hazards)",
            config.intersection_tables.len(),
            config.hazards.len()
        );
        Ok(config)
    }

    /// Construction-time validation: identifiers must be spliceable and
    /// hazard shapes must match their classification. Tables referencing
    /// hazards that do not exist are tolerated here and skipped with a
    /// warning at run time.
    pub fn validate(&self) -> Result<()> {
        if self.intersection_tables.is_empty() && self.hazards.is_empty() {
            return Err(Error::Config(
                "intersection configuration is empty".to_string(),
            ));
        }
        for (name, table) in &self.intersection_tables {
            for ident in [
                name,
                &table.source_table,
                &table.source_unique_id_column,
                &table.source_geometry_column,
            ] {
                if !valid_ident(ident) {
                    return Err(Error::InvalidIdentifier(ident.clone()));
                }
            }
        }
        for (name, hazard) in &self.hazards {
            for ident in [
                name,
                &hazard.source_table,
                &hazard.source_geom_column,
                &hazard.hazard_field,
            ] {
                if !valid_ident(ident) {
                    return Err(Error::InvalidIdentifier(ident.clone()));
                }
            }
            hazard.definition().validate(name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
intersection_tables:
  sites_intersections:
    source_table: sites
    source_unique_id_column: site_id
    source_geometry_column: geometry
    buffer_distance: 500.0
    buffer_quadrant_segments: 8
    hazards:
      - flood
      - quake
hazards:
  flood:
    source_table: flood_zones
    source_geom_column: geometry
    hazard_field: zone
    hazard_value_classification: ordinal
    hazard_values_order: [low, medium, high]
    hazard_value_threshold: medium
  quake:
    source_table: quake_zones
    source_geom_column: geometry
    hazard_field: magnitude
    hazard_value_classification: continuous
    hazard_values_order: ">="
    hazard_value_threshold: 5.5
  soils:
    source_table: soil_classes
    source_geom_column: geometry
    hazard_field: soil_class
    hazard_value_classification: nominal
    hazard_values_order: [A, B, C, D]
    hazard_value_threshold: [C, D]
"#;

    #[test]
    fn full_document_parses_and_validates() {
        let config: IntersectionsConfig = serde_yaml::from_str(YAML).unwrap();
        config.validate().unwrap();
        assert_eq!(config.intersection_tables.len(), 1);
        assert_eq!(config.hazards.len(), 3);
        let table = &config.intersection_tables["sites_intersections"];
        assert_eq!(table.buffer_distance, 500.0);
        assert_eq!(table.hazards, vec!["flood".to_string(), "quake".to_string()]);
        assert!(matches!(
            config.hazards["quake"].hazard_values_order,
            ValueOrder::Operator(_)
        ));
    }

    #[test]
    fn empty_document_is_fatal() {
        let config: IntersectionsConfig = serde_yaml::from_str("{}").unwrap();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn hostile_identifier_is_rejected() {
        let mut config: IntersectionsConfig = serde_yaml::from_str(YAML).unwrap();
        config
            .intersection_tables
            .get_mut("sites_intersections")
            .unwrap()
            .source_table = "sites; DROP TABLE sites".to_string();
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn bad_operator_is_fatal_at_load() {
        let mut config: IntersectionsConfig = serde_yaml::from_str(YAML).unwrap();
        config.hazards.get_mut("quake").unwrap().hazard_values_order =
            ValueOrder::Operator("~".to_string());
        assert!(config.validate().is_err());
    }
}
