//! Primary data source configuration for collection.

use super::read_yaml;
use crate::error::Error;
use crate::error::Result;
use crate::store::valid_ident;
use crate::store::ColumnType;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct SourcesConfig {
    pub sources: BTreeMap<String, SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub table_name: String,
    pub table_columns: BTreeMap<String, ColumnType>,
    pub method: CollectionMethod,
}

/// Collection method, a closed set validated at parse time.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum CollectionMethod {
    /// Paginated feature-service layer query.
    FlQuery {
        query_url: String,
        #[serde(default)]
        query_params: BTreeMap<String, String>,
    },
}

impl SourcesConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = read_yaml(path)?;
        config.validate()?;
        log::debug!("source configuration loaded ({} sources)", config.sources.len());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for source in self.sources.values() {
            if !valid_ident(&source.table_name) {
                return Err(Error::InvalidIdentifier(source.table_name.clone()));
            }
            for column in source.table_columns.keys() {
                if !valid_ident(column) {
                    return Err(Error::InvalidIdentifier(column.clone()));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_document_parses() {
        let yaml = r#"
flood_zones:
  table_name: flood_zones
  table_columns:
    zone: text
    geometry: geometry
  method:
    fl_query:
      query_url: https://example.com/arcgis/rest/services/flood/FeatureServer/0/query
      query_params:
        where: "1=1"
        outFields: "*"
"#;
        let config: SourcesConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();
        let source = &config.sources["flood_zones"];
        assert_eq!(source.table_name, "flood_zones");
        let CollectionMethod::FlQuery { query_params, .. } = &source.method;
        assert_eq!(query_params["outFields"], "*");
    }
}
