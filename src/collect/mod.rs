//! Primary data collection.
//!
//! Each configured source rebuilds its destination table, then drains the
//! feature-service pages into the store's sequential insert path. Sources
//! fail independently: a failed source is logged and reported, siblings
//! keep collecting. Callers run collection to completion before the
//! intersection engine treats a source table as ready.

pub mod query;

pub use query::Feature;
pub use query::FeatureLayerQuery;

use crate::config::sources::CollectionMethod;
use crate::config::SourcesConfig;
use crate::error::Result;
use crate::select::Selection;
use crate::store::ColumnType;
use crate::store::Store;
use crate::store::Value;
use futures::StreamExt;
use std::collections::BTreeMap;

/// Column that carries the feature geometry in destination tables.
const GEOMETRY_COLUMN: &str = "geometry";

/// One configured primary data source and its destination table.
#[derive(Debug, Clone)]
pub struct DataSource {
    pub name: String,
    pub table_name: String,
    pub table_columns: BTreeMap<String, ColumnType>,
    pub method: CollectionMethod,
}

impl DataSource {
    /// Insertable columns: everything but the serial id.
    fn insert_columns(&self) -> Vec<String> {
        self.table_columns
            .keys()
            .filter(|name| name.as_str() != "id")
            .cloned()
            .collect()
    }

    fn row(&self, columns: &[String], feature: &Feature) -> Vec<Value> {
        columns
            .iter()
            .map(|column| {
                if column == GEOMETRY_COLUMN {
                    if feature.geometry.is_null() {
                        Value::Null
                    } else {
                        Value::GeoJson(feature.geometry.to_string())
                    }
                } else {
                    feature
                        .properties
                        .get(column)
                        .map(Value::from_json)
                        .unwrap_or(Value::Null)
                }
            })
            .collect()
    }

    /// Drop and rebuild the destination table: serial id plus the
    /// configured columns.
    async fn rebuild(&self, store: &dyn Store) -> Result<()> {
        store.drop_table(&self.table_name).await?;
        let mut schema = vec![("id".to_string(), ColumnType::Serial)];
        schema.extend(
            self.table_columns
                .iter()
                .filter(|(name, _)| name.as_str() != "id")
                .map(|(name, ty)| (name.clone(), *ty)),
        );
        store.create_table(&self.table_name, &schema).await
    }

    /// Collect this source to completion. Returns the number of features
    /// loaded.
    pub async fn collect(&self, store: &dyn Store) -> Result<u64> {
        let CollectionMethod::FlQuery {
            query_url,
            query_params,
        } = &self.method;
        let query = FeatureLayerQuery::new(query_url.clone(), query_params.clone());
        let total = query.total_count().await?;
        if total == 0 {
            log::debug!("no features to fetch for source ({})", self.name);
            return Ok(0);
        }
        log::debug!("expecting {} features for source ({})", total, self.name);
        self.rebuild(store).await?;
        let columns = self.insert_columns();
        let mut loaded = 0;
        let mut pages = std::pin::pin!(query.pages(total));
        while let Some(page) = pages.next().await {
            let features = page?;
            let rows = features
                .iter()
                .map(|feature| self.row(&columns, feature))
                .collect::<Vec<_>>();
            loaded += store.bulk_insert(&self.table_name, &columns, &rows).await?;
            log::debug!("loaded {}/{} features for source ({})", loaded, total, self.name);
        }
        Ok(loaded)
    }
}

/// All configured sources, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct SourceCatalog {
    sources: BTreeMap<String, DataSource>,
}

impl SourceCatalog {
    pub const COLLECT_ALL: &'static str = "collect_all";

    pub fn new(config: SourcesConfig) -> Self {
        let sources = config
            .sources
            .into_iter()
            .map(|(name, source)| {
                (
                    name.clone(),
                    DataSource {
                        name,
                        table_name: source.table_name,
                        table_columns: source.table_columns,
                        method: source.method,
                    },
                )
            })
            .collect();
        Self { sources }
    }

    /// Collect the selected sources; returns the names that completed.
    pub async fn collect(&self, store: &dyn Store, selection: &Selection) -> Vec<String> {
        let mut collected = Vec::new();
        if selection.is_none() {
            log::info!("no data sources selected, nothing to collect");
            return collected;
        }
        for name in selection.resolve(self.sources.keys()) {
            match self.sources.get(&name) {
                Some(source) => match source.collect(store).await {
                    Ok(loaded) => {
                        log::info!("collected source ({}) with {} features", name, loaded);
                        collected.push(name);
                    }
                    Err(e) => log::error!("failed to collect source ({}): {}", name, e),
                },
                None => log::warn!("data source not found in configuration ({})", name),
            }
        }
        collected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn source() -> DataSource {
        let yaml = r#"
flood_zones:
  table_name: flood_zones
  table_columns:
    zone: text
    geometry: geometry
  method:
    fl_query:
      query_url: http://localhost:1/query
"#;
        let config: SourcesConfig = serde_yaml::from_str(yaml).unwrap();
        SourceCatalog::new(config).sources["flood_zones"].clone()
    }

    #[test]
    fn rows_map_properties_and_geometry() {
        let source = source();
        let feature: Feature = serde_json::from_str(
            r#"{"geometry":{"type":"Point","coordinates":[1.0,2.0]},"properties":{"zone":"AE","ignored":4}}"#,
        )
        .unwrap();
        let columns = source.insert_columns();
        assert_eq!(columns, vec!["geometry".to_string(), "zone".to_string()]);
        let row = source.row(&columns, &feature);
        assert!(matches!(&row[0], Value::GeoJson(json) if json.contains("\"type\":\"Point\"")));
        assert_eq!(row[1], Value::Text("AE".into()));
    }

    #[tokio::test]
    async fn rebuild_creates_serial_id_schema() {
        let source = source();
        let store = MemoryStore::new();
        source.rebuild(&store).await.unwrap();
        assert_eq!(
            store.columns_of("flood_zones").await.unwrap(),
            vec!["id".to_string(), "geometry".to_string(), "zone".to_string()]
        );
    }

    #[tokio::test]
    async fn unknown_source_is_skipped() {
        let store = MemoryStore::new();
        let catalog = SourceCatalog::default();
        let collected = catalog
            .collect(&store, &Selection::Named(vec!["phantom".into()]))
            .await;
        assert!(collected.is_empty());
    }
}
