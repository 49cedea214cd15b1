use super::BuildOp;
use crate::config::PublishingConfig;
use crate::error::Result;
use crate::select::Selection;
use crate::store::Store;
use std::collections::BTreeMap;

/// One derived output table and the operation sequence that builds it.
#[derive(Debug, Clone)]
pub struct OutputTable {
    pub name: String,
    ops: Vec<BuildOp>,
}

impl OutputTable {
    pub fn new(name: String, ops: Vec<BuildOp>) -> Self {
        Self { name, ops }
    }

    /// Run the build sequence in order; the first failing operation aborts
    /// this table's build.
    pub async fn build(&self, store: &dyn Store) -> Result<()> {
        log::debug!("building output table ({})", self.name);
        for op in &self.ops {
            op.execute(store).await?;
        }
        log::info!("output table built ({})", self.name);
        Ok(())
    }
}

/// Registry of output tables, driven by declarative selection.
#[derive(Debug, Clone, Default)]
pub struct PublishingManager {
    tables: BTreeMap<String, OutputTable>,
}

impl PublishingManager {
    pub const BUILD_ALL: &'static str = "build_all";

    pub fn new(config: PublishingConfig) -> Self {
        let tables = config
            .publish_tables_configs
            .into_iter()
            .map(|(name, table)| {
                (
                    name.clone(),
                    OutputTable::new(name, table.build_table_config),
                )
            })
            .collect();
        Self { tables }
    }

    /// Build the selected output tables. A failed table is logged and does
    /// not stop its siblings; unknown names warn and are skipped.
    pub async fn build_tables(&self, store: &dyn Store, selection: &Selection) {
        if selection.is_none() {
            log::info!("no output tables selected, nothing to build");
            return;
        }
        for name in selection.resolve(self.tables.keys()) {
            match self.tables.get(&name) {
                Some(table) => {
                    if let Err(e) = table.build(store).await {
                        log::error!("failed to build output table ({}): {}", name, e);
                    }
                }
                None => log::warn!("output table not found in configuration ({})", name),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ColumnType;
    use crate::store::MemoryStore;
    use crate::store::Value;

    async fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .create_table(
                "sites_intersections",
                &[
                    ("site_id".to_string(), ColumnType::Integer),
                    ("flood_max".to_string(), ColumnType::Text),
                    ("flood_intersect".to_string(), ColumnType::TextArray),
                ],
            )
            .await
            .unwrap();
        store
            .bulk_insert(
                "sites_intersections",
                &[
                    "site_id".into(),
                    "flood_max".into(),
                    "flood_intersect".into(),
                ],
                &[vec![
                    Value::Int(7),
                    Value::Text("high".into()),
                    Value::TextArray(vec!["low".into(), "high".into()]),
                ]],
            )
            .await
            .unwrap();
        store
    }

    fn manager() -> PublishingManager {
        let yaml = r#"
publish_tables_configs:
  published_sites:
    build_table_config:
      - copy_table:
          new_table: published_sites
          original_table: sites_intersections
          columns:
            site_id: integer
            flood_max: text
      - set_primary_key:
          table_name: published_sites
          primary_key: site_id
"#;
        PublishingManager::new(serde_yaml::from_str(yaml).unwrap())
    }

    #[tokio::test]
    async fn build_copies_selected_columns() {
        let store = seeded_store().await;
        let manager = manager();
        manager.build_tables(&store, &Selection::All).await;
        assert!(store.table_exists("published_sites").await.unwrap());
        let columns = store.columns_of("published_sites").await.unwrap();
        assert_eq!(
            columns,
            vec!["id".to_string(), "flood_max".to_string(), "site_id".to_string()]
        );
        assert_eq!(
            store.column_values("published_sites", "flood_max").unwrap(),
            vec![Value::Text("high".into())]
        );
    }

    #[tokio::test]
    async fn rebuilding_twice_is_clean() {
        let store = seeded_store().await;
        let manager = manager();
        manager.build_tables(&store, &Selection::All).await;
        manager.build_tables(&store, &Selection::All).await;
        assert_eq!(
            store.column_values("published_sites", "site_id").unwrap(),
            vec![Value::Int(7)]
        );
    }

    #[tokio::test]
    async fn unknown_table_warns_and_skips() {
        let store = seeded_store().await;
        let manager = manager();
        manager
            .build_tables(&store, &Selection::Named(vec!["nope".into()]))
            .await;
        assert!(!store.table_exists("published_sites").await.unwrap());
    }
}
