use super::IntersectionTable;
use crate::config::IntersectionsConfig;
use crate::error::Result;
use crate::hazard::ColumnSuffixes;
use crate::hazard::HazardDefinition;
use crate::hazard::HazardRegistry;
use crate::select::Selection;
use crate::store::valid_ident;
use crate::store::SpatialStore;
use crate::error::Error;
use std::collections::BTreeMap;

/// Independent gates for the five per-hazard stages, allowing cheap
/// re-derivation (say, only the boolean flags) without rerunning the
/// expensive spatial joins.
#[derive(Debug, Clone, Copy)]
pub struct Stages {
    pub intersect: bool,
    pub filter: bool,
    pub max: bool,
    pub max_all: bool,
    pub flag: bool,
}

impl Default for Stages {
    fn default() -> Self {
        Self {
            intersect: true,
            filter: true,
            max: true,
            max_all: true,
            flag: true,
        }
    }
}

/// Coordinates every configured intersection table against the hazard
/// registry, driven by declarative table and hazard selections.
#[derive(Debug, Clone)]
pub struct IntersectionTablesManager {
    tables: BTreeMap<String, IntersectionTable>,
    registry: HazardRegistry,
    columns: ColumnSuffixes,
}

impl IntersectionTablesManager {
    pub const UPDATE_ALL: &'static str = "update_all";
    pub const INTERSECT_ALL: &'static str = "intersect_all";
    pub const ALL_HAZARDS: &'static str = "all_hazards";

    /// Build tables and registry from configuration. Configuration errors,
    /// including derived column names that would not be valid identifiers,
    /// are fatal here.
    pub fn new(config: IntersectionsConfig, columns: ColumnSuffixes) -> Result<Self> {
        config.validate()?;
        let tables = config
            .intersection_tables
            .iter()
            .map(|(name, table)| (name.clone(), IntersectionTable::new(name.clone(), table)))
            .collect::<BTreeMap<_, _>>();
        let registry = HazardRegistry::new(
            config
                .hazards
                .iter()
                .map(|(name, hazard)| (name.clone(), hazard.definition()))
                .collect(),
        );
        for name in registry.names() {
            let cols = columns.columns(name);
            for column in [
                &cols.intersect,
                &cols.values,
                &cols.max,
                &cols.max_all,
                &cols.flag,
            ] {
                if !valid_ident(column) {
                    return Err(Error::InvalidIdentifier(column.clone()));
                }
            }
        }
        log::debug!(
            "intersection manager initialized ({} tables, {} hazards)",
            tables.len(),
            registry.len()
        );
        Ok(Self {
            tables,
            registry,
            columns,
        })
    }

    pub fn table(&self, name: &str) -> Option<&IntersectionTable> {
        self.tables.get(name)
    }

    pub fn registry(&self) -> &HazardRegistry {
        &self.registry
    }

    /// Rebuild the buffered working tables for the selected tables.
    /// Independent of hazard processing; run when source data or buffer
    /// parameters change. A failed rebuild is logged and does not stop
    /// sibling tables.
    pub async fn update_sources(&self, store: &dyn SpatialStore, selection: &Selection) {
        if selection.is_none() {
            log::info!("no intersection tables selected, no sources to update");
            return;
        }
        for name in selection.resolve(self.tables.keys()) {
            match self.tables.get(&name) {
                Some(table) => {
                    if let Err(e) = table.refresh_source(store).await {
                        log::error!("failed to update source for table ({}): {}", name, e);
                    }
                }
                None => log::warn!("intersection table not found in configuration ({})", name),
            }
        }
    }

    /// Run the per-hazard pipeline for every selected (table, hazard)
    /// pair. Hazards are independent: a failed stage is logged and the
    /// remaining stages and hazards still run, each starting from its own
    /// freshly cleared column. Schema-class errors abort the rest of that
    /// table's pipeline; sibling tables continue.
    pub async fn run_intersections(
        &self,
        store: &dyn SpatialStore,
        tables: &Selection,
        hazards: &Selection,
        stages: &Stages,
    ) {
        if tables.is_none() {
            log::info!("no intersection tables selected, no intersections will be run");
            return;
        }
        for table_name in tables.resolve(self.tables.keys()) {
            let Some(table) = self.tables.get(&table_name) else {
                log::warn!(
                    "intersection table not found in configuration ({})",
                    table_name
                );
                continue;
            };
            if hazards.is_none() {
                log::info!(
                    "no hazards selected for table ({}), nothing to intersect",
                    table_name
                );
                continue;
            }
            let hazard_names = match hazards {
                Selection::All => table.hazards.clone(),
                _ => hazards.resolve(self.registry.names()),
            };
            for hazard_name in hazard_names {
                let Some(hazard) = self.registry.get(&hazard_name) else {
                    log::warn!("hazard not found in configuration ({})", hazard_name);
                    continue;
                };
                if let Err(e) = self
                    .run_hazard(store, table, &hazard_name, hazard, stages)
                    .await
                {
                    log::error!(
                        "aborting remaining stages for table ({}): {}",
                        table_name,
                        e
                    );
                    break;
                }
            }
        }
    }

    /// Run the gated stage sequence for one (table, hazard) pair. Stage
    /// failures are logged and the next stage still runs; only
    /// schema-class errors bubble up to abort the table's pipeline.
    async fn run_hazard(
        &self,
        store: &dyn SpatialStore,
        table: &IntersectionTable,
        hazard_name: &str,
        hazard: &HazardDefinition,
        stages: &Stages,
    ) -> Result<()> {
        let cols = self.columns.columns(hazard_name);
        let report = |stage: &str, result: std::result::Result<(), Error>| match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_schema() => Err(e),
            Err(e) => {
                log::error!("{} failed ({} x {}): {}", stage, table.name, hazard_name, e);
                Ok(())
            }
        };
        if stages.intersect {
            let result = table.run_intersection(store, hazard, &cols.intersect).await;
            report("intersection", result)?;
        }
        if stages.filter {
            let result = table
                .filter_hazards(store, hazard, &cols.intersect, &cols.values)
                .await;
            report("hazard filter", result)?;
        }
        if stages.max {
            let result = table
                .determine_max_hazard_value(store, hazard, &cols.values, &cols.max)
                .await;
            report("max hazard value", result)?;
        }
        if stages.max_all {
            let result = table
                .determine_max_hazard_value(store, hazard, &cols.intersect, &cols.max_all)
                .await;
            report("max-all hazard value", result)?;
        }
        if stages.flag {
            let result = table
                .build_hazard_boolean_column(store, &cols.max, &cols.flag)
                .await;
            report("hazard boolean column", result)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ColumnType;
    use crate::store::MemoryStore;
    use crate::store::Store;
    use crate::store::Value;
    use geo::point;
    use geo::Coord;
    use geo::Geometry;
    use geo::Rect;

    const CONFIG: &str = r#"
intersection_tables:
  sites_intersections:
    source_table: sites
    source_unique_id_column: site_id
    source_geometry_column: geometry
    buffer_distance: 10.0
    buffer_quadrant_segments: 8
    hazards: [flood, quake, shallow, soils]
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
    hazard_value_classification: discrete
    hazard_values_order: ">="
    hazard_value_threshold: 10
  shallow:
    source_table: quake_zones
    source_geom_column: geometry
    hazard_field: magnitude
    hazard_value_classification: continuous
    hazard_values_order: "<"
    hazard_value_threshold: 10
  soils:
    source_table: soil_classes
    source_geom_column: geometry
    hazard_field: soil_class
    hazard_value_classification: nominal
    hazard_values_order: [A, B, C, D]
    hazard_value_threshold: [C, D]
"#;

    fn suffixes() -> ColumnSuffixes {
        ColumnSuffixes {
            intersect_col: "_intersect".into(),
            haz_vals_col: "_haz_vals".into(),
            max_col: "_max".into(),
            max_all_col: "_max_all".into(),
            bool_col: "_bool".into(),
        }
    }

    fn manager() -> IntersectionTablesManager {
        let config: IntersectionsConfig = serde_yaml::from_str(CONFIG).unwrap();
        IntersectionTablesManager::new(config, suffixes()).unwrap()
    }

    fn zone(x0: f64, y0: f64, x1: f64, y1: f64) -> Value {
        let rect = Rect::new(Coord { x: x0, y: y0 }, Coord { x: x1, y: y1 });
        Value::Geometry(Geometry::Polygon(rect.to_polygon()))
    }

    async fn geo_table(store: &MemoryStore, name: &str, field: &str, rows: Vec<(&str, Value)>) {
        store
            .create_table(
                name,
                &[
                    (field.to_string(), ColumnType::Text),
                    ("geometry".to_string(), ColumnType::Geometry),
                ],
            )
            .await
            .unwrap();
        let rows = rows
            .into_iter()
            .map(|(value, geom)| vec![Value::Text(value.to_string()), geom])
            .collect::<Vec<_>>();
        store
            .bulk_insert(name, &[field.to_string(), "geometry".to_string()], &rows)
            .await
            .unwrap();
        store.set_srid(name, 4326);
    }

    /// Site 1 sits at the origin; site 2 is far away from every hazard.
    /// With a buffer distance of 10, site 1's envelope reaches every
    /// hazard zone drawn near the origin.
    async fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .create_table(
                "sites",
                &[
                    ("site_id".to_string(), ColumnType::Integer),
                    ("geometry".to_string(), ColumnType::Geometry),
                ],
            )
            .await
            .unwrap();
        store
            .bulk_insert(
                "sites",
                &["site_id".into(), "geometry".into()],
                &[
                    vec![
                        Value::Int(1),
                        Value::Geometry(point! { x: 0.0, y: 0.0 }.into()),
                    ],
                    vec![
                        Value::Int(2),
                        Value::Geometry(point! { x: 500.0, y: 500.0 }.into()),
                    ],
                ],
            )
            .await
            .unwrap();
        store.set_srid("sites", 4326);
        geo_table(
            &store,
            "flood_zones",
            "zone",
            vec![
                ("low", zone(-5.0, -5.0, -1.0, -1.0)),
                ("high", zone(1.0, 1.0, 5.0, 5.0)),
            ],
        )
        .await;
        geo_table(
            &store,
            "quake_zones",
            "magnitude",
            vec![
                ("5", zone(-5.0, -5.0, -1.0, -1.0)),
                ("12", zone(-2.0, -2.0, 2.0, 2.0)),
                ("20", zone(1.0, 1.0, 5.0, 5.0)),
            ],
        )
        .await;
        geo_table(
            &store,
            "soil_classes",
            "soil_class",
            vec![
                ("A", zone(-5.0, -5.0, -1.0, -1.0)),
                ("C", zone(-2.0, -2.0, 2.0, 2.0)),
                ("D", zone(1.0, 1.0, 5.0, 5.0)),
            ],
        )
        .await;
        store
    }

    async fn run_all(store: &MemoryStore, manager: &IntersectionTablesManager) {
        manager.update_sources(store, &Selection::All).await;
        manager
            .run_intersections(store, &Selection::All, &Selection::All, &Stages::default())
            .await;
    }

    fn texts(value: &Value) -> Vec<String> {
        match value {
            Value::TextArray(vs) => vs.clone(),
            Value::Null => Vec::new(),
            other => panic!("expected text array, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn ordinal_filter_and_max() {
        let store = seeded_store().await;
        run_all(&store, &manager()).await;
        let intersect = store
            .column_values("sites_intersections", "flood_intersect")
            .unwrap();
        let values = store
            .column_values("sites_intersections", "flood_haz_vals")
            .unwrap();
        let max = store.column_values("sites_intersections", "flood_max").unwrap();
        // site 1: both zones intersect, only "high" passes the threshold
        assert_eq!(texts(&intersect[0]), vec!["high", "low"]);
        assert_eq!(texts(&values[0]), vec!["high"]);
        assert_eq!(max[0], Value::Text("high".into()));
        // site 2: nothing intersects
        assert_eq!(intersect[1], Value::Null);
        assert_eq!(max[1], Value::Null);
    }

    #[tokio::test]
    async fn filtered_values_are_a_subset_of_intersections() {
        let store = seeded_store().await;
        run_all(&store, &manager()).await;
        for hazard in ["flood", "quake", "shallow", "soils"] {
            let intersect = store
                .column_values("sites_intersections", &format!("{}_intersect", hazard))
                .unwrap();
            let filtered = store
                .column_values("sites_intersections", &format!("{}_haz_vals", hazard))
                .unwrap();
            for (all, kept) in intersect.iter().zip(filtered.iter()) {
                let all = texts(all);
                for value in texts(kept) {
                    assert!(all.contains(&value), "{} not in {:?}", value, all);
                }
            }
        }
    }

    #[tokio::test]
    async fn discrete_max_is_largest_passing_value() {
        let store = seeded_store().await;
        run_all(&store, &manager()).await;
        let values = store
            .column_values("sites_intersections", "quake_haz_vals")
            .unwrap();
        assert_eq!(texts(&values[0]), vec!["12", "20"]);
        let max = store.column_values("sites_intersections", "quake_max").unwrap();
        assert_eq!(max[0], Value::Int(20));
        let max_all = store
            .column_values("sites_intersections", "quake_max_all")
            .unwrap();
        assert_eq!(max_all[0], Value::Int(20));
    }

    #[tokio::test]
    async fn lesser_operator_selects_smallest() {
        let store = seeded_store().await;
        run_all(&store, &manager()).await;
        let values = store
            .column_values("sites_intersections", "shallow_haz_vals")
            .unwrap();
        assert_eq!(texts(&values[0]), vec!["5"]);
        let max = store
            .column_values("sites_intersections", "shallow_max")
            .unwrap();
        assert_eq!(max[0], Value::Double(5.0));
        // max over the unfiltered set also minimizes for a "<" operator
        let max_all = store
            .column_values("sites_intersections", "shallow_max_all")
            .unwrap();
        assert_eq!(max_all[0], Value::Double(5.0));
    }

    #[tokio::test]
    async fn nominal_max_concatenates_and_is_idempotent() {
        let store = seeded_store().await;
        let manager = manager();
        run_all(&store, &manager).await;
        let first = store.column_values("sites_intersections", "soils_max").unwrap();
        assert_eq!(first[0], Value::Text("C,D".into()));
        // re-running with unchanged inputs reproduces the same value
        manager
            .run_intersections(&store, &Selection::All, &Selection::All, &Stages::default())
            .await;
        let second = store.column_values("sites_intersections", "soils_max").unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn boolean_flag_tracks_max_for_every_row() {
        let store = seeded_store().await;
        run_all(&store, &manager()).await;
        for hazard in ["flood", "quake", "shallow", "soils"] {
            let max = store
                .column_values("sites_intersections", &format!("{}_max", hazard))
                .unwrap();
            let flag = store
                .column_values("sites_intersections", &format!("{}_bool", hazard))
                .unwrap();
            for (m, f) in max.iter().zip(flag.iter()) {
                assert_eq!(*f, Value::Bool(!m.is_null()));
            }
            // the far-away site is flagged false, not null
            assert_eq!(flag[1], Value::Bool(false));
        }
    }

    #[tokio::test]
    async fn source_rebuild_is_idempotent() {
        let store = seeded_store().await;
        let manager = manager();
        manager.update_sources(&store, &Selection::All).await;
        let first = store.snapshot("sites_intersections").unwrap();
        manager.update_sources(&store, &Selection::All).await;
        let second = store.snapshot("sites_intersections").unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn unknown_names_are_skipped_without_side_effects() {
        let store = seeded_store().await;
        let manager = manager();
        manager
            .update_sources(
                &store,
                &Selection::Named(vec!["sites_intersections".into(), "phantom".into()]),
            )
            .await;
        assert!(store.table_exists("sites_intersections").await.unwrap());
        assert!(!store.table_exists("phantom").await.unwrap());
        manager
            .run_intersections(
                &store,
                &Selection::All,
                &Selection::Named(vec!["volcano".into(), "flood".into()]),
                &Stages::default(),
            )
            .await;
        // the known hazard still ran
        assert!(store
            .column_exists("sites_intersections", "flood_max")
            .await
            .unwrap());
        assert!(!store
            .column_exists("sites_intersections", "volcano_max")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn stage_flags_gate_column_derivation() {
        let store = seeded_store().await;
        let manager = manager();
        manager.update_sources(&store, &Selection::All).await;
        let stages = Stages {
            intersect: true,
            filter: false,
            max: false,
            max_all: false,
            flag: false,
        };
        manager
            .run_intersections(
                &store,
                &Selection::All,
                &Selection::Named(vec!["flood".into()]),
                &stages,
            )
            .await;
        assert!(store
            .column_exists("sites_intersections", "flood_intersect")
            .await
            .unwrap());
        assert!(!store
            .column_exists("sites_intersections", "flood_haz_vals")
            .await
            .unwrap());
        assert!(!store
            .column_exists("sites_intersections", "flood_bool")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn missing_threshold_rank_fails_filter_but_not_siblings() {
        let mut config: IntersectionsConfig = serde_yaml::from_str(CONFIG).unwrap();
        config.hazards.get_mut("flood").unwrap().hazard_value_threshold =
            crate::hazard::Threshold::Rank("severe".into());
        let manager = IntersectionTablesManager::new(config, suffixes()).unwrap();
        let store = seeded_store().await;
        manager.update_sources(&store, &Selection::All).await;
        manager
            .run_intersections(&store, &Selection::All, &Selection::All, &Stages::default())
            .await;
        // flood's filter failed: column exists but stays null
        let values = store
            .column_values("sites_intersections", "flood_haz_vals")
            .unwrap();
        assert!(values.iter().all(Value::is_null));
        // sibling hazards were unaffected
        let quake = store.column_values("sites_intersections", "quake_max").unwrap();
        assert_eq!(quake[0], Value::Int(20));
    }

    #[tokio::test]
    async fn missing_working_table_aborts_that_tables_stages() {
        let store = seeded_store().await;
        let manager = manager();
        // intersections without a prior source refresh: the working table
        // does not exist, which is a schema error and stops the table
        manager
            .run_intersections(&store, &Selection::All, &Selection::All, &Stages::default())
            .await;
        assert!(!store.table_exists("sites_intersections").await.unwrap());
        // source tables are untouched
        assert!(store.table_exists("flood_zones").await.unwrap());
    }

    #[tokio::test]
    async fn no_selection_is_a_logged_noop() {
        let store = seeded_store().await;
        let manager = manager();
        manager
            .run_intersections(&store, &Selection::None, &Selection::All, &Stages::default())
            .await;
        assert!(!store.table_exists("sites_intersections").await.unwrap());
    }
}
