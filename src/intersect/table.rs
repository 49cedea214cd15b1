use crate::config::intersections::IntersectionTableConfig;
use crate::error::Error;
use crate::error::Result;
use crate::hazard::HazardDefinition;
use crate::store::BufferPlan;
use crate::store::ColumnType;
use crate::store::IntersectPlan;
use crate::store::SpatialStore;

/// Fixed name of the buffered geometry column in every working table.
pub const BUFFERED_GEOMETRY_COLUMN: &str = "geom_buff";

/// One buffered-geometry working table derived from a source table, plus
/// the per-hazard pipeline that runs against it.
///
/// The definition is immutable; the database table it describes is rebuilt
/// and recomputed on every run.
#[derive(Debug, Clone)]
pub struct IntersectionTable {
    pub name: String,
    pub source_table: String,
    pub unique_id: String,
    pub source_geometry: String,
    pub buffer_distance: f64,
    pub quad_segs: i32,
    pub hazards: Vec<String>,
}

impl IntersectionTable {
    pub fn new(name: String, config: &IntersectionTableConfig) -> Self {
        Self {
            name,
            source_table: config.source_table.clone(),
            unique_id: config.source_unique_id_column.clone(),
            source_geometry: config.source_geometry_column.clone(),
            buffer_distance: config.buffer_distance,
            quad_segs: config.buffer_quadrant_segments,
            hazards: config.hazards.clone(),
        }
    }

    /// Drop and rebuild the working table from the current source rows:
    /// unique id plus buffered geometry, SRID inherited, spatially indexed.
    ///
    /// A missing source table or geometry column, or a source too empty to
    /// carry a spatial reference, is fatal for this table's pipeline and
    /// propagates.
    pub async fn refresh_source(&self, store: &dyn SpatialStore) -> Result<()> {
        log::debug!("refreshing buffered source ({})", self.name);
        let srid = store
            .srid_of(&self.source_table, &self.source_geometry)
            .await?
            .ok_or_else(|| Error::UnknownSrid {
                table: self.source_table.clone(),
                column: self.source_geometry.clone(),
            })?;
        store
            .rebuild_buffered(&BufferPlan {
                table: self.name.clone(),
                source_table: self.source_table.clone(),
                unique_id: self.unique_id.clone(),
                source_geometry: self.source_geometry.clone(),
                geometry_column: BUFFERED_GEOMETRY_COLUMN.to_string(),
                distance: self.buffer_distance,
                quad_segs: self.quad_segs,
                srid,
            })
            .await?;
        log::debug!("buffered source refreshed ({})", self.name);
        Ok(())
    }

    /// Spatial join: per row, the deduplicated array of hazard values from
    /// every hazard feature intersecting the row's buffered geometry. Rows
    /// with no intersections stay null.
    pub async fn run_intersection(
        &self,
        store: &dyn SpatialStore,
        hazard: &HazardDefinition,
        target: &str,
    ) -> Result<()> {
        log::debug!(
            "running intersection ({} x {}), this may take some time",
            self.name,
            hazard.source_table
        );
        store
            .ensure_column(&self.name, target, ColumnType::TextArray)
            .await?;
        store
            .intersect_aggregate(&IntersectPlan {
                table: self.name.clone(),
                unique_id: self.unique_id.clone(),
                geometry_column: BUFFERED_GEOMETRY_COLUMN.to_string(),
                hazard_table: hazard.source_table.clone(),
                hazard_geometry: hazard.geometry_column.clone(),
                value_field: hazard.value_field.clone(),
                target_column: target.to_string(),
            })
            .await
    }

    /// Keep only the values passing the hazard's classification rule. An
    /// ordinal threshold missing from its order list fails this operation,
    /// leaving the freshly cleared target column null.
    pub async fn filter_hazards(
        &self,
        store: &dyn SpatialStore,
        hazard: &HazardDefinition,
        source: &str,
        target: &str,
    ) -> Result<()> {
        log::debug!("filtering hazard values ({}.{})", self.name, target);
        store
            .ensure_column(&self.name, target, ColumnType::TextArray)
            .await?;
        let rule = hazard.filter_rule()?;
        store.filter_array(&self.name, source, target, &rule).await
    }

    /// Reduce an array column to the hazard's single "worst" value, in a
    /// column typed for the hazard's classification.
    pub async fn determine_max_hazard_value(
        &self,
        store: &dyn SpatialStore,
        hazard: &HazardDefinition,
        source: &str,
        target: &str,
    ) -> Result<()> {
        log::debug!("determining max hazard value ({}.{})", self.name, target);
        store
            .retype_column(&self.name, target, hazard.class.max_column_type())
            .await?;
        let plan = hazard.reduce_plan()?;
        store.reduce_array(&self.name, source, target, &plan).await
    }

    /// Exposure flag: true iff the max column is non-null, for every row.
    pub async fn build_hazard_boolean_column(
        &self,
        store: &dyn SpatialStore,
        source: &str,
        target: &str,
    ) -> Result<()> {
        log::debug!("building hazard boolean column ({}.{})", self.name, target);
        store
            .ensure_column(&self.name, target, ColumnType::Boolean)
            .await?;
        store.flag_nonnull(&self.name, source, target).await
    }
}
