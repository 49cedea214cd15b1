//! Table lifecycle and spatial pushdown contracts.
//!
//! The engine depends on these semantics only, never on a backend's SQL
//! dialect. `pg` implements them against a PostGIS-enabled PostgreSQL by
//! assembling and pushing SQL; `memory` implements the same semantics over
//! in-process tables for tests and dry runs.

pub mod memory;
pub mod pg;
pub mod sql;

pub use memory::MemoryStore;

use crate::error::Result;
use crate::hazard::FilterRule;
use crate::hazard::ReducePlan;
use serde::Deserialize;

/// Column types the pipeline creates. Deliberately small: these are the
/// shapes the screening tables actually use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Serial,
    Integer,
    #[serde(alias = "double_precision")]
    Double,
    Text,
    TextArray,
    Boolean,
    Geometry,
}

/// One cell. `GeoJson` carries geometry as a GeoJSON document for backends
/// that parse geometry server-side; `Geometry` carries parsed geometry for
/// the in-memory backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Text(String),
    TextArray(Vec<String>),
    GeoJson(String),
    Geometry(geo::Geometry<f64>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Text rendering used when a joined value lands in a text array.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s.clone()),
            Self::Int(i) => Some(i.to_string()),
            Self::Double(d) => Some(d.to_string()),
            Self::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Self::Text(s.clone()),
            other => Self::Text(other.to_string()),
        }
    }
}

/// Rebuild instruction for a buffered-geometry working table: select the
/// unique id and the buffered source geometry, stamp the SRID, index.
#[derive(Debug, Clone)]
pub struct BufferPlan {
    pub table: String,
    pub source_table: String,
    pub unique_id: String,
    pub source_geometry: String,
    pub geometry_column: String,
    pub distance: f64,
    pub quad_segs: i32,
    pub srid: i32,
}

/// Spatial join instruction: aggregate the deduplicated hazard values of
/// every hazard row intersecting each working row's buffered geometry.
#[derive(Debug, Clone)]
pub struct IntersectPlan {
    pub table: String,
    pub unique_id: String,
    pub geometry_column: String,
    pub hazard_table: String,
    pub hazard_geometry: String,
    pub value_field: String,
    pub target_column: String,
}

/// Left-join rebuild instruction for the publishing pipeline.
#[derive(Debug, Clone)]
pub struct LeftJoinPlan {
    pub join_column: String,
    pub original_table: String,
    pub joining_table: String,
    pub output_table: String,
    pub include_columns: Vec<String>,
    pub exclude_columns: Vec<String>,
}

/// True when `name` is safe to splice into generated statements. Checked
/// once at configuration load for every configured identifier.
pub fn valid_ident(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Generic table lifecycle operations.
///
/// `ensure_column` is the contract's named idempotent schema mutation: add
/// the column when absent, otherwise reset every value to null. Re-running
/// a pipeline stage therefore never duplicates a column and always starts
/// from a clean column.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    async fn table_exists(&self, table: &str) -> Result<bool>;
    async fn column_exists(&self, table: &str, column: &str) -> Result<bool>;
    async fn columns_of(&self, table: &str) -> Result<Vec<String>>;
    async fn create_table(&self, table: &str, columns: &[(String, ColumnType)]) -> Result<()>;
    /// Drop if present; absent tables are not an error.
    async fn drop_table(&self, table: &str) -> Result<()>;
    async fn rename_table(&self, from: &str, to: &str) -> Result<()>;
    async fn add_column(&self, table: &str, column: &str, ty: ColumnType) -> Result<()>;
    /// Add the column when absent, otherwise null out its values.
    async fn ensure_column(&self, table: &str, column: &str, ty: ColumnType) -> Result<()>;
    /// Add the column when absent, otherwise convert it (values included)
    /// to the requested type.
    async fn retype_column(&self, table: &str, column: &str, ty: ColumnType) -> Result<()>;
    /// Remove named columns, plus any column whose name ends with one of
    /// the given suffix trails.
    async fn remove_columns(&self, table: &str, names: &[String], trails: &[String])
        -> Result<()>;
    async fn clear_column(&self, table: &str, column: &str) -> Result<()>;
    async fn truncate(&self, table: &str) -> Result<()>;
    async fn set_primary_key(&self, table: &str, column: &str) -> Result<()>;
    async fn bulk_insert(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> Result<u64>;
    async fn insert_select(&self, target: &str, source: &str, columns: &[String]) -> Result<()>;
    async fn left_join_into(&self, plan: &LeftJoinPlan) -> Result<()>;

    /// Drop and rebuild `target` with a serial `id` plus the given columns,
    /// then copy those columns over from `source`.
    async fn copy_table(
        &self,
        target: &str,
        source: &str,
        columns: &[(String, ColumnType)],
    ) -> Result<()> {
        self.drop_table(target).await?;
        let mut schema = vec![("id".to_string(), ColumnType::Serial)];
        schema.extend(columns.iter().cloned());
        self.create_table(target, &schema).await?;
        let names = columns.iter().map(|(n, _)| n.clone()).collect::<Vec<_>>();
        self.insert_select(target, source, &names).await
    }
}

/// Spatial operations the intersection engine pushes down.
#[async_trait::async_trait]
pub trait SpatialStore: Store {
    /// Spatial reference of the first row's geometry; `None` when the
    /// table holds no rows to probe.
    async fn srid_of(&self, table: &str, geometry: &str) -> Result<Option<i32>>;
    /// Drop and recreate the buffered working table, spatial index included.
    async fn rebuild_buffered(&self, plan: &BufferPlan) -> Result<()>;
    /// Inner-join spatial aggregate; rows with no intersections are left
    /// null, never an error.
    async fn intersect_aggregate(&self, plan: &IntersectPlan) -> Result<()>;
    /// Per row, write to `target` the subset of `source`'s array passing
    /// the rule.
    async fn filter_array(
        &self,
        table: &str,
        source: &str,
        target: &str,
        rule: &FilterRule,
    ) -> Result<()>;
    /// Per row, reduce `source`'s array to a single value in `target`.
    async fn reduce_array(
        &self,
        table: &str,
        source: &str,
        target: &str,
        plan: &ReducePlan,
    ) -> Result<()>;
    /// Per row, set `target` true iff `source` is non-null.
    async fn flag_nonnull(&self, table: &str, source: &str, target: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers() {
        assert!(valid_ident("geom_buff"));
        assert!(valid_ident("_sites2"));
        assert!(!valid_ident("2sites"));
        assert!(!valid_ident("drop table"));
        assert!(!valid_ident("x; --"));
        assert!(!valid_ident(""));
    }

    #[test]
    fn json_values() {
        assert_eq!(Value::from_json(&serde_json::json!(null)), Value::Null);
        assert_eq!(Value::from_json(&serde_json::json!(3)), Value::Int(3));
        assert_eq!(Value::from_json(&serde_json::json!(2.5)), Value::Double(2.5));
        assert_eq!(
            Value::from_json(&serde_json::json!("AE")),
            Value::Text("AE".into())
        );
    }
}
