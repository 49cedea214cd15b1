//! In-memory backend implementing the store contracts over plain vectors.
//!
//! Geometry predicates run through `geo`; buffering is approximated by
//! envelope expansion, which is adequate for the test and dry-run
//! workloads this backend serves. Joins are linear scans.

use super::BufferPlan;
use super::ColumnType;
use super::IntersectPlan;
use super::LeftJoinPlan;
use super::SpatialStore;
use super::Store;
use super::Value;
use crate::error::Error;
use crate::error::Result;
use crate::hazard::Direction;
use crate::hazard::FilterRule;
use crate::hazard::NumCast;
use crate::hazard::ReducePlan;
use geo::BoundingRect;
use geo::Coord;
use geo::Geometry;
use geo::Intersects;
use geo::Rect;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::MutexGuard;

#[derive(Debug, Clone)]
struct Table {
    columns: Vec<(String, ColumnType)>,
    srid: Option<i32>,
    rows: Vec<Vec<Value>>,
    next_id: i64,
}

impl Table {
    fn new(columns: Vec<(String, ColumnType)>) -> Self {
        Self {
            columns,
            srid: None,
            rows: Vec::new(),
            next_id: 1,
        }
    }

    fn index_of(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|(name, _)| name == column)
    }

    fn require(&self, table: &str, column: &str) -> Result<usize> {
        self.index_of(column).ok_or_else(|| Error::MissingColumn {
            table: table.to_string(),
            column: column.to_string(),
        })
    }
}

/// Backend holding every table in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, Table>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Table>> {
        self.tables.lock().expect("store mutex poisoned")
    }

    /// Stamp the spatial reference of a table's geometry column, the way a
    /// real source table carries one.
    pub fn set_srid(&self, table: &str, srid: i32) {
        if let Some(t) = self.lock().get_mut(table) {
            t.srid = Some(srid);
        }
    }

    /// All values of one column, in row order.
    pub fn column_values(&self, table: &str, column: &str) -> Option<Vec<Value>> {
        let tables = self.lock();
        let t = tables.get(table)?;
        let at = t.index_of(column)?;
        Some(t.rows.iter().map(|row| row[at].clone()).collect())
    }

    /// Schema and rows of a table, for whole-table comparisons.
    pub fn snapshot(&self, table: &str) -> Option<(Vec<(String, ColumnType)>, Vec<Vec<Value>>)> {
        let tables = self.lock();
        let t = tables.get(table)?;
        Some((t.columns.clone(), t.rows.clone()))
    }
}

fn buffered(geometry: &Geometry<f64>, distance: f64) -> Option<Geometry<f64>> {
    let rect = geometry.bounding_rect()?;
    let expanded = Rect::new(
        Coord {
            x: rect.min().x - distance,
            y: rect.min().y - distance,
        },
        Coord {
            x: rect.max().x + distance,
            y: rect.max().y + distance,
        },
    );
    Some(Geometry::Polygon(expanded.to_polygon()))
}

fn parse_number(value: &str, cast: NumCast) -> Result<f64> {
    match cast {
        NumCast::Int => value
            .trim()
            .parse::<i64>()
            .map(|i| i as f64)
            .map_err(|_| Error::NotNumeric(value.to_string())),
        NumCast::Double => value
            .trim()
            .parse::<f64>()
            .map_err(|_| Error::NotNumeric(value.to_string())),
    }
}

fn convert(value: &Value, ty: ColumnType) -> Result<Value> {
    let unsupported = || Error::Store(format!("cannot convert {:?} to {:?}", value, ty));
    match (value, ty) {
        (Value::Null, _) => Ok(Value::Null),
        (Value::Int(_), ColumnType::Integer)
        | (Value::Double(_), ColumnType::Double)
        | (Value::Text(_), ColumnType::Text)
        | (Value::TextArray(_), ColumnType::TextArray)
        | (Value::Bool(_), ColumnType::Boolean) => Ok(value.clone()),
        (Value::Int(i), ColumnType::Double) => Ok(Value::Double(*i as f64)),
        (Value::Double(d), ColumnType::Integer) => Ok(Value::Int(d.round() as i64)),
        (Value::Text(s), ColumnType::Integer) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| Error::NotNumeric(s.clone())),
        (Value::Text(s), ColumnType::Double) => s
            .trim()
            .parse::<f64>()
            .map(Value::Double)
            .map_err(|_| Error::NotNumeric(s.clone())),
        (v, ColumnType::Text) => v.as_text().map(Value::Text).ok_or_else(unsupported),
        _ => Err(unsupported()),
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.lock().contains_key(table))
    }

    async fn column_exists(&self, table: &str, column: &str) -> Result<bool> {
        Ok(self
            .lock()
            .get(table)
            .map(|t| t.index_of(column).is_some())
            .unwrap_or(false))
    }

    async fn columns_of(&self, table: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()
            .get(table)
            .map(|t| t.columns.iter().map(|(name, _)| name.clone()).collect())
            .unwrap_or_default())
    }

    async fn create_table(&self, table: &str, columns: &[(String, ColumnType)]) -> Result<()> {
        let mut tables = self.lock();
        if tables.contains_key(table) {
            return Err(Error::Store(format!("table {} already exists", table)));
        }
        tables.insert(table.to_string(), Table::new(columns.to_vec()));
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> Result<()> {
        self.lock().remove(table);
        Ok(())
    }

    async fn rename_table(&self, from: &str, to: &str) -> Result<()> {
        let mut tables = self.lock();
        let t = tables
            .remove(from)
            .ok_or_else(|| Error::MissingTable(from.to_string()))?;
        tables.insert(to.to_string(), t);
        Ok(())
    }

    async fn add_column(&self, table: &str, column: &str, ty: ColumnType) -> Result<()> {
        let mut tables = self.lock();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| Error::MissingTable(table.to_string()))?;
        if t.index_of(column).is_some() {
            return Err(Error::Store(format!(
                "column {}.{} already exists",
                table, column
            )));
        }
        t.columns.push((column.to_string(), ty));
        for row in &mut t.rows {
            row.push(Value::Null);
        }
        Ok(())
    }

    async fn ensure_column(&self, table: &str, column: &str, ty: ColumnType) -> Result<()> {
        if self.column_exists(table, column).await? {
            self.clear_column(table, column).await
        } else {
            self.add_column(table, column, ty).await
        }
    }

    async fn retype_column(&self, table: &str, column: &str, ty: ColumnType) -> Result<()> {
        if !self.column_exists(table, column).await? {
            return self.add_column(table, column, ty).await;
        }
        let mut tables = self.lock();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| Error::MissingTable(table.to_string()))?;
        let at = t.require(table, column)?;
        for row in &mut t.rows {
            row[at] = convert(&row[at], ty)?;
        }
        t.columns[at].1 = ty;
        Ok(())
    }

    async fn remove_columns(
        &self,
        table: &str,
        names: &[String],
        trails: &[String],
    ) -> Result<()> {
        let mut tables = self.lock();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| Error::MissingTable(table.to_string()))?;
        let doomed = t
            .columns
            .iter()
            .enumerate()
            .filter(|(_, (name, _))| {
                names.contains(name) || trails.iter().any(|trail| name.ends_with(trail.as_str()))
            })
            .map(|(i, _)| i)
            .collect::<Vec<_>>();
        for &at in doomed.iter().rev() {
            t.columns.remove(at);
            for row in &mut t.rows {
                row.remove(at);
            }
        }
        Ok(())
    }

    async fn clear_column(&self, table: &str, column: &str) -> Result<()> {
        let mut tables = self.lock();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| Error::MissingTable(table.to_string()))?;
        let at = t.require(table, column)?;
        for row in &mut t.rows {
            row[at] = Value::Null;
        }
        Ok(())
    }

    async fn truncate(&self, table: &str) -> Result<()> {
        let mut tables = self.lock();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| Error::MissingTable(table.to_string()))?;
        t.rows.clear();
        Ok(())
    }

    async fn set_primary_key(&self, table: &str, column: &str) -> Result<()> {
        let tables = self.lock();
        let t = tables
            .get(table)
            .ok_or_else(|| Error::MissingTable(table.to_string()))?;
        t.require(table, column)?;
        Ok(())
    }

    async fn bulk_insert(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> Result<u64> {
        let mut tables = self.lock();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| Error::MissingTable(table.to_string()))?;
        let mut slots = Vec::with_capacity(columns.len());
        for column in columns {
            slots.push(t.require(table, column)?);
        }
        for row in rows {
            let mut full = Vec::with_capacity(t.columns.len());
            for at in 0..t.columns.len() {
                full.push(match t.columns[at].1 {
                    ColumnType::Serial => {
                        let id = t.next_id;
                        t.next_id += 1;
                        Value::Int(id)
                    }
                    _ => Value::Null,
                });
            }
            for (value, &at) in row.iter().zip(slots.iter()) {
                full[at] = value.clone();
            }
            t.rows.push(full);
        }
        Ok(rows.len() as u64)
    }

    async fn insert_select(&self, target: &str, source: &str, columns: &[String]) -> Result<()> {
        let rows = {
            let tables = self.lock();
            let s = tables
                .get(source)
                .ok_or_else(|| Error::MissingTable(source.to_string()))?;
            let mut slots = Vec::with_capacity(columns.len());
            for column in columns {
                slots.push(s.require(source, column)?);
            }
            s.rows
                .iter()
                .map(|row| slots.iter().map(|&at| row[at].clone()).collect())
                .collect::<Vec<Vec<Value>>>()
        };
        self.bulk_insert(target, columns, &rows).await?;
        Ok(())
    }

    async fn left_join_into(&self, plan: &LeftJoinPlan) -> Result<()> {
        let mut tables = self.lock();
        let original = tables
            .get(&plan.original_table)
            .ok_or_else(|| Error::MissingTable(plan.original_table.clone()))?
            .clone();
        let joining = tables
            .get(&plan.joining_table)
            .ok_or_else(|| Error::MissingTable(plan.joining_table.clone()))?
            .clone();
        let on_left = original.require(&plan.original_table, &plan.join_column)?;
        let on_right = joining.require(&plan.joining_table, &plan.join_column)?;
        let original_names = original
            .columns
            .iter()
            .map(|(name, _)| name.clone())
            .collect::<Vec<_>>();
        let picked = joining
            .columns
            .iter()
            .enumerate()
            .filter(|(_, (name, _))| {
                (plan.include_columns.is_empty() || plan.include_columns.contains(name))
                    && !plan.exclude_columns.contains(name)
                    && !original_names.contains(name)
            })
            .map(|(i, _)| i)
            .collect::<Vec<_>>();
        let mut columns = original.columns.clone();
        columns.extend(picked.iter().map(|&i| joining.columns[i].clone()));
        let mut out = Table::new(columns);
        for row in &original.rows {
            let matches = joining
                .rows
                .iter()
                .filter(|j| !row[on_left].is_null() && j[on_right] == row[on_left])
                .collect::<Vec<_>>();
            if matches.is_empty() {
                let mut joined = row.clone();
                joined.extend(picked.iter().map(|_| Value::Null));
                out.rows.push(joined);
            } else {
                for m in matches {
                    let mut joined = row.clone();
                    joined.extend(picked.iter().map(|&i| m[i].clone()));
                    out.rows.push(joined);
                }
            }
        }
        tables.insert(plan.output_table.clone(), out);
        Ok(())
    }
}

#[async_trait::async_trait]
impl SpatialStore for MemoryStore {
    async fn srid_of(&self, table: &str, geometry: &str) -> Result<Option<i32>> {
        let tables = self.lock();
        let t = tables
            .get(table)
            .ok_or_else(|| Error::MissingTable(table.to_string()))?;
        t.require(table, geometry)?;
        if t.rows.is_empty() {
            return Ok(None);
        }
        Ok(t.srid)
    }

    async fn rebuild_buffered(&self, plan: &BufferPlan) -> Result<()> {
        let mut tables = self.lock();
        let source = tables
            .get(&plan.source_table)
            .ok_or_else(|| Error::MissingTable(plan.source_table.clone()))?;
        let uid = source.require(&plan.source_table, &plan.unique_id)?;
        let geom = source.require(&plan.source_table, &plan.source_geometry)?;
        let uid_type = source.columns[uid].1;
        let rows = source
            .rows
            .iter()
            .map(|row| {
                let buffered = match &row[geom] {
                    Value::Geometry(g) => buffered(g, plan.distance)
                        .map(Value::Geometry)
                        .unwrap_or(Value::Null),
                    _ => Value::Null,
                };
                vec![row[uid].clone(), buffered]
            })
            .collect::<Vec<_>>();
        let mut table = Table::new(vec![
            (plan.unique_id.clone(), uid_type),
            (plan.geometry_column.clone(), ColumnType::Geometry),
        ]);
        table.srid = Some(plan.srid);
        table.rows = rows;
        tables.insert(plan.table.clone(), table);
        Ok(())
    }

    async fn intersect_aggregate(&self, plan: &IntersectPlan) -> Result<()> {
        let mut tables = self.lock();
        let hazard = tables
            .get(&plan.hazard_table)
            .ok_or_else(|| Error::MissingTable(plan.hazard_table.clone()))?
            .clone();
        let hazard_geom = hazard.require(&plan.hazard_table, &plan.hazard_geometry)?;
        let field = hazard.require(&plan.hazard_table, &plan.value_field)?;
        let t = tables
            .get_mut(&plan.table)
            .ok_or_else(|| Error::MissingTable(plan.table.clone()))?;
        let geom = t.require(&plan.table, &plan.geometry_column)?;
        let target = t.require(&plan.table, &plan.target_column)?;
        for row in &mut t.rows {
            let Value::Geometry(buffered) = &row[geom] else {
                continue;
            };
            let mut values = hazard
                .rows
                .iter()
                .filter(|j| match &j[hazard_geom] {
                    Value::Geometry(g) => buffered.intersects(g),
                    _ => false,
                })
                .filter_map(|j| j[field].as_text())
                .collect::<Vec<_>>();
            // array_agg(DISTINCT ...) sorts while deduplicating.
            values.sort();
            values.dedup();
            if !values.is_empty() {
                row[target] = Value::TextArray(values);
            }
        }
        Ok(())
    }

    async fn filter_array(
        &self,
        table: &str,
        source: &str,
        target: &str,
        rule: &FilterRule,
    ) -> Result<()> {
        let mut tables = self.lock();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| Error::MissingTable(table.to_string()))?;
        let src = t.require(table, source)?;
        let dst = t.require(table, target)?;
        let mut results = Vec::with_capacity(t.rows.len());
        for row in &t.rows {
            let Value::TextArray(values) = &row[src] else {
                results.push(Value::Null);
                continue;
            };
            let mut kept = Vec::new();
            for value in values {
                let passes = match rule {
                    FilterRule::AnyOf(allowed) => allowed.contains(value),
                    FilterRule::Compare {
                        op,
                        threshold,
                        cast,
                    } => op.applies(parse_number(value, *cast)?, *threshold),
                };
                if passes {
                    kept.push(value.clone());
                }
            }
            results.push(if kept.is_empty() {
                Value::Null
            } else {
                Value::TextArray(kept)
            });
        }
        for (row, result) in t.rows.iter_mut().zip(results) {
            row[dst] = result;
        }
        Ok(())
    }

    async fn reduce_array(
        &self,
        table: &str,
        source: &str,
        target: &str,
        plan: &ReducePlan,
    ) -> Result<()> {
        let mut tables = self.lock();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| Error::MissingTable(table.to_string()))?;
        let src = t.require(table, source)?;
        let dst = t.require(table, target)?;
        let mut results = Vec::with_capacity(t.rows.len());
        for row in &t.rows {
            let Value::TextArray(values) = &row[src] else {
                results.push(Value::Null);
                continue;
            };
            if values.is_empty() {
                results.push(Value::Null);
                continue;
            }
            let reduced = match plan {
                ReducePlan::OrdinalRank(order) => {
                    let best = values
                        .iter()
                        .enumerate()
                        .max_by_key(|(at, value)| {
                            // Unranked values sort below every ranked one;
                            // earlier elements win ties, like LIMIT 1.
                            let rank = order.iter().position(|o| o == *value);
                            (rank.is_some(), rank, std::cmp::Reverse(*at))
                        })
                        .map(|(_, value)| value.clone());
                    best.map(Value::Text).unwrap_or(Value::Null)
                }
                ReducePlan::Concat => Value::Text(values.join(",")),
                ReducePlan::Numeric { direction, cast } => {
                    let mut parsed = Vec::with_capacity(values.len());
                    for value in values {
                        parsed.push(parse_number(value, *cast)?);
                    }
                    let chosen = match direction {
                        Direction::Desc => parsed.iter().cloned().fold(f64::MIN, f64::max),
                        Direction::Asc => parsed.iter().cloned().fold(f64::MAX, f64::min),
                    };
                    match cast {
                        NumCast::Int => Value::Int(chosen as i64),
                        NumCast::Double => Value::Double(chosen),
                    }
                }
            };
            results.push(reduced);
        }
        for (row, result) in t.rows.iter_mut().zip(results) {
            row[dst] = result;
        }
        Ok(())
    }

    async fn flag_nonnull(&self, table: &str, source: &str, target: &str) -> Result<()> {
        let mut tables = self.lock();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| Error::MissingTable(table.to_string()))?;
        let src = t.require(table, source)?;
        let dst = t.require(table, target)?;
        for row in &mut t.rows {
            row[dst] = Value::Bool(!row[src].is_null());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::point;

    fn store_with_sites() -> MemoryStore {
        let store = MemoryStore::new();
        futures::executor::block_on(async {
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
                    &[vec![
                        Value::Int(1),
                        Value::Geometry(point! { x: 0.0, y: 0.0 }.into()),
                    ]],
                )
                .await
                .unwrap();
        });
        store.set_srid("sites", 4326);
        store
    }

    #[tokio::test]
    async fn ensure_column_is_idempotent() {
        let store = store_with_sites();
        store
            .ensure_column("sites", "flood_intersect", ColumnType::TextArray)
            .await
            .unwrap();
        assert!(store.column_exists("sites", "flood_intersect").await.unwrap());
        store
            .ensure_column("sites", "flood_intersect", ColumnType::TextArray)
            .await
            .unwrap();
        let names = store.columns_of("sites").await.unwrap();
        assert_eq!(
            names.iter().filter(|n| *n == "flood_intersect").count(),
            1
        );
    }

    #[tokio::test]
    async fn retype_converts_existing_values() {
        let store = store_with_sites();
        store
            .add_column("sites", "flood_max", ColumnType::Text)
            .await
            .unwrap();
        store
            .bulk_insert("sites", &["flood_max".into()], &[vec![Value::Text("12".into())]])
            .await
            .unwrap();
        store
            .retype_column("sites", "flood_max", ColumnType::Integer)
            .await
            .unwrap();
        let values = store.column_values("sites", "flood_max").unwrap();
        assert!(values.contains(&Value::Int(12)));
    }

    #[tokio::test]
    async fn missing_source_table_is_fatal() {
        let store = MemoryStore::new();
        let err = store.srid_of("nowhere", "geometry").await.unwrap_err();
        assert!(matches!(err, Error::MissingTable(_)));
    }

    #[tokio::test]
    async fn empty_source_has_no_srid() {
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
        store.set_srid("sites", 4326);
        assert_eq!(store.srid_of("sites", "geometry").await.unwrap(), None);
    }

    #[tokio::test]
    async fn remove_columns_honors_trails() {
        let store = store_with_sites();
        store.add_column("sites", "flood_bool", ColumnType::Boolean).await.unwrap();
        store.add_column("sites", "quake_bool", ColumnType::Boolean).await.unwrap();
        store
            .remove_columns("sites", &[], &["_bool".to_string()])
            .await
            .unwrap();
        let names = store.columns_of("sites").await.unwrap();
        assert_eq!(names, vec!["site_id".to_string(), "geometry".to_string()]);
    }
}
