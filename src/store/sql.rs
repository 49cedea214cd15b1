//! PostGIS statement builders.
//!
//! Identifiers are validated at configuration load (`store::valid_ident`),
//! so builders splice them directly. String values always go through
//! `quote`.

use super::BufferPlan;
use super::ColumnType;
use super::IntersectPlan;
use super::Value;
use crate::hazard::Direction;
use crate::hazard::FilterRule;
use crate::hazard::NumCast;
use crate::hazard::ReducePlan;

/// Single-quoted SQL string literal.
pub fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn array(values: &[String]) -> String {
    if values.is_empty() {
        "ARRAY[]::text[]".to_string()
    } else {
        format!(
            "ARRAY[{}]",
            values.iter().map(|v| quote(v)).collect::<Vec<_>>().join(", ")
        )
    }
}

fn cast(cast: NumCast) -> &'static str {
    match cast {
        NumCast::Int => "int",
        NumCast::Double => "double precision",
    }
}

/// Numeric literal; integer casts render whole thresholds without a
/// fractional part so they compare cleanly against int columns.
fn number(value: f64, c: NumCast) -> String {
    match c {
        NumCast::Int if value.fract() == 0.0 => format!("{}", value as i64),
        _ => format!("{}", value),
    }
}

pub fn column_type(ty: ColumnType) -> &'static str {
    match ty {
        ColumnType::Serial => "SERIAL PRIMARY KEY",
        ColumnType::Integer => "int",
        ColumnType::Double => "double precision",
        ColumnType::Text => "text",
        ColumnType::TextArray => "text[]",
        ColumnType::Boolean => "boolean",
        ColumnType::Geometry => "geometry",
    }
}

fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Double(d) => d.to_string(),
        Value::Text(s) => quote(s),
        Value::TextArray(vs) => array(vs),
        Value::GeoJson(json) => format!("ST_SetSRID(ST_GeomFromGeoJSON({}), 4326)", quote(json)),
        Value::Geometry(_) => "NULL".to_string(),
    }
}

pub fn table_exists(table: &str) -> String {
    format!(
        "SELECT 1 FROM information_schema.tables WHERE table_name = {}",
        quote(table)
    )
}

pub fn column_exists(table: &str, column: &str) -> String {
    format!(
        "SELECT 1 FROM information_schema.columns WHERE table_name = {} AND column_name = {}",
        quote(table),
        quote(column)
    )
}

pub fn columns_of(table: &str) -> String {
    format!(
        "SELECT column_name FROM information_schema.columns WHERE table_name = {} ORDER BY ordinal_position",
        quote(table)
    )
}

pub fn create_table(table: &str, columns: &[(String, ColumnType)]) -> String {
    let columns = columns
        .iter()
        .map(|(name, ty)| format!("{} {}", name, column_type(*ty)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE {} ({})", table, columns)
}

pub fn drop_table(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", table)
}

pub fn rename_table(from: &str, to: &str) -> String {
    format!("ALTER TABLE {} RENAME TO {}", from, to)
}

pub fn add_column(table: &str, column: &str, ty: ColumnType) -> String {
    format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, column_type(ty))
}

pub fn retype_column(table: &str, column: &str, ty: ColumnType) -> String {
    format!(
        "ALTER TABLE {t} ALTER COLUMN {c} TYPE {ty} USING {c}::{ty}",
        t = table,
        c = column,
        ty = column_type(ty)
    )
}

pub fn drop_column(table: &str, column: &str) -> String {
    format!("ALTER TABLE {} DROP COLUMN IF EXISTS {}", table, column)
}

pub fn columns_with_trail(table: &str, trail: &str) -> String {
    format!(
        "SELECT column_name FROM information_schema.columns WHERE table_name = {} AND column_name LIKE {}",
        quote(table),
        quote(&format!("%{}", trail))
    )
}

pub fn clear_column(table: &str, column: &str) -> String {
    format!("UPDATE {} SET {} = NULL", table, column)
}

pub fn truncate(table: &str) -> String {
    format!("TRUNCATE TABLE {}", table)
}

pub fn set_primary_key(table: &str, column: &str) -> String {
    format!(
        "ALTER TABLE {t} DROP CONSTRAINT IF EXISTS {t}_pkey; ALTER TABLE {t} ADD PRIMARY KEY ({c});",
        t = table,
        c = column
    )
}

pub fn insert(table: &str, columns: &[String], rows: &[Vec<Value>]) -> String {
    let rows = rows
        .iter()
        .map(|row| {
            format!(
                "({})",
                row.iter().map(literal).collect::<Vec<_>>().join(", ")
            )
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        table,
        columns.join(", "),
        rows
    )
}

pub fn insert_select(target: &str, source: &str, columns: &[String]) -> String {
    let columns = columns.join(", ");
    format!(
        "INSERT INTO {} ({c}) SELECT {c} FROM {}",
        target,
        source,
        c = columns
    )
}

pub fn srid_of(table: &str, geometry: &str) -> String {
    format!("SELECT ST_SRID({}) AS srid FROM {} LIMIT 1", geometry, table)
}

/// Working-table rebuild: drop, recreate from the buffered source
/// selection, and index. One batch, one implicit transaction.
pub fn rebuild_buffered(plan: &BufferPlan) -> String {
    format!(
        "DROP TABLE IF EXISTS {table};
         CREATE TABLE {table} AS
         SELECT {uid},
                ST_Buffer({src_geom}, {distance}, 'quad_segs={qs}')::geometry(MULTIPOLYGON, {srid}) AS {geom}
         FROM {source};
         CREATE INDEX {table}_geom_idx ON {table} USING GIST ({geom});",
        table = plan.table,
        uid = plan.unique_id,
        src_geom = plan.source_geometry,
        distance = plan.distance,
        qs = plan.quad_segs,
        srid = plan.srid,
        geom = plan.geometry_column,
        source = plan.source_table,
    )
}

/// Spatial join aggregate. Inner-join semantics: only rows with at least
/// one intersecting hazard feature are updated, everything else keeps the
/// null the column was reset to. `DISTINCT` dedupes repeated values; the
/// text cast keeps numeric hazard fields compatible with the text array.
pub fn intersect_aggregate(plan: &IntersectPlan) -> String {
    format!(
        "UPDATE {table} AS t
         SET {target} = subquery.hazard_values
         FROM (
             SELECT t.{uid}, array_agg(DISTINCT j.{field}::text) AS hazard_values
             FROM {table} t
             JOIN {hazard} j
             ON ST_Intersects(t.{geom}, j.{hazard_geom})
             GROUP BY t.{uid}
         ) AS subquery
         WHERE t.{uid} = subquery.{uid}",
        table = plan.table,
        target = plan.target_column,
        uid = plan.unique_id,
        field = plan.value_field,
        hazard = plan.hazard_table,
        geom = plan.geometry_column,
        hazard_geom = plan.hazard_geometry,
    )
}

pub fn filter_array(table: &str, source: &str, target: &str, rule: &FilterRule) -> String {
    let predicate = match rule {
        FilterRule::AnyOf(values) => format!("val = ANY({})", array(values)),
        FilterRule::Compare { op, threshold, cast: c } => {
            format!("val::{} {} {}", cast(*c), op, number(*threshold, *c))
        }
    };
    format!(
        "UPDATE {table}
         SET {target} = (
             SELECT array_agg(val)
             FROM unnest({source}) AS val
             WHERE {predicate}
         )",
        table = table,
        target = target,
        source = source,
        predicate = predicate,
    )
}

pub fn reduce_array(table: &str, source: &str, target: &str, plan: &ReducePlan) -> String {
    match plan {
        // Rank by position in the configured order; values missing from the
        // order sort after every ranked one.
        ReducePlan::OrdinalRank(order) => {
            let whens = order
                .iter()
                .enumerate()
                .map(|(i, v)| format!("WHEN {} THEN {}", quote(v), i))
                .collect::<Vec<_>>()
                .join(" ");
            format!(
                "UPDATE {table}
                 SET {target} = (
                     SELECT val
                     FROM unnest({source}) AS val
                     ORDER BY CASE val {whens} END DESC NULLS LAST
                     LIMIT 1
                 )::text",
                table = table,
                target = target,
                source = source,
                whens = whens,
            )
        }
        ReducePlan::Concat => format!(
            "UPDATE {table}
             SET {target} = (
                 SELECT string_agg(val, ',')
                 FROM unnest({source}) AS val
             )::text",
            table = table,
            target = target,
            source = source,
        ),
        ReducePlan::Numeric { direction, cast: c } => {
            let order = match direction {
                Direction::Desc => "DESC",
                Direction::Asc => "ASC",
            };
            format!(
                "UPDATE {table}
                 SET {target} = (
                     SELECT val::{cast}
                     FROM unnest({source}) AS val
                     ORDER BY val::{cast} {order}
                     LIMIT 1
                 )",
                table = table,
                target = target,
                source = source,
                cast = cast(*c),
                order = order,
            )
        }
    }
}

pub fn flag_nonnull(table: &str, source: &str, target: &str) -> String {
    format!(
        "UPDATE {table}
         SET {target} = CASE
             WHEN {source} IS NOT NULL THEN TRUE
             ELSE FALSE
         END",
        table = table,
        target = target,
        source = source,
    )
}

/// Left-join rebuild given the already-resolved column split.
pub fn left_join(
    output: &str,
    original: &str,
    joining: &str,
    join_column: &str,
    original_columns: &[String],
    joining_columns: &[String],
) -> String {
    let select = original_columns
        .iter()
        .map(|c| format!("{}.{}", original, c))
        .chain(joining_columns.iter().map(|c| format!("{}.{}", joining, c)))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE TABLE {output} AS
         SELECT {select}
         FROM {original}
         LEFT JOIN {joining}
         ON {original}.{on} = {joining}.{on}",
        output = output,
        select = select,
        original = original,
        joining = joining,
        on = join_column,
    )
}
