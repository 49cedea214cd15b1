//! Build pipeline for derived output tables.
//!
//! Operations are a closed command set deserialized straight from
//! configuration, so an unknown operation name or malformed parameter set
//! fails at load time instead of mid-run. Dispatch is an explicit match
//! onto Table Store operations.

pub mod manager;

pub use manager::OutputTable;
pub use manager::PublishingManager;

use crate::error::Result;
use crate::store::ColumnType;
use crate::store::LeftJoinPlan;
use crate::store::Store;
use serde::Deserialize;
use std::collections::BTreeMap;

/// One step in a build sequence.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum BuildOp {
    /// Drop and rebuild `new_table` with a serial id plus the given
    /// columns, copied over from `original_table`.
    CopyTable {
        new_table: String,
        original_table: String,
        columns: BTreeMap<String, ColumnType>,
    },
    InsertSelect {
        new_table: String,
        original_table: String,
        columns: Vec<String>,
    },
    LeftJoinTable {
        join_column: String,
        original_table: String,
        joining_table: String,
        output_table: String,
        #[serde(default)]
        include_columns: Vec<String>,
        #[serde(default)]
        exclude_columns: Vec<String>,
    },
    AddColumn {
        table_name: String,
        column_name: String,
        column_type: ColumnType,
    },
    RemoveColumns {
        table_name: String,
        #[serde(default)]
        remove_columns: Vec<String>,
        #[serde(default)]
        remove_columns_trails: Vec<String>,
    },
    ClearTable {
        table_name: String,
    },
    SetPrimaryKey {
        table_name: String,
        primary_key: String,
    },
}

impl BuildOp {
    pub async fn execute(&self, store: &dyn Store) -> Result<()> {
        log::debug!("executing build op ({})", self.kind());
        match self {
            Self::CopyTable {
                new_table,
                original_table,
                columns,
            } => {
                let columns = columns
                    .iter()
                    .map(|(name, ty)| (name.clone(), *ty))
                    .collect::<Vec<_>>();
                store.copy_table(new_table, original_table, &columns).await
            }
            Self::InsertSelect {
                new_table,
                original_table,
                columns,
            } => store.insert_select(new_table, original_table, columns).await,
            Self::LeftJoinTable {
                join_column,
                original_table,
                joining_table,
                output_table,
                include_columns,
                exclude_columns,
            } => {
                store
                    .left_join_into(&LeftJoinPlan {
                        join_column: join_column.clone(),
                        original_table: original_table.clone(),
                        joining_table: joining_table.clone(),
                        output_table: output_table.clone(),
                        include_columns: include_columns.clone(),
                        exclude_columns: exclude_columns.clone(),
                    })
                    .await
            }
            Self::AddColumn {
                table_name,
                column_name,
                column_type,
            } => store.add_column(table_name, column_name, *column_type).await,
            Self::RemoveColumns {
                table_name,
                remove_columns,
                remove_columns_trails,
            } => {
                store
                    .remove_columns(table_name, remove_columns, remove_columns_trails)
                    .await
            }
            Self::ClearTable { table_name } => store.truncate(table_name).await,
            Self::SetPrimaryKey {
                table_name,
                primary_key,
            } => store.set_primary_key(table_name, primary_key).await,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::CopyTable { .. } => "copy_table",
            Self::InsertSelect { .. } => "insert_select",
            Self::LeftJoinTable { .. } => "left_join_table",
            Self::AddColumn { .. } => "add_column",
            Self::RemoveColumns { .. } => "remove_columns",
            Self::ClearTable { .. } => "clear_table",
            Self::SetPrimaryKey { .. } => "set_primary_key",
        }
    }
}
