//! PostGIS backend: every contract operation is assembled by `sql` and
//! pushed with `batch_execute`, so each call runs in its own implicit
//! transaction and either commits whole or leaves the previous state.

use super::sql;
use super::BufferPlan;
use super::ColumnType;
use super::IntersectPlan;
use super::LeftJoinPlan;
use super::SpatialStore;
use super::Store;
use super::Value;
use crate::error::Result;
use crate::hazard::FilterRule;
use crate::hazard::ReducePlan;
use tokio_postgres::Client;

#[async_trait::async_trait]
impl Store for Client {
    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(!self.query(&sql::table_exists(table), &[]).await?.is_empty())
    }

    async fn column_exists(&self, table: &str, column: &str) -> Result<bool> {
        Ok(!self
            .query(&sql::column_exists(table, column), &[])
            .await?
            .is_empty())
    }

    async fn columns_of(&self, table: &str) -> Result<Vec<String>> {
        Ok(self
            .query(&sql::columns_of(table), &[])
            .await?
            .into_iter()
            .map(|row| row.get::<_, String>(0))
            .collect())
    }

    async fn create_table(&self, table: &str, columns: &[(String, ColumnType)]) -> Result<()> {
        self.batch_execute(&sql::create_table(table, columns)).await?;
        log::debug!("created table ({})", table);
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> Result<()> {
        self.batch_execute(&sql::drop_table(table)).await?;
        Ok(())
    }

    async fn rename_table(&self, from: &str, to: &str) -> Result<()> {
        self.batch_execute(&sql::rename_table(from, to)).await?;
        Ok(())
    }

    async fn add_column(&self, table: &str, column: &str, ty: ColumnType) -> Result<()> {
        self.batch_execute(&sql::add_column(table, column, ty)).await?;
        log::debug!("added column ({}.{})", table, column);
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
        if self.column_exists(table, column).await? {
            self.batch_execute(&sql::retype_column(table, column, ty))
                .await?;
            Ok(())
        } else {
            self.add_column(table, column, ty).await
        }
    }

    async fn remove_columns(
        &self,
        table: &str,
        names: &[String],
        trails: &[String],
    ) -> Result<()> {
        for name in names {
            self.batch_execute(&sql::drop_column(table, name)).await?;
        }
        for trail in trails {
            let trailing = self
                .query(&sql::columns_with_trail(table, trail), &[])
                .await?
                .into_iter()
                .map(|row| row.get::<_, String>(0))
                .collect::<Vec<_>>();
            for name in trailing {
                self.batch_execute(&sql::drop_column(table, &name)).await?;
            }
        }
        Ok(())
    }

    async fn clear_column(&self, table: &str, column: &str) -> Result<()> {
        self.batch_execute(&sql::clear_column(table, column)).await?;
        Ok(())
    }

    async fn truncate(&self, table: &str) -> Result<()> {
        self.batch_execute(&sql::truncate(table)).await?;
        Ok(())
    }

    async fn set_primary_key(&self, table: &str, column: &str) -> Result<()> {
        self.batch_execute(&sql::set_primary_key(table, column)).await?;
        Ok(())
    }

    async fn bulk_insert(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        self.batch_execute(&sql::insert(table, columns, rows)).await?;
        Ok(rows.len() as u64)
    }

    async fn insert_select(&self, target: &str, source: &str, columns: &[String]) -> Result<()> {
        self.batch_execute(&sql::insert_select(target, source, columns))
            .await?;
        Ok(())
    }

    async fn left_join_into(&self, plan: &LeftJoinPlan) -> Result<()> {
        let original = self.columns_of(&plan.original_table).await?;
        let mut joining = self.columns_of(&plan.joining_table).await?;
        if !plan.include_columns.is_empty() {
            joining.retain(|c| plan.include_columns.contains(c));
        }
        joining.retain(|c| !plan.exclude_columns.contains(c));
        joining.retain(|c| !original.contains(c));
        // Rebuilding a table onto itself goes through a staging name.
        let staging = format!("{}__rebuild", plan.original_table);
        let output = if plan.output_table == plan.original_table {
            staging.as_str()
        } else {
            plan.output_table.as_str()
        };
        self.drop_table(output).await?;
        self.batch_execute(&sql::left_join(
            output,
            &plan.original_table,
            &plan.joining_table,
            &plan.join_column,
            &original,
            &joining,
        ))
        .await?;
        if output == staging {
            self.drop_table(&plan.original_table).await?;
            self.rename_table(&staging, &plan.original_table).await?;
        }
        log::debug!(
            "joined {} onto {} as {}",
            plan.joining_table,
            plan.original_table,
            plan.output_table
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl SpatialStore for Client {
    async fn srid_of(&self, table: &str, geometry: &str) -> Result<Option<i32>> {
        let row = self.query_opt(&sql::srid_of(table, geometry), &[]).await?;
        Ok(row.and_then(|r| r.get::<_, Option<i32>>(0)))
    }

    async fn rebuild_buffered(&self, plan: &BufferPlan) -> Result<()> {
        self.batch_execute(&sql::rebuild_buffered(plan)).await?;
        Ok(())
    }

    async fn intersect_aggregate(&self, plan: &IntersectPlan) -> Result<()> {
        self.batch_execute(&sql::intersect_aggregate(plan)).await?;
        Ok(())
    }

    async fn filter_array(
        &self,
        table: &str,
        source: &str,
        target: &str,
        rule: &FilterRule,
    ) -> Result<()> {
        self.batch_execute(&sql::filter_array(table, source, target, rule))
            .await?;
        Ok(())
    }

    async fn reduce_array(
        &self,
        table: &str,
        source: &str,
        target: &str,
        plan: &ReducePlan,
    ) -> Result<()> {
        self.batch_execute(&sql::reduce_array(table, source, target, plan))
            .await?;
        Ok(())
    }

    async fn flag_nonnull(&self, table: &str, source: &str, target: &str) -> Result<()> {
        self.batch_execute(&sql::flag_nonnull(table, source, target))
            .await?;
        Ok(())
    }
}
