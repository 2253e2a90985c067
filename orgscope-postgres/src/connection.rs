//! PostgreSQL connection wrapper.
//!
//! Every statement goes through deadpool's per-connection statement cache,
//! so the session binding statements are prepared once per physical
//! connection and then only executed.

use async_trait::async_trait;
use deadpool_postgres::Object;
use orgscope_core::{CURRENT_SETTING_SQL, SET_CONFIG_SQL, ScopeResult, SessionConnection};
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;
use tracing::debug;

use crate::error::PgResult;

/// A leased PostgreSQL connection.
pub struct PgConnection {
    client: Object,
}

impl PgConnection {
    pub(crate) fn new(client: Object) -> Self {
        Self { client }
    }

    pub(crate) fn into_object(self) -> Object {
        self.client
    }

    /// Execute a query and return all rows.
    pub async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> PgResult<Vec<Row>> {
        debug!(sql = %sql, "Executing query");
        let stmt = self.client.prepare_cached(sql).await?;
        Ok(self.client.query(&stmt, params).await?)
    }

    /// Execute a query and return exactly one row.
    pub async fn query_one(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> PgResult<Row> {
        debug!(sql = %sql, "Executing query_one");
        let stmt = self.client.prepare_cached(sql).await?;
        Ok(self.client.query_one(&stmt, params).await?)
    }

    /// Execute a query and return zero or one row.
    pub async fn query_opt(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> PgResult<Option<Row>> {
        debug!(sql = %sql, "Executing query_opt");
        let stmt = self.client.prepare_cached(sql).await?;
        Ok(self.client.query_opt(&stmt, params).await?)
    }

    /// Execute a statement and return the number of affected rows.
    pub async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> PgResult<u64> {
        debug!(sql = %sql, "Executing statement");
        let stmt = self.client.prepare_cached(sql).await?;
        Ok(self.client.execute(&stmt, params).await?)
    }

    /// Execute a batch of statements without parameters.
    pub async fn batch_execute(&self, sql: &str) -> PgResult<()> {
        debug!(sql = %sql, "Executing batch");
        self.client.batch_execute(sql).await?;
        Ok(())
    }

    /// Begin a transaction.
    ///
    /// The tenant binding is session scoped and stays in force inside it.
    pub async fn transaction(&mut self) -> PgResult<PgTransaction<'_>> {
        debug!("Beginning transaction");
        let txn = self.client.transaction().await?;
        Ok(PgTransaction { txn })
    }

    /// Whether the server closed the connection.
    pub fn is_closed(&self) -> bool {
        self.client.is_closed()
    }
}

#[async_trait]
impl SessionConnection for PgConnection {
    async fn set_config(&mut self, name: &str, value: &str) -> ScopeResult<String> {
        let row = self.query_one(SET_CONFIG_SQL, &[&name, &value]).await?;
        let reported: Option<String> = row.try_get(0).map_err(crate::PgError::from)?;
        Ok(reported.unwrap_or_default())
    }

    async fn current_setting(&mut self, name: &str) -> ScopeResult<Option<String>> {
        let row = self.query_one(CURRENT_SETTING_SQL, &[&name]).await?;
        let value: Option<String> = row.try_get(0).map_err(crate::PgError::from)?;
        Ok(value.filter(|v| !v.is_empty()))
    }
}

impl std::fmt::Debug for PgConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgConnection")
            .field("closed", &self.client.is_closed())
            .finish()
    }
}

/// A PostgreSQL transaction.
pub struct PgTransaction<'a> {
    txn: deadpool_postgres::Transaction<'a>,
}

impl PgTransaction<'_> {
    /// Execute a query and return all rows.
    pub async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> PgResult<Vec<Row>> {
        debug!(sql = %sql, "Executing query in transaction");
        let stmt = self.txn.prepare_cached(sql).await?;
        Ok(self.txn.query(&stmt, params).await?)
    }

    /// Execute a query and return exactly one row.
    pub async fn query_one(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> PgResult<Row> {
        let stmt = self.txn.prepare_cached(sql).await?;
        Ok(self.txn.query_one(&stmt, params).await?)
    }

    /// Execute a statement and return the number of affected rows.
    pub async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> PgResult<u64> {
        debug!(sql = %sql, "Executing statement in transaction");
        let stmt = self.txn.prepare_cached(sql).await?;
        Ok(self.txn.execute(&stmt, params).await?)
    }

    /// Commit the transaction.
    pub async fn commit(self) -> PgResult<()> {
        debug!("Committing transaction");
        self.txn.commit().await?;
        Ok(())
    }

    /// Roll back the transaction.
    pub async fn rollback(self) -> PgResult<()> {
        debug!("Rolling back transaction");
        self.txn.rollback().await?;
        Ok(())
    }
}
