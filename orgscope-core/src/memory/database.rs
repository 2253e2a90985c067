//! Shared tenant-owned tables with a fail-closed row filter.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{ScopeError, ScopeResult};
use crate::tenant::OrgId;

/// One tenant-owned row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Row id.
    pub id: Uuid,
    /// Owning organization.
    pub organization_id: OrgId,
    /// Opaque payload.
    pub body: String,
}

/// The row filter predicate: the organization the session may see.
///
/// Mirrors the SQL function generated by [`RlsManager`](crate::tenant::RlsManager):
/// an absent, empty or malformed session value yields `None`, and `None`
/// matches no row.
pub fn current_org(session_value: Option<&str>) -> Option<OrgId> {
    let raw = session_value?.trim();
    if raw.is_empty() {
        return None;
    }
    OrgId::parse(raw).ok()
}

/// In-memory tables shared by every simulated connection.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    tables: Arc<Mutex<HashMap<String, Vec<Record>>>>,
}

impl MemoryDatabase {
    /// Create an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows of `table` visible to a session with the given value (`USING` clause).
    pub(crate) fn select(&self, table: &str, session_value: Option<&str>) -> Vec<Record> {
        let Some(org) = current_org(session_value) else {
            return Vec::new();
        };
        self.tables
            .lock()
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|r| r.organization_id == org)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Insert a row, enforcing the `WITH CHECK` clause.
    pub(crate) fn insert(
        &self,
        table: &str,
        session_value: Option<&str>,
        organization_id: OrgId,
        body: &str,
    ) -> ScopeResult<Record> {
        if current_org(session_value) != Some(organization_id) {
            return Err(ScopeError::policy_violation(format!(
                "new row violates row-level security policy for table \"{table}\""
            )));
        }

        let record = Record {
            id: Uuid::new_v4(),
            organization_id,
            body: body.to_string(),
        };
        self.tables
            .lock()
            .entry(table.to_string())
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    /// Update visible rows with the given id. Returns the number of rows changed.
    pub(crate) fn update(
        &self,
        table: &str,
        session_value: Option<&str>,
        id: Uuid,
        body: &str,
    ) -> u64 {
        let Some(org) = current_org(session_value) else {
            return 0;
        };
        let mut tables = self.tables.lock();
        let Some(rows) = tables.get_mut(table) else {
            return 0;
        };
        let mut changed = 0;
        for row in rows
            .iter_mut()
            .filter(|r| r.id == id && r.organization_id == org)
        {
            row.body = body.to_string();
            changed += 1;
        }
        changed
    }

    /// Delete visible rows with the given id. Returns the number of rows removed.
    pub(crate) fn delete(&self, table: &str, session_value: Option<&str>, id: Uuid) -> u64 {
        let Some(org) = current_org(session_value) else {
            return 0;
        };
        let mut tables = self.tables.lock();
        let Some(rows) = tables.get_mut(table) else {
            return 0;
        };
        let before = rows.len();
        rows.retain(|r| !(r.id == id && r.organization_id == org));
        (before - rows.len()) as u64
    }

    /// Total rows in `table`, ignoring the filter. For assertions only.
    pub fn unfiltered_count(&self, table: &str) -> usize {
        self.tables.lock().get(table).map_or(0, Vec::len)
    }
}
