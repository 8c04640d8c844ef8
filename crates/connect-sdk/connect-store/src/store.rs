use std::sync::{Mutex, MutexGuard};

use connect_sdk::kv::{KeyValueStore, Transform};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};

use crate::error::StoreError;
use crate::models::{EntryRow, NewEntryRow};
use crate::schema::kv_entries;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// SQLite-backed [`KeyValueStore`].
///
/// Diesel's `SqliteConnection` needs `&mut` for every query, so the
/// connection sits behind a mutex. Each `update` runs in one transaction
/// while holding it, which serializes read-modify-write cycles.
pub struct SqliteStore {
    conn: Mutex<SqliteConnection>,
}

impl SqliteStore {
    /// Open (or create) a store at the given file path. Runs migrations automatically.
    pub fn open(path: &str) -> crate::Result<Self> {
        Self::from_connection(SqliteConnection::establish(path)?)
    }

    /// Open an in-memory store for tests.
    pub fn open_in_memory() -> crate::Result<Self> {
        Self::from_connection(SqliteConnection::establish(":memory:")?)
    }

    fn from_connection(mut conn: SqliteConnection) -> crate::Result<Self> {
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> crate::Result<MutexGuard<'_, SqliteConnection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Every stored row, ordered by key.
    pub fn entries(&self) -> crate::Result<Vec<EntryRow>> {
        let mut conn = self.lock()?;
        Ok(kv_entries::table
            .order(kv_entries::key.asc())
            .select(EntryRow::as_select())
            .load(&mut *conn)?)
    }

    fn load(conn: &mut SqliteConnection, key: &str) -> crate::Result<Option<String>> {
        Ok(kv_entries::table
            .find(key)
            .select(kv_entries::value)
            .first::<String>(conn)
            .optional()?)
    }

    fn get_entry(&self, key: &str) -> crate::Result<Option<String>> {
        let mut conn = self.lock()?;
        Self::load(&mut conn, key)
    }

    fn update_entry(&self, key: &str, transform: &mut Transform<'_>) -> crate::Result<String> {
        let mut conn = self.lock()?;
        conn.transaction::<_, StoreError, _>(|conn| {
            let current = Self::load(conn, key)?;
            let next = transform(current).map_err(StoreError::Transform)?;
            diesel::replace_into(kv_entries::table)
                .values(&NewEntryRow {
                    key,
                    value: &next,
                    updated_at: chrono::Utc::now().to_rfc3339(),
                })
                .execute(conn)?;
            Ok(next)
        })
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, connect_sdk::StoreError> {
        Ok(self.get_entry(key)?)
    }

    fn update(
        &self,
        key: &str,
        transform: &mut Transform<'_>,
    ) -> Result<String, connect_sdk::StoreError> {
        let written = self.update_entry(key, transform)?;
        log::trace!("stored {key} ({} bytes)", written.len());
        Ok(written)
    }
}
