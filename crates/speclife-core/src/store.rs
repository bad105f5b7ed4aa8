//! Persistence for verify outcomes and workspace settings.
//!
//! # Table design
//!
//! Two tables, both `&[u8] → &[u8]` with UTF-8 string keys and JSON values:
//!
//! ```text
//! verify_outcomes   "{workspace}:{provider}.{change}" → VerifyOutcome
//! settings          "{workspace}"                     → WorkspaceSettings
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use redb::{Database, ReadableTableMetadata, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{LifecycleError, Result};
use crate::ports::{LifecycleStore, VerifyOutcome, WorkspaceSettings};

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

const VERIFY: TableDefinition<&[u8], &[u8]> = TableDefinition::new("verify_outcomes");
const SETTINGS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("settings");

type Table = TableDefinition<'static, &'static [u8], &'static [u8]>;

fn store_err(e: impl std::fmt::Display) -> LifecycleError {
    LifecycleError::Store(e.to_string())
}

// ---------------------------------------------------------------------------
// StateDb
// ---------------------------------------------------------------------------

/// redb-backed [`LifecycleStore`], normally at `.speclife/state.redb`.
pub struct StateDb {
    db: Database,
}

impl StateDb {
    /// Open or create the database at `path`, creating both tables.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(store_err)?;
        let wt = db.begin_write().map_err(store_err)?;
        wt.open_table(VERIFY).map_err(store_err)?;
        wt.open_table(SETTINGS).map_err(store_err)?;
        wt.commit().map_err(store_err)?;
        Ok(Self { db })
    }

    fn get<T: DeserializeOwned>(&self, table: Table, key: &str) -> Result<Option<T>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(table).map_err(store_err)?;
        let Some(value) = table.get(key.as_bytes()).map_err(store_err)? else {
            return Ok(None);
        };
        let parsed = serde_json::from_slice(value.value()).map_err(store_err)?;
        Ok(Some(parsed))
    }

    fn put<T: Serialize>(&self, table: Table, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value).map_err(store_err)?;
        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = wt.open_table(table).map_err(store_err)?;
            table
                .insert(key.as_bytes(), bytes.as_slice())
                .map_err(store_err)?;
        }
        wt.commit().map_err(store_err)?;
        Ok(())
    }

    /// Number of persisted verify outcomes.
    pub fn verify_count(&self) -> Result<u64> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(VERIFY).map_err(store_err)?;
        table.len().map_err(store_err)
    }
}

impl LifecycleStore for StateDb {
    fn verify_outcome(&self, key: &str) -> Result<Option<VerifyOutcome>> {
        self.get(VERIFY, key)
    }

    fn record_verify(&self, key: &str, outcome: &VerifyOutcome) -> Result<()> {
        self.put(VERIFY, key, outcome)
    }

    fn settings(&self, workspace_id: &str) -> Result<Option<WorkspaceSettings>> {
        self.get(SETTINGS, workspace_id)
    }

    fn save_settings(&self, workspace_id: &str, settings: &WorkspaceSettings) -> Result<()> {
        self.put(SETTINGS, workspace_id, settings)
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Non-persistent [`LifecycleStore`] for tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryStore {
    verify: Mutex<HashMap<String, VerifyOutcome>>,
    settings: Mutex<HashMap<String, WorkspaceSettings>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> LifecycleError {
    LifecycleError::Store("memory store lock poisoned".to_string())
}

impl LifecycleStore for MemoryStore {
    fn verify_outcome(&self, key: &str) -> Result<Option<VerifyOutcome>> {
        Ok(self.verify.lock().map_err(poisoned)?.get(key).cloned())
    }

    fn record_verify(&self, key: &str, outcome: &VerifyOutcome) -> Result<()> {
        self.verify
            .lock()
            .map_err(poisoned)?
            .insert(key.to_string(), outcome.clone());
        Ok(())
    }

    fn settings(&self, workspace_id: &str) -> Result<Option<WorkspaceSettings>> {
        Ok(self.settings.lock().map_err(poisoned)?.get(workspace_id).cloned())
    }

    fn save_settings(&self, workspace_id: &str, settings: &WorkspaceSettings) -> Result<()> {
        self.settings
            .lock()
            .map_err(poisoned)?
            .insert(workspace_id.to_string(), settings.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
