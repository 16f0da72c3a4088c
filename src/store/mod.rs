pub mod access;
mod chat;
pub mod configs;
pub mod documents;
mod folders;
mod graphs;
pub mod models;
mod workflows;

use anyhow::Result;
use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

pub(crate) const DOCUMENTS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("documents");
pub(crate) const FOLDERS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("folders");
pub(crate) const GRAPHS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("graphs");
pub(crate) const WORKFLOWS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("workflows");
pub(crate) const WORKFLOW_RUNS_TABLE: TableDefinition<&str, &str> =
    TableDefinition::new("workflow_runs");
pub(crate) const CHAT_CONVERSATIONS_TABLE: TableDefinition<&str, &str> =
    TableDefinition::new("chat_conversations");
pub(crate) const MODEL_CONFIGS_TABLE: TableDefinition<&str, &str> =
    TableDefinition::new("model_configs");
pub(crate) const APPS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("apps");
pub(crate) const USAGE_LOGS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("usage_logs");
pub(crate) const USAGE_COUNTERS_TABLE: TableDefinition<&str, &str> =
    TableDefinition::new("usage_counters");

/// Durable store for every entity the service owns. All reads and writes go
/// through the caller's [`access::AccessFilter`]; "not found" and "not
/// permitted" are deliberately indistinguishable to callers.
pub struct MetadataStore {
    db: Arc<Database>,
    cloud: bool,
}

impl MetadataStore {
    pub fn open(path: &Path, cloud: bool) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Initialize tables
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(DOCUMENTS_TABLE)?;
            let _ = write_txn.open_table(FOLDERS_TABLE)?;
            let _ = write_txn.open_table(GRAPHS_TABLE)?;
            let _ = write_txn.open_table(WORKFLOWS_TABLE)?;
            let _ = write_txn.open_table(WORKFLOW_RUNS_TABLE)?;
            let _ = write_txn.open_table(CHAT_CONVERSATIONS_TABLE)?;
            let _ = write_txn.open_table(MODEL_CONFIGS_TABLE)?;
            let _ = write_txn.open_table(APPS_TABLE)?;
            let _ = write_txn.open_table(USAGE_LOGS_TABLE)?;
            let _ = write_txn.open_table(USAGE_COUNTERS_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(db),
            cloud,
        })
    }

    pub(crate) fn cloud(&self) -> bool {
        self.cloud
    }

    pub(crate) fn put<T: Serialize>(
        &self,
        table: TableDefinition<&str, &str>,
        key: &str,
        value: &T,
    ) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut t = write_txn.open_table(table)?;
            let val = serde_json::to_string(value)?;
            t.insert(key, val.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub(crate) fn get<T: DeserializeOwned>(
        &self,
        table: TableDefinition<&str, &str>,
        key: &str,
    ) -> Result<Option<T>> {
        let read_txn = self.db.begin_read()?;
        let t = read_txn.open_table(table)?;
        if let Some(val) = t.get(key)? {
            let value: T = serde_json::from_str(val.value())?;
            Ok(Some(value))
        } else {
            Ok(None)
        }
    }

    pub(crate) fn remove(&self, table: TableDefinition<&str, &str>, key: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let removed;
        {
            let mut t = write_txn.open_table(table)?;
            removed = t.remove(key)?.is_some();
        }
        write_txn.commit()?;
        Ok(removed)
    }

    pub(crate) fn scan<T: DeserializeOwned>(
        &self,
        table: TableDefinition<&str, &str>,
    ) -> Result<Vec<T>> {
        let read_txn = self.db.begin_read()?;
        let t = read_txn.open_table(table)?;
        let mut rows = Vec::new();
        for res in t.iter()? {
            let (_key, val) = res?;
            let row: T = serde_json::from_str(val.value())?;
            rows.push(row);
        }
        Ok(rows)
    }

    /// Read-modify-write of a single row inside one write transaction.
    /// The closure returns the replacement row, or `None` to leave the row
    /// unchanged. Returns whether the row existed.
    pub(crate) fn update_row<T, F>(
        &self,
        table: TableDefinition<&str, &str>,
        key: &str,
        mutate: F,
    ) -> Result<bool>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(T) -> Option<T>,
    {
        let write_txn = self.db.begin_write()?;
        let existed;
        {
            let mut t = write_txn.open_table(table)?;
            let current = t.get(key)?.map(|v| v.value().to_string());
            match current {
                Some(json) => {
                    existed = true;
                    let row: T = serde_json::from_str(&json)?;
                    if let Some(next) = mutate(row) {
                        let val = serde_json::to_string(&next)?;
                        t.insert(key, val.as_str())?;
                    }
                }
                None => existed = false,
            }
        }
        write_txn.commit()?;
        Ok(existed)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::MetadataStore;
    use crate::auth::{AuthContext, EntityType, Permission};
    use crate::store::models::{Document, Owner};

    pub fn open_store(cloud: bool) -> (tempfile::TempDir, MetadataStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(&dir.path().join("meta.redb"), cloud).unwrap();
        (dir, store)
    }

    pub fn developer_auth(entity_id: &str, app_id: Option<&str>) -> AuthContext {
        AuthContext {
            entity_type: EntityType::Developer,
            entity_id: entity_id.to_string(),
            app_id: app_id.map(String::from),
            user_id: None,
            permissions: [Permission::Read, Permission::Write, Permission::Admin]
                .into_iter()
                .collect(),
        }
    }

    pub fn user_auth(entity_id: &str, user_id: Option<&str>) -> AuthContext {
        AuthContext {
            entity_type: EntityType::User,
            entity_id: entity_id.to_string(),
            app_id: None,
            user_id: user_id.map(String::from),
            permissions: [Permission::Read, Permission::Write].into_iter().collect(),
        }
    }

    pub fn doc_owned_by(external_id: &str, owner_id: &str, app_id: Option<&str>) -> Document {
        let mut doc = Document::new(
            external_id.to_string(),
            Owner {
                entity_type: "developer".to_string(),
                id: owner_id.to_string(),
            },
            "text/plain".to_string(),
        );
        doc.system_metadata.app_id = app_id.map(String::from);
        doc
    }

    pub fn restricted(mut auth: AuthContext) -> AuthContext {
        auth.permissions = [Permission::Read, Permission::Write].into_iter().collect();
        auth
    }
}
