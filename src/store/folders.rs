use super::access::{system_metadata_matches, AccessFilter};
use super::models::{Document, Folder, FolderSummary};
use super::{MetadataStore, DOCUMENTS_TABLE, FOLDERS_TABLE};
use crate::auth::{AuthContext, Permission};
use anyhow::Result;
use serde_json::{Map, Value as JsonValue};
use tracing::info;

impl MetadataStore {
    /// Create a folder. `(owner.id, name, app_id)` is unique: if a folder
    /// with that triple already exists the existing folder is returned
    /// instead of creating a duplicate.
    pub fn create_folder(&self, mut folder: Folder, auth: &AuthContext) -> Result<Folder> {
        if auth.is_app_scoped() {
            folder.system_metadata.app_id = auth.app_id.clone();
        }
        if let Some(user_id) = &auth.user_id {
            if !folder.access_control.user_id.iter().any(|u| u == user_id) {
                folder.access_control.user_id.push(user_id.clone());
            }
        }

        let existing: Vec<Folder> = self.scan(FOLDERS_TABLE)?;
        if let Some(found) = existing.into_iter().find(|f| {
            f.name == folder.name
                && f.owner.id == folder.owner.id
                && f.owner.entity_type == folder.owner.entity_type
                && f.system_metadata.app_id == folder.system_metadata.app_id
        }) {
            info!(
                "Folder '{}' already exists with ID {}, not creating a duplicate",
                found.name, found.id
            );
            return Ok(found);
        }

        self.put(FOLDERS_TABLE, &folder.id.clone(), &folder)?;
        info!("Created new folder '{}' with ID {}", folder.name, folder.id);
        Ok(folder)
    }

    pub fn get_folder(&self, folder_id: &str, auth: &AuthContext) -> Result<Option<Folder>> {
        let Some(folder) = self.get::<Folder>(FOLDERS_TABLE, folder_id)? else {
            return Ok(None);
        };
        let filter = AccessFilter::new(auth, self.cloud());
        if filter.allows_folder(&folder, Permission::Read) {
            Ok(Some(folder))
        } else {
            Ok(None)
        }
    }

    pub fn get_folder_by_name(&self, name: &str, auth: &AuthContext) -> Result<Option<Folder>> {
        let filter = AccessFilter::new(auth, self.cloud());
        let folders: Vec<Folder> = self.scan(FOLDERS_TABLE)?;
        Ok(folders
            .into_iter()
            .find(|f| f.name == name && filter.allows_folder(f, Permission::Read)))
    }

    pub fn list_folders(
        &self,
        auth: &AuthContext,
        system_filters: &Map<String, JsonValue>,
    ) -> Result<Vec<Folder>> {
        let filter = AccessFilter::new(auth, self.cloud());
        let mut folders: Vec<Folder> = self
            .scan::<Folder>(FOLDERS_TABLE)?
            .into_iter()
            .filter(|f| {
                filter.allows_folder(f, Permission::Read)
                    && system_metadata_matches(system_filters, &f.system_metadata.as_json())
            })
            .collect();
        folders.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(folders)
    }

    /// Compact projection without the document_ids payload.
    pub fn list_folder_summaries(&self, auth: &AuthContext) -> Result<Vec<FolderSummary>> {
        Ok(self
            .list_folders(auth, &Map::new())?
            .into_iter()
            .map(|f| FolderSummary {
                id: f.id,
                name: f.name,
                description: f.description,
                doc_count: f.document_ids.len(),
                updated_at: f.system_metadata.updated_at,
            })
            .collect())
    }

    /// Attach a document to a folder. Membership is recorded on both sides:
    /// the folder's document_ids and the document's system folder_name.
    pub fn add_document_to_folder(
        &self,
        folder_id: &str,
        document_id: &str,
        auth: &AuthContext,
    ) -> Result<bool> {
        let Some(folder) = self.get_folder(folder_id, auth)? else {
            return Ok(false);
        };
        let filter = AccessFilter::new(auth, self.cloud());
        if !filter.allows_folder(&folder, Permission::Write) {
            return Ok(false);
        }
        if !self.check_document_access(document_id, auth, Permission::Read)? {
            return Ok(false);
        }

        self.update_row::<Folder, _>(FOLDERS_TABLE, folder_id, |mut f| {
            if !f.document_ids.iter().any(|id| id == document_id) {
                f.document_ids.push(document_id.to_string());
                f.system_metadata.touch();
            }
            Some(f)
        })?;
        let folder_name = folder.name.clone();
        self.update_row::<Document, _>(DOCUMENTS_TABLE, document_id, |mut doc| {
            doc.system_metadata.folder_name = Some(folder_name.clone());
            doc.system_metadata.touch();
            Some(doc)
        })?;
        Ok(true)
    }

    /// Detach a document from a folder; its system folder_name is cleared.
    pub fn remove_document_from_folder(
        &self,
        folder_id: &str,
        document_id: &str,
        auth: &AuthContext,
    ) -> Result<bool> {
        let Some(folder) = self.get_folder(folder_id, auth)? else {
            return Ok(false);
        };
        let filter = AccessFilter::new(auth, self.cloud());
        if !filter.allows_folder(&folder, Permission::Write) {
            return Ok(false);
        }

        self.update_row::<Folder, _>(FOLDERS_TABLE, folder_id, |mut f| {
            f.document_ids.retain(|id| id != document_id);
            f.system_metadata.touch();
            Some(f)
        })?;
        self.update_row::<Document, _>(DOCUMENTS_TABLE, document_id, |mut doc| {
            doc.system_metadata.folder_name = None;
            doc.system_metadata.touch();
            Some(doc)
        })?;
        Ok(true)
    }

    pub fn set_folder_rules(
        &self,
        folder_id: &str,
        rules: Vec<JsonValue>,
        auth: &AuthContext,
    ) -> Result<bool> {
        let Some(folder) = self.get_folder(folder_id, auth)? else {
            return Ok(false);
        };
        let filter = AccessFilter::new(auth, self.cloud());
        if !filter.allows_folder(&folder, Permission::Write) {
            return Ok(false);
        }
        self.update_row::<Folder, _>(FOLDERS_TABLE, folder_id, |mut f| {
            f.rules = rules;
            f.system_metadata.touch();
            Some(f)
        })
    }

    pub fn associate_workflow(
        &self,
        folder_id: &str,
        workflow_id: &str,
        auth: &AuthContext,
        attach: bool,
    ) -> Result<bool> {
        let Some(folder) = self.get_folder(folder_id, auth)? else {
            return Ok(false);
        };
        let filter = AccessFilter::new(auth, self.cloud());
        if !filter.allows_folder(&folder, Permission::Write) {
            return Ok(false);
        }
        self.update_row::<Folder, _>(FOLDERS_TABLE, folder_id, |mut f| {
            if attach {
                if !f.workflow_ids.iter().any(|id| id == workflow_id) {
                    f.workflow_ids.push(workflow_id.to_string());
                }
            } else {
                f.workflow_ids.retain(|id| id != workflow_id);
            }
            f.system_metadata.touch();
            Some(f)
        })
    }

    /// Remove the folder row itself. Admin-only, and the folder must have
    /// been emptied first; the cascade over documents is the HTTP layer's
    /// job, not the store's.
    pub fn delete_folder(&self, folder_id: &str, auth: &AuthContext) -> Result<bool> {
        let Some(folder) = self.get_folder(folder_id, auth)? else {
            return Ok(false);
        };
        let filter = AccessFilter::new(auth, self.cloud());
        if !filter.allows_folder(&folder, Permission::Admin) {
            return Ok(false);
        }
        if !folder.document_ids.is_empty() {
            anyhow::bail!("folder {} still contains documents", folder_id);
        }
        self.remove(FOLDERS_TABLE, folder_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::{AccessControl, Owner, SystemMetadata};
    use crate::store::test_support::{developer_auth, doc_owned_by, open_store, restricted};

    fn folder(id: &str, name: &str, owner_id: &str) -> Folder {
        Folder {
            id: id.to_string(),
            name: name.to_string(),
            description: None,
            owner: Owner {
                entity_type: "developer".to_string(),
                id: owner_id.to_string(),
            },
            document_ids: vec![],
            system_metadata: SystemMetadata::new(),
            access_control: AccessControl::default(),
            rules: vec![],
            workflow_ids: vec![],
        }
    }

    #[test]
    fn create_is_idempotent_per_owner_name_app() {
        let (_dir, store) = open_store(false);
        let auth = developer_auth("dev1", None);

        let first = store.create_folder(folder("f1", "reports", "dev1"), &auth).unwrap();
        let second = store.create_folder(folder("f2", "reports", "dev1"), &auth).unwrap();
        assert_eq!(first.id, second.id, "same triple resolves to existing folder");

        // A different app scope yields a distinct folder.
        let scoped = developer_auth("dev1", Some("app_a"));
        let third = store
            .create_folder(folder("f3", "reports", "dev1"), &scoped)
            .unwrap();
        assert_ne!(first.id, third.id);
        assert_eq!(third.system_metadata.app_id.as_deref(), Some("app_a"));
    }

    #[test]
    fn membership_keeps_document_folder_name_in_sync() {
        let (_dir, store) = open_store(false);
        let auth = developer_auth("dev1", None);
        store.create_folder(folder("f1", "reports", "dev1"), &auth).unwrap();
        store
            .store_document(doc_owned_by("doc-1", "dev1", None), &auth)
            .unwrap();

        assert!(store.add_document_to_folder("f1", "doc-1", &auth).unwrap());
        let doc = store.get_document("doc-1", &auth).unwrap().unwrap();
        assert_eq!(doc.system_metadata.folder_name.as_deref(), Some("reports"));

        assert!(store.remove_document_from_folder("f1", "doc-1", &auth).unwrap());
        let doc = store.get_document("doc-1", &auth).unwrap().unwrap();
        assert!(doc.system_metadata.folder_name.is_none());
        let f = store.get_folder("f1", &auth).unwrap().unwrap();
        assert!(f.document_ids.is_empty());
    }

    #[test]
    fn delete_requires_admin_and_empty() {
        let (_dir, store) = open_store(false);
        let auth = developer_auth("dev1", None);
        store.create_folder(folder("f1", "reports", "dev1"), &auth).unwrap();
        store
            .store_document(doc_owned_by("doc-1", "dev1", None), &auth)
            .unwrap();
        store.add_document_to_folder("f1", "doc-1", &auth).unwrap();

        assert!(store.delete_folder("f1", &auth).is_err(), "non-empty folder");

        store.remove_document_from_folder("f1", "doc-1", &auth).unwrap();

        // A token without folder admin access cannot delete a stranger's folder.
        let outsider = restricted(developer_auth("dev2", None));
        assert!(!store.delete_folder("f1", &outsider).unwrap());

        assert!(store.delete_folder("f1", &auth).unwrap());
        assert!(store.get_folder("f1", &auth).unwrap().is_none());
    }
}
