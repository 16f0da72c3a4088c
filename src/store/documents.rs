use super::access::{metadata_matches, system_metadata_matches, AccessFilter};
use super::models::{Document, Folder};
use super::{MetadataStore, DOCUMENTS_TABLE, FOLDERS_TABLE};
use crate::auth::{AuthContext, Permission};
use anyhow::Result;
use serde_json::{Map, Value as JsonValue};
use tracing::{info, warn};

/// Partial update applied to a document. Metadata is merged key-by-key;
/// system fields are service-controlled and touched here only.
#[derive(Debug, Default, Clone)]
pub struct DocumentUpdate {
    pub metadata: Option<Map<String, JsonValue>>,
    pub filename: Option<String>,
    pub content: Option<String>,
}

impl MetadataStore {
    /// Persist a new document. Developer-scoped writes are stamped with the
    /// caller's app_id so tenant scoping holds from the moment of creation.
    pub fn store_document(&self, mut document: Document, auth: &AuthContext) -> Result<()> {
        if self
            .get::<Document>(DOCUMENTS_TABLE, &document.external_id)?
            .is_some()
        {
            anyhow::bail!("document {} already exists", document.external_id);
        }
        if auth.is_app_scoped() {
            document.system_metadata.app_id = auth.app_id.clone();
        }
        if let Some(end_user) = &auth.user_id {
            if document.system_metadata.end_user_id.is_none() {
                document.system_metadata.end_user_id = Some(end_user.clone());
            }
        }
        self.put(DOCUMENTS_TABLE, &document.external_id.clone(), &document)
    }

    pub fn get_document(&self, document_id: &str, auth: &AuthContext) -> Result<Option<Document>> {
        let Some(doc) = self.get::<Document>(DOCUMENTS_TABLE, document_id)? else {
            return Ok(None);
        };
        let filter = AccessFilter::new(auth, self.cloud());
        if filter.allows(&doc.owner, &doc.access_control, &doc.system_metadata) {
            Ok(Some(doc))
        } else {
            // Not-permitted is reported as not-found.
            Ok(None)
        }
    }

    pub fn get_document_by_filename(
        &self,
        filename: &str,
        auth: &AuthContext,
        system_filters: &Map<String, JsonValue>,
    ) -> Result<Option<Document>> {
        let filter = AccessFilter::new(auth, self.cloud());
        let docs: Vec<Document> = self.scan(DOCUMENTS_TABLE)?;
        Ok(docs.into_iter().find(|doc| {
            doc.filename.as_deref() == Some(filename)
                && filter.allows(&doc.owner, &doc.access_control, &doc.system_metadata)
                && system_metadata_matches(system_filters, &doc.system_metadata.as_json())
        }))
    }

    pub fn get_documents_by_id(
        &self,
        document_ids: &[String],
        auth: &AuthContext,
        system_filters: &Map<String, JsonValue>,
    ) -> Result<Vec<Document>> {
        let filter = AccessFilter::new(auth, self.cloud());
        let mut docs = Vec::new();
        for id in document_ids {
            if let Some(doc) = self.get::<Document>(DOCUMENTS_TABLE, id)? {
                if filter.allows(&doc.owner, &doc.access_control, &doc.system_metadata)
                    && system_metadata_matches(system_filters, &doc.system_metadata.as_json())
                {
                    docs.push(doc);
                }
            }
        }
        Ok(docs)
    }

    pub fn list_documents(
        &self,
        auth: &AuthContext,
        skip: usize,
        limit: usize,
        filters: &Map<String, JsonValue>,
        system_filters: &Map<String, JsonValue>,
    ) -> Result<Vec<Document>> {
        let filter = AccessFilter::new(auth, self.cloud());
        let mut docs: Vec<Document> = self
            .scan::<Document>(DOCUMENTS_TABLE)?
            .into_iter()
            .filter(|doc| {
                filter.allows(&doc.owner, &doc.access_control, &doc.system_metadata)
                    && metadata_matches(filters, &doc.metadata)
                    && system_metadata_matches(system_filters, &doc.system_metadata.as_json())
            })
            .collect();
        docs.sort_by(|a, b| b.system_metadata.created_at.cmp(&a.system_metadata.created_at));
        Ok(docs.into_iter().skip(skip).take(limit).collect())
    }

    pub fn check_document_access(
        &self,
        document_id: &str,
        auth: &AuthContext,
        permission: Permission,
    ) -> Result<bool> {
        let Some(doc) = self.get::<Document>(DOCUMENTS_TABLE, document_id)? else {
            return Ok(false);
        };
        let filter = AccessFilter::new(auth, self.cloud());
        Ok(filter.allows_with(&doc.owner, &doc.access_control, &doc.system_metadata, permission))
    }

    pub fn update_document(
        &self,
        document_id: &str,
        auth: &AuthContext,
        updates: DocumentUpdate,
    ) -> Result<Option<Document>> {
        if !self.check_document_access(document_id, auth, Permission::Write)? {
            return Ok(None);
        }
        let mut updated: Option<Document> = None;
        self.update_row::<Document, _>(DOCUMENTS_TABLE, document_id, |mut doc| {
            if let Some(metadata) = &updates.metadata {
                for (key, value) in metadata {
                    doc.metadata.insert(key.clone(), value.clone());
                }
            }
            if let Some(filename) = &updates.filename {
                doc.filename = Some(filename.clone());
            }
            if let Some(content) = &updates.content {
                doc.system_metadata.content = Some(content.clone());
            }
            doc.system_metadata.touch();
            updated = Some(doc.clone());
            Some(doc)
        })?;
        Ok(updated)
    }

    /// Delete a document and remove its id from every folder referencing it.
    pub fn delete_document(&self, document_id: &str, auth: &AuthContext) -> Result<bool> {
        if !self.check_document_access(document_id, auth, Permission::Write)? {
            return Ok(false);
        }
        let removed = self.remove(DOCUMENTS_TABLE, document_id)?;
        if !removed {
            return Ok(false);
        }

        // Cascade: drop folder membership everywhere.
        let folders: Vec<Folder> = self.scan(FOLDERS_TABLE)?;
        for folder in folders {
            if folder.document_ids.iter().any(|id| id == document_id) {
                let result = self.update_row::<Folder, _>(FOLDERS_TABLE, &folder.id, |mut f| {
                    f.document_ids.retain(|id| id != document_id);
                    f.system_metadata.touch();
                    Some(f)
                });
                if let Err(e) = result {
                    warn!(
                        "failed to detach document {} from folder {}: {}",
                        document_id, folder.id, e
                    );
                }
            }
        }
        info!("Deleted document {}", document_id);
        Ok(true)
    }
}
