use crate::auth::{AuthContext, Permission};
use crate::store::models::{AccessControl, Folder, Owner, SystemMetadata};
use serde_json::{Map, Value as JsonValue};

/// In-store access predicate for a single caller.
///
/// Every list/get/find in the metadata store evaluates rows through this
/// filter, so tenant scoping cannot be bypassed by a forgotten call site.
#[derive(Debug, Clone, Copy)]
pub struct AccessFilter<'a> {
    auth: &'a AuthContext,
    cloud: bool,
}

impl<'a> AccessFilter<'a> {
    pub fn new(auth: &'a AuthContext, cloud: bool) -> Self {
        Self { auth, cloud }
    }

    /// Visibility predicate: ownership or membership in any ACL list.
    pub fn allows(&self, owner: &Owner, acl: &AccessControl, system: &SystemMetadata) -> bool {
        self.allows_row(owner, acl, system, None)
    }

    /// Permission-qualified predicate: the ACL side narrows to the list
    /// matching `permission`; the owner is always granted every permission.
    pub fn allows_with(
        &self,
        owner: &Owner,
        acl: &AccessControl,
        system: &SystemMetadata,
        permission: Permission,
    ) -> bool {
        self.allows_row(owner, acl, system, Some(permission))
    }

    fn allows_row(
        &self,
        owner: &Owner,
        acl: &AccessControl,
        system: &SystemMetadata,
        permission: Option<Permission>,
    ) -> bool {
        // Developer tokens carrying an app_id are scoped strictly by that
        // app. The ACL shortcut is disabled here: apps of the same developer
        // share an entity id, and honouring ACL membership would leak rows
        // across applications.
        if self.auth.is_app_scoped() {
            return system.app_id.as_deref() == self.auth.app_id.as_deref();
        }

        if owner.id == self.auth.entity_id {
            return true;
        }

        let entity = self.auth.entity_id.as_str();
        let acl_match = match permission {
            None => {
                acl.readers.iter().any(|e| e == entity)
                    || acl.writers.iter().any(|e| e == entity)
                    || acl.admins.iter().any(|e| e == entity)
            }
            Some(Permission::Read) => acl.readers.iter().any(|e| e == entity),
            Some(Permission::Write) => acl.writers.iter().any(|e| e == entity),
            Some(Permission::Admin) => acl.admins.iter().any(|e| e == entity),
        };
        if acl_match {
            return true;
        }

        // Cloud-mode end-user shortcut. Never applied to app-scoped tokens
        // (handled above by the early return).
        if self.cloud {
            if let Some(user_id) = &self.auth.user_id {
                return acl.user_id.iter().any(|u| u == user_id);
            }
        }

        false
    }

    /// Folder predicate. Folder ACLs store `"<entity_type>:<entity_id>"`
    /// qualifiers rather than bare ids.
    pub fn allows_folder(&self, folder: &Folder, permission: Permission) -> bool {
        if self.auth.is_app_scoped()
            && folder.system_metadata.app_id.as_deref() != self.auth.app_id.as_deref()
        {
            return false;
        }

        // Token-level admin permission grants folder access outright.
        if self.auth.has_permission(Permission::Admin) {
            return true;
        }

        if folder.owner.entity_type == self.auth.entity_type.to_string()
            && folder.owner.id == self.auth.entity_id
        {
            if self.cloud {
                if let Some(user_id) = &self.auth.user_id {
                    if !folder.access_control.user_id.iter().any(|u| u == user_id) {
                        return false;
                    }
                }
            }
            return true;
        }

        let qualifier = self.auth.entity_qualifier();
        let list = match permission {
            Permission::Read => &folder.access_control.readers,
            Permission::Write => &folder.access_control.writers,
            Permission::Admin => &folder.access_control.admins,
        };
        list.iter().any(|e| e == &qualifier)
    }
}

/// Structural-subset containment: every piece of `want` must be present in
/// `row`. Objects match key-by-key, arrays by element containment, scalars
/// by equality.
pub fn value_contains(row: &JsonValue, want: &JsonValue) -> bool {
    match (row, want) {
        (JsonValue::Object(r), JsonValue::Object(w)) => w
            .iter()
            .all(|(k, v)| r.get(k).is_some_and(|rv| value_contains(rv, v))),
        (JsonValue::Array(r), JsonValue::Array(w)) => {
            w.iter().all(|wv| r.iter().any(|rv| value_contains(rv, wv)))
        }
        _ => row == want,
    }
}

/// User-metadata filter. A list value ORs its alternatives at the same key;
/// different keys are AND-ed.
pub fn metadata_matches(filters: &Map<String, JsonValue>, metadata: &Map<String, JsonValue>) -> bool {
    filters.iter().all(|(key, value)| {
        let alternatives: Vec<&JsonValue> = match value {
            JsonValue::Array(items) if !items.is_empty() => items.iter().collect(),
            JsonValue::Array(_) => return true, // empty list constrains nothing
            other => vec![other],
        };
        alternatives.into_iter().any(|candidate| {
            metadata
                .get(key)
                .is_some_and(|row_value| value_contains(row_value, candidate))
        })
    })
}

/// System-metadata filter with the same OR-within-key / AND-across-keys
/// shape. Row values may be scalars or arrays; a null filter value matches
/// rows where the key is null or absent.
pub fn system_metadata_matches(filters: &Map<String, JsonValue>, system: &JsonValue) -> bool {
    let row = match system {
        JsonValue::Object(map) => map,
        _ => return false,
    };
    filters.iter().all(|(key, value)| {
        let alternatives: Vec<&JsonValue> = match value {
            JsonValue::Array(items) if !items.is_empty() => items.iter().collect(),
            JsonValue::Array(_) => return true,
            other => vec![other],
        };
        alternatives
            .into_iter()
            .any(|candidate| system_value_matches(row.get(key), candidate))
    })
}

fn system_value_matches(row_value: Option<&JsonValue>, want: &JsonValue) -> bool {
    match row_value {
        None | Some(JsonValue::Null) => want.is_null(),
        Some(JsonValue::Array(items)) => items.iter().any(|item| value_contains(item, want)),
        Some(other) => value_contains(other, want),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::EntityType;
    use serde_json::json;
    use std::collections::HashSet;

    fn developer(entity_id: &str, app_id: Option<&str>) -> AuthContext {
        AuthContext {
            entity_type: EntityType::Developer,
            entity_id: entity_id.to_string(),
            app_id: app_id.map(String::from),
            user_id: None,
            permissions: [Permission::Read, Permission::Write].into_iter().collect(),
        }
    }

    fn end_user(entity_id: &str, user_id: &str) -> AuthContext {
        AuthContext {
            entity_type: EntityType::User,
            entity_id: entity_id.to_string(),
            app_id: None,
            user_id: Some(user_id.to_string()),
            permissions: [Permission::Read].into_iter().collect(),
        }
    }

    fn owner(id: &str) -> Owner {
        Owner {
            entity_type: "developer".to_string(),
            id: id.to_string(),
        }
    }

    fn row(owner_id: &str, app_id: Option<&str>) -> (Owner, AccessControl, SystemMetadata) {
        let mut system = SystemMetadata::new();
        system.app_id = app_id.map(String::from);
        (owner(owner_id), AccessControl::default(), system)
    }

    // Tenant isolation: an app-scoped developer token only ever sees rows
    // stamped with its own app_id, across every owner/ACL combination.
    #[test]
    fn app_scoped_token_never_sees_other_apps() {
        let auth = developer("dev1", Some("app_a"));
        let filter = AccessFilter::new(&auth, true);

        let owners = ["dev1", "dev2"];
        let app_ids = [Some("app_a"), Some("app_b"), None];
        let acl_entries: [&[&str]; 3] = [&[], &["dev1"], &["someone_else"]];

        for row_owner in owners {
            for row_app in app_ids {
                for acl_readers in acl_entries {
                    let (o, mut acl, system) = row(row_owner, row_app);
                    acl.readers = acl_readers.iter().map(|s| s.to_string()).collect();
                    acl.user_id = vec!["dev1".to_string()];
                    let visible = filter.allows(&o, &acl, &system);
                    assert_eq!(
                        visible,
                        row_app == Some("app_a"),
                        "owner={row_owner} app={row_app:?} readers={acl_readers:?}"
                    );
                }
            }
        }
    }

    // End-user shortcut: a cloud user token sees owner-matches, ACL-matches
    // and user_id-matches, and nothing else.
    #[test]
    fn cloud_user_visibility_is_owner_acl_or_user_id() {
        let auth = end_user("u1", "enduser-9");
        let filter = AccessFilter::new(&auth, true);

        let (o, acl, system) = row("u1", None);
        assert!(filter.allows(&o, &acl, &system), "owner match");

        let (o, mut acl, system) = row("someone", None);
        acl.writers = vec!["u1".to_string()];
        assert!(filter.allows(&o, &acl, &system), "acl match");

        let (o, mut acl, system) = row("someone", None);
        acl.user_id = vec!["enduser-9".to_string()];
        assert!(filter.allows(&o, &acl, &system), "user_id match");

        let (o, acl, system) = row("someone", None);
        assert!(!filter.allows(&o, &acl, &system), "unrelated row");
    }

    #[test]
    fn user_id_shortcut_disabled_outside_cloud_mode() {
        let auth = end_user("u1", "enduser-9");
        let filter = AccessFilter::new(&auth, false);
        let (o, mut acl, system) = row("someone", None);
        acl.user_id = vec!["enduser-9".to_string()];
        assert!(!filter.allows(&o, &acl, &system));
    }

    #[test]
    fn user_id_shortcut_does_not_widen_app_scoped_tokens() {
        let mut auth = developer("dev1", Some("app_a"));
        auth.user_id = Some("enduser-9".to_string());
        let filter = AccessFilter::new(&auth, true);

        let (o, mut acl, system) = row("dev2", Some("app_b"));
        acl.user_id = vec!["enduser-9".to_string()];
        assert!(!filter.allows(&o, &acl, &system));
    }

    #[test]
    fn permission_variants_narrow_to_matching_list() {
        let auth = developer("dev1", None);
        let filter = AccessFilter::new(&auth, false);
        let (o, mut acl, system) = row("other", None);
        acl.writers = vec!["dev1".to_string()];

        assert!(filter.allows_with(&o, &acl, &system, Permission::Write));
        assert!(!filter.allows_with(&o, &acl, &system, Permission::Read));
        assert!(!filter.allows_with(&o, &acl, &system, Permission::Admin));

        // Owner holds every permission.
        let (o, acl, system) = row("dev1", None);
        assert!(filter.allows_with(&o, &acl, &system, Permission::Admin));
    }

    #[test]
    fn folder_acl_uses_qualifier_form() {
        let mut auth = developer("dev1", None);
        auth.permissions = [Permission::Read].into_iter().collect();
        let filter = AccessFilter::new(&auth, false);

        let mut folder = Folder {
            id: "f1".to_string(),
            name: "reports".to_string(),
            description: None,
            owner: owner("other"),
            document_ids: vec![],
            system_metadata: SystemMetadata::new(),
            access_control: AccessControl::default(),
            rules: vec![],
            workflow_ids: vec![],
        };

        // Bare ids do not grant folder access.
        folder.access_control.readers = vec!["dev1".to_string()];
        assert!(!filter.allows_folder(&folder, Permission::Read));

        folder.access_control.readers = vec!["developer:dev1".to_string()];
        assert!(filter.allows_folder(&folder, Permission::Read));
        assert!(!filter.allows_folder(&folder, Permission::Write));
    }

    #[test]
    fn metadata_filter_ors_lists_and_ands_keys() {
        let metadata: Map<String, JsonValue> = serde_json::from_value(json!({
            "department": "legal",
            "year": 2024,
        }))
        .unwrap();

        let matching: Map<String, JsonValue> = serde_json::from_value(json!({
            "department": ["finance", "legal"],
            "year": 2024,
        }))
        .unwrap();
        assert!(metadata_matches(&matching, &metadata));

        let failing_key: Map<String, JsonValue> = serde_json::from_value(json!({
            "department": ["finance", "legal"],
            "year": 2023,
        }))
        .unwrap();
        assert!(!metadata_matches(&failing_key, &metadata));
    }

    #[test]
    fn metadata_containment_is_structural_subset() {
        let metadata: Map<String, JsonValue> = serde_json::from_value(json!({
            "labels": {"source": "upload", "lang": "en"},
        }))
        .unwrap();
        let filters: Map<String, JsonValue> = serde_json::from_value(json!({
            "labels": {"lang": "en"},
        }))
        .unwrap();
        assert!(metadata_matches(&filters, &metadata));

        let mismatched: Map<String, JsonValue> = serde_json::from_value(json!({
            "labels": {"lang": "vi"},
        }))
        .unwrap();
        assert!(!metadata_matches(&mismatched, &metadata));
    }

    #[test]
    fn system_filter_matches_scalar_and_array_rows() {
        let scalar_row = json!({"folder_name": "folder1", "app_id": "app_a"});
        let array_row = json!({"folder_name": ["folder1", "folder2"]});

        let filters: Map<String, JsonValue> =
            serde_json::from_value(json!({"folder_name": "folder1"})).unwrap();
        assert!(system_metadata_matches(&filters, &scalar_row));
        assert!(system_metadata_matches(&filters, &array_row));

        let list_filter: Map<String, JsonValue> =
            serde_json::from_value(json!({"folder_name": ["folder2", "folder3"]})).unwrap();
        assert!(!system_metadata_matches(&list_filter, &scalar_row));
        assert!(system_metadata_matches(&list_filter, &array_row));
    }

    #[test]
    fn system_filter_null_matches_absent_key() {
        let row = json!({"app_id": "app_a"});
        let filters: Map<String, JsonValue> =
            serde_json::from_value(json!({"folder_name": null})).unwrap();
        assert!(system_metadata_matches(&filters, &row));

        let present: Map<String, JsonValue> =
            serde_json::from_value(json!({"app_id": null})).unwrap();
        assert!(!system_metadata_matches(&present, &row));
    }

    // Filter composition commutes: filtering by access then system metadata
    // equals intersecting the two independent result sets.
    #[test]
    fn access_and_system_filters_compose_commutatively() {
        let auth = developer("dev1", None);
        let filter = AccessFilter::new(&auth, false);
        let system_filter: Map<String, JsonValue> =
            serde_json::from_value(json!({"folder_name": "folder1"})).unwrap();

        let mut rows = Vec::new();
        for owner_id in ["dev1", "dev2"] {
            for folder in [Some("folder1"), Some("folder2"), None] {
                let (o, acl, mut system) = row(owner_id, None);
                system.folder_name = folder.map(String::from);
                rows.push((o, acl, system));
            }
        }

        let composed: Vec<usize> = rows
            .iter()
            .enumerate()
            .filter(|(_, (o, acl, s))| {
                filter.allows(o, acl, s) && system_metadata_matches(&system_filter, &s.as_json())
            })
            .map(|(i, _)| i)
            .collect();

        let by_access: HashSet<usize> = rows
            .iter()
            .enumerate()
            .filter(|(_, (o, acl, s))| filter.allows(o, acl, s))
            .map(|(i, _)| i)
            .collect();
        let by_system: HashSet<usize> = rows
            .iter()
            .enumerate()
            .filter(|(_, (_, _, s))| system_metadata_matches(&system_filter, &s.as_json()))
            .map(|(i, _)| i)
            .collect();

        let intersection: HashSet<usize> = by_access.intersection(&by_system).copied().collect();
        assert_eq!(composed.iter().copied().collect::<HashSet<_>>(), intersection);
    }
}
