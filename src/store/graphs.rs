use super::access::{system_metadata_matches, AccessFilter};
use super::models::Graph;
use super::{MetadataStore, GRAPHS_TABLE};
use crate::auth::{AuthContext, Permission};
use anyhow::Result;
use serde_json::{Map, Value as JsonValue};

impl MetadataStore {
    /// Persist a graph. `(owner.id, name)` is unique.
    pub fn store_graph(&self, mut graph: Graph, auth: &AuthContext) -> Result<()> {
        if auth.is_app_scoped() {
            graph.system_metadata.app_id = auth.app_id.clone();
        }
        let existing: Vec<Graph> = self.scan(GRAPHS_TABLE)?;
        if existing
            .iter()
            .any(|g| g.name == graph.name && g.owner.id == graph.owner.id)
        {
            anyhow::bail!("graph '{}' already exists for this owner", graph.name);
        }
        self.put(GRAPHS_TABLE, &graph.id.clone(), &graph)
    }

    /// Look a graph up by name within the caller's visibility.
    pub fn get_graph(
        &self,
        name: &str,
        auth: &AuthContext,
        system_filters: &Map<String, JsonValue>,
    ) -> Result<Option<Graph>> {
        let filter = AccessFilter::new(auth, self.cloud());
        let graphs: Vec<Graph> = self.scan(GRAPHS_TABLE)?;
        Ok(graphs.into_iter().find(|g| {
            g.name == name
                && filter.allows(&g.owner, &g.access_control, &g.system_metadata)
                && system_metadata_matches(system_filters, &g.system_metadata.as_json())
        }))
    }

    pub fn list_graphs(
        &self,
        auth: &AuthContext,
        system_filters: &Map<String, JsonValue>,
    ) -> Result<Vec<Graph>> {
        let filter = AccessFilter::new(auth, self.cloud());
        let mut graphs: Vec<Graph> = self
            .scan::<Graph>(GRAPHS_TABLE)?
            .into_iter()
            .filter(|g| {
                filter.allows(&g.owner, &g.access_control, &g.system_metadata)
                    && system_metadata_matches(system_filters, &g.system_metadata.as_json())
            })
            .collect();
        graphs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(graphs)
    }

    pub fn update_graph(&self, graph: &Graph, auth: &AuthContext) -> Result<bool> {
        let Some(current) = self.get::<Graph>(GRAPHS_TABLE, &graph.id)? else {
            return Ok(false);
        };
        let filter = AccessFilter::new(auth, self.cloud());
        if !filter.allows_with(
            &current.owner,
            &current.access_control,
            &current.system_metadata,
            Permission::Write,
        ) {
            return Ok(false);
        }
        let mut next = graph.clone();
        next.updated_at = chrono::Utc::now().max(current.updated_at);
        next.system_metadata.touch();
        self.put(GRAPHS_TABLE, &next.id.clone(), &next)?;
        Ok(true)
    }

    pub fn delete_graph(&self, name: &str, auth: &AuthContext) -> Result<bool> {
        let Some(graph) = self.get_graph(name, auth, &Map::new())? else {
            return Ok(false);
        };
        let filter = AccessFilter::new(auth, self.cloud());
        if !filter.allows_with(
            &graph.owner,
            &graph.access_control,
            &graph.system_metadata,
            Permission::Write,
        ) {
            return Ok(false);
        }
        self.remove(GRAPHS_TABLE, &graph.id)
    }
}
