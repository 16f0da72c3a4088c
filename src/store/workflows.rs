use super::models::{Workflow, WorkflowRun};
use super::{MetadataStore, WORKFLOWS_TABLE, WORKFLOW_RUNS_TABLE};
use crate::auth::AuthContext;
use anyhow::Result;
use serde_json::Value as JsonValue;

/// Workflows are owner-scoped JSON payloads; there is no ACL sharing, so
/// access reduces to owner match plus the developer-app scope rule.
fn workflow_visible(auth: &AuthContext, owner_id: &str, app_id: Option<&str>) -> bool {
    if auth.is_app_scoped() {
        return app_id == auth.app_id.as_deref();
    }
    owner_id == auth.entity_id
}

impl MetadataStore {
    pub fn store_workflow(&self, mut workflow: Workflow, auth: &AuthContext) -> Result<()> {
        if auth.is_app_scoped() {
            workflow.app_id = auth.app_id.clone();
        }
        self.put(WORKFLOWS_TABLE, &workflow.id.clone(), &workflow)
    }

    pub fn get_workflow(&self, workflow_id: &str, auth: &AuthContext) -> Result<Option<Workflow>> {
        let Some(workflow) = self.get::<Workflow>(WORKFLOWS_TABLE, workflow_id)? else {
            return Ok(None);
        };
        if workflow_visible(auth, &workflow.owner.id, workflow.app_id.as_deref()) {
            Ok(Some(workflow))
        } else {
            Ok(None)
        }
    }

    pub fn list_workflows(&self, auth: &AuthContext) -> Result<Vec<Workflow>> {
        let mut workflows: Vec<Workflow> = self
            .scan::<Workflow>(WORKFLOWS_TABLE)?
            .into_iter()
            .filter(|w| workflow_visible(auth, &w.owner.id, w.app_id.as_deref()))
            .collect();
        workflows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(workflows)
    }

    pub fn update_workflow(
        &self,
        workflow_id: &str,
        definition: JsonValue,
        auth: &AuthContext,
    ) -> Result<Option<Workflow>> {
        if self.get_workflow(workflow_id, auth)?.is_none() {
            return Ok(None);
        }
        let mut updated = None;
        self.update_row::<Workflow, _>(WORKFLOWS_TABLE, workflow_id, |mut w| {
            w.definition = definition.clone();
            w.updated_at = chrono::Utc::now().max(w.updated_at);
            updated = Some(w.clone());
            Some(w)
        })?;
        Ok(updated)
    }

    pub fn delete_workflow(&self, workflow_id: &str, auth: &AuthContext) -> Result<bool> {
        if self.get_workflow(workflow_id, auth)?.is_none() {
            return Ok(false);
        }
        // Runs reference exactly one workflow; drop them with it.
        let runs: Vec<WorkflowRun> = self.scan(WORKFLOW_RUNS_TABLE)?;
        for run in runs.iter().filter(|r| r.workflow_id == workflow_id) {
            self.remove(WORKFLOW_RUNS_TABLE, &run.id)?;
        }
        self.remove(WORKFLOWS_TABLE, workflow_id)
    }

    pub fn store_workflow_run(&self, run: WorkflowRun, auth: &AuthContext) -> Result<()> {
        // The run belongs to whoever may see its workflow.
        if self.get_workflow(&run.workflow_id, auth)?.is_none() {
            anyhow::bail!("workflow {} not found", run.workflow_id);
        }
        self.put(WORKFLOW_RUNS_TABLE, &run.id.clone(), &run)
    }

    pub fn get_workflow_run(&self, run_id: &str, auth: &AuthContext) -> Result<Option<WorkflowRun>> {
        let Some(run) = self.get::<WorkflowRun>(WORKFLOW_RUNS_TABLE, run_id)? else {
            return Ok(None);
        };
        if self.get_workflow(&run.workflow_id, auth)?.is_none() {
            return Ok(None);
        }
        Ok(Some(run))
    }

    pub fn list_workflow_runs(
        &self,
        workflow_id: &str,
        auth: &AuthContext,
    ) -> Result<Vec<WorkflowRun>> {
        if self.get_workflow(workflow_id, auth)?.is_none() {
            return Ok(Vec::new());
        }
        let mut runs: Vec<WorkflowRun> = self
            .scan::<WorkflowRun>(WORKFLOW_RUNS_TABLE)?
            .into_iter()
            .filter(|r| r.workflow_id == workflow_id)
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }

    pub fn delete_workflow_run(&self, run_id: &str, auth: &AuthContext) -> Result<bool> {
        if self.get_workflow_run(run_id, auth)?.is_none() {
            return Ok(false);
        }
        self.remove(WORKFLOW_RUNS_TABLE, run_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::{Owner, WorkflowRunStatus};
    use crate::store::test_support::{developer_auth, open_store};
    use chrono::Utc;

    fn workflow(id: &str, owner_id: &str) -> Workflow {
        Workflow {
            id: id.to_string(),
            name: "ingest-and-tag".to_string(),
            owner: Owner {
                entity_type: "developer".to_string(),
                id: owner_id.to_string(),
            },
            app_id: None,
            definition: serde_json::json!({"steps": []}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn runs_are_scoped_through_their_workflow() {
        let (_dir, store) = open_store(false);
        let auth = developer_auth("dev1", None);
        let other = developer_auth("dev2", None);

        store.store_workflow(workflow("w1", "dev1"), &auth).unwrap();
        let run = WorkflowRun {
            id: "r1".to_string(),
            workflow_id: "w1".to_string(),
            owner: Owner {
                entity_type: "developer".to_string(),
                id: "dev1".to_string(),
            },
            status: WorkflowRunStatus::Queued,
            payload: serde_json::json!({}),
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        };
        store.store_workflow_run(run, &auth).unwrap();

        assert!(store.get_workflow_run("r1", &auth).unwrap().is_some());
        assert!(store.get_workflow_run("r1", &other).unwrap().is_none());
        assert_eq!(store.list_workflow_runs("w1", &auth).unwrap().len(), 1);
        assert!(store.list_workflow_runs("w1", &other).unwrap().is_empty());
    }

    #[test]
    fn deleting_a_workflow_drops_its_runs() {
        let (_dir, store) = open_store(false);
        let auth = developer_auth("dev1", None);
        store.store_workflow(workflow("w1", "dev1"), &auth).unwrap();
        let run = WorkflowRun {
            id: "r1".to_string(),
            workflow_id: "w1".to_string(),
            owner: Owner {
                entity_type: "developer".to_string(),
                id: "dev1".to_string(),
            },
            status: WorkflowRunStatus::Completed,
            payload: serde_json::json!({}),
            error: None,
            started_at: Utc::now(),
            finished_at: Some(Utc::now()),
        };
        store.store_workflow_run(run, &auth).unwrap();

        assert!(store.delete_workflow("w1", &auth).unwrap());
        assert!(store.get_workflow("w1", &auth).unwrap().is_none());
        assert!(store
            .get::<WorkflowRun>(super::super::WORKFLOW_RUNS_TABLE, "r1")
            .unwrap()
            .is_none());
    }
}
