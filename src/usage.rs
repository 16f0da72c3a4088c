use crate::auth::AuthContext;
use crate::config::{LimitsConfig, Mode};
use crate::error::ApiError;
use crate::store::models::UsageLogRecord;
use crate::store::MetadataStore;
use chrono::Utc;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::warn;

/// Cloud-mode quota enforcement plus usage logging. Quotas are per-user,
/// per-operation daily counters; self-hosted deployments skip the check.
pub struct UsageTracker {
    store: Arc<MetadataStore>,
    limits: LimitsConfig,
    mode: Mode,
}

impl UsageTracker {
    pub fn new(store: Arc<MetadataStore>, limits: LimitsConfig, mode: Mode) -> Self {
        Self {
            store,
            limits,
            mode,
        }
    }

    fn daily_limit(&self, operation: &str) -> Option<u64> {
        match operation {
            "query" => Some(self.limits.queries_per_day),
            "agent" => Some(self.limits.agent_calls_per_day),
            _ => None,
        }
    }

    /// Count `amount` calls against the user's daily allowance, rejecting the
    /// request once the allowance is exhausted.
    pub fn check_and_increment(
        &self,
        auth: &AuthContext,
        operation: &str,
        amount: u64,
    ) -> Result<(), ApiError> {
        if self.mode != Mode::Cloud {
            return Ok(());
        }
        let Some(user_id) = &auth.user_id else {
            return Ok(());
        };
        let Some(limit) = self.daily_limit(operation) else {
            return Ok(());
        };

        let key = format!("{}:{}:{}", user_id, operation, Utc::now().format("%Y-%m-%d"));
        let total = self
            .store
            .increment_usage_counter(&key, amount)
            .map_err(ApiError::Internal)?;
        if total > limit {
            return Err(ApiError::QuotaExceeded(format!(
                "daily {operation} limit of {limit} reached"
            )));
        }
        Ok(())
    }

    pub fn record(
        &self,
        auth: &AuthContext,
        operation: &str,
        status: &str,
        duration_ms: u64,
        tokens_used: u64,
        metadata: JsonValue,
        error: Option<String>,
    ) {
        let user_id = auth
            .user_id
            .clone()
            .unwrap_or_else(|| auth.entity_id.clone());
        let record = UsageLogRecord {
            timestamp: Utc::now(),
            user_id,
            app_id: auth.app_id.clone(),
            operation_type: operation.to_string(),
            status: status.to_string(),
            duration_ms,
            tokens_used,
            metadata,
            error,
        };
        self.store.record_usage(&record);
        if record.status != "success" {
            warn!(
                "{} for {} finished with status {}",
                operation, record.user_id, record.status
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::{open_store, user_auth};

    fn limits() -> LimitsConfig {
        LimitsConfig {
            queries_per_day: 2,
            agent_calls_per_day: 1,
            apps_per_account: 5,
        }
    }

    #[test]
    fn quota_rejects_after_daily_allowance() {
        let (_dir, store) = open_store(true);
        let tracker = UsageTracker::new(Arc::new(store), limits(), Mode::Cloud);
        let auth = user_auth("u1", Some("enduser-1"));

        assert!(tracker.check_and_increment(&auth, "query", 1).is_ok());
        assert!(tracker.check_and_increment(&auth, "query", 1).is_ok());
        assert!(matches!(
            tracker.check_and_increment(&auth, "query", 1),
            Err(ApiError::QuotaExceeded(_))
        ));

        // Separate operations use separate counters.
        assert!(tracker.check_and_increment(&auth, "agent", 1).is_ok());
    }

    #[test]
    fn self_hosted_mode_never_limits() {
        let (_dir, store) = open_store(false);
        let tracker = UsageTracker::new(Arc::new(store), limits(), Mode::SelfHosted);
        let auth = user_auth("u1", Some("enduser-1"));
        for _ in 0..10 {
            assert!(tracker.check_and_increment(&auth, "query", 1).is_ok());
        }
    }

    #[test]
    fn tokens_accumulate_per_operation() {
        let (_dir, store) = open_store(true);
        let store = Arc::new(store);
        let tracker = UsageTracker::new(store.clone(), limits(), Mode::Cloud);
        let auth = user_auth("u1", Some("enduser-1"));

        tracker.record(&auth, "query", "success", 120, 40, serde_json::json!({}), None);
        tracker.record(&auth, "query", "success", 80, 10, serde_json::json!({}), None);

        let totals = store.usage_totals("enduser-1").unwrap();
        assert_eq!(totals.get("query"), Some(&50));
    }
}
