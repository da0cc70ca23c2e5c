//! Recomputes per-topic preference weights from reading history.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule},
};
use crate::news_store::TopicReadCount;
use std::collections::BTreeMap;
use tracing::{debug, info};

pub struct UserPreferencesJob {
    schedule: JobSchedule,
}

impl UserPreferencesJob {
    pub fn new(schedule: JobSchedule) -> Self {
        Self { schedule }
    }
}

/// Group read counts by user and turn them into weights: the share of the
/// user's reads that fall in each topic.
pub fn compute_topic_weights(counts: Vec<TopicReadCount>) -> BTreeMap<String, Vec<(String, f64)>> {
    let mut per_user: BTreeMap<String, Vec<(String, u64)>> = BTreeMap::new();
    for count in counts {
        per_user
            .entry(count.user_id)
            .or_default()
            .push((count.topic, count.reads));
    }

    per_user
        .into_iter()
        .filter_map(|(user_id, topics)| {
            let total: u64 = topics.iter().map(|(_, reads)| reads).sum();
            if total == 0 {
                return None;
            }
            let weights = topics
                .into_iter()
                .map(|(topic, reads)| (topic, reads as f64 / total as f64))
                .collect();
            Some((user_id, weights))
        })
        .collect()
}

impl BackgroundJob for UserPreferencesJob {
    fn id(&self) -> &'static str {
        "user_preferences"
    }

    fn name(&self) -> &'static str {
        "User Preferences"
    }

    fn description(&self) -> &'static str {
        "Recompute per-topic preference weights from reading history"
    }

    fn schedule(&self) -> JobSchedule {
        self.schedule.clone()
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let counts = ctx
            .news_store
            .get_topic_read_counts()
            .map_err(|e| JobError::ExecutionFailed(e.to_string()))?;

        let weights = compute_topic_weights(counts);
        let updated_at = chrono::Utc::now().timestamp();

        for (user_id, user_weights) in &weights {
            if ctx.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            debug!("User {}: {} topics", user_id, user_weights.len());
            ctx.news_store
                .replace_user_preferences(user_id, user_weights, updated_at)
                .map_err(|e| JobError::ExecutionFailed(e.to_string()))?;
        }

        // Users whose reads are all gone (stale articles deleted) keep no weights
        let stale_users: Vec<String> = ctx
            .news_store
            .list_users_with_preferences()
            .map_err(|e| JobError::ExecutionFailed(e.to_string()))?
            .into_iter()
            .filter(|user_id| !weights.contains_key(user_id))
            .collect();
        for user_id in &stale_users {
            if ctx.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            ctx.news_store
                .replace_user_preferences(user_id, &[], updated_at)
                .map_err(|e| JobError::ExecutionFailed(e.to_string()))?;
        }

        info!(
            "Recomputed preferences for {} users, cleared {}",
            weights.len(),
            stale_users.len()
        );
        Ok(())
    }
}
