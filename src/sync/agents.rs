use std::time::Duration;

use futures::FutureExt;

use super::resource::{PushAction, RefreshInterval, Resource, ResourceSpec, ResourceState};
use super::SyncContext;
use crate::models::{AgentStatus, MergeActionState};
use crate::realtime::ServerEvent;

pub(crate) const AGENT_STATUS_KEY: &str = "agent-status";

/// True while any reviewer reports `actionState == "merging"`.
pub fn merge_in_progress(agents: &[AgentStatus]) -> bool {
    agents
        .iter()
        .any(|a| a.is_reviewer() && a.merge_action_state() == Some(MergeActionState::Merging))
}

/// Merge state of the first reviewer, if it reports one.
pub fn reviewer_merge_state(agents: &[AgentStatus]) -> Option<MergeActionState> {
    agents
        .iter()
        .find(|a| a.is_reviewer())
        .and_then(AgentStatus::merge_action_state)
}

/// Poll faster while a merge is running, back to baseline once it is not.
pub fn agent_status_interval(
    agents: Option<&Vec<AgentStatus>>,
    baseline: Duration,
    merging: Duration,
) -> Duration {
    match agents {
        Some(agents) if merge_in_progress(agents) => merging,
        _ => baseline,
    }
}

/// Agent pipeline status with merge-aware polling.
pub struct AgentStatusResource {
    resource: Resource<Vec<AgentStatus>>,
}

impl AgentStatusResource {
    pub fn spawn(ctx: &SyncContext) -> Self {
        let api = ctx.api.clone();
        let baseline = Duration::from_millis(ctx.polling.agent_status_ms);
        let merging = Duration::from_millis(ctx.polling.agent_status_merging_ms);

        let spec = ResourceSpec::new(
            AGENT_STATUS_KEY,
            RefreshInterval::adaptive(move |agents| agent_status_interval(agents, baseline, merging)),
            move || {
                let api = api.clone();
                async move { api.get_value("/agents/status", &[]).await }.boxed()
            },
        )
        .on_push(|event, _| match event {
            ServerEvent::AgentStatus(_) => Some(PushAction::Revalidate),
            _ => None,
        });

        Self {
            resource: Resource::spawn(ctx.clone(), spec),
        }
    }

    pub fn resource(&self) -> &Resource<Vec<AgentStatus>> {
        &self.resource
    }

    pub fn state(&self) -> ResourceState<Vec<AgentStatus>> {
        self.resource.state()
    }

    pub fn merge_action_state(&self) -> Option<MergeActionState> {
        self.resource
            .data()
            .as_deref()
            .and_then(reviewer_merge_state)
    }

    pub fn is_merging(&self) -> bool {
        self.merge_action_state() == Some(MergeActionState::Merging)
    }

    pub fn is_merged(&self) -> bool {
        self.merge_action_state() == Some(MergeActionState::Merged)
    }

    pub fn is_merge_failed(&self) -> bool {
        self.merge_action_state() == Some(MergeActionState::MergeFailed)
    }
}
