use std::time::Duration;

use futures::FutureExt;

use super::resource::{PushAction, RefreshInterval, Resource, ResourceSpec};
use super::SyncContext;
use crate::models::{Task, TaskStatus};
use crate::realtime::{Channel, ServerEvent};

pub(crate) fn task_key(id: &str) -> String {
    format!("task-{}", id)
}

/// `task:update` for this task: patch the status in place when the pushed
/// status is one we model, otherwise refetch.
pub(crate) fn task_push(id: &str, event: &ServerEvent, current: Option<&Task>) -> Option<PushAction<Task>> {
    let ServerEvent::TaskUpdate(update) = event else {
        return None;
    };
    if update.task_id != id {
        return None;
    }
    match (current, update.status.parse::<TaskStatus>()) {
        (Some(task), Ok(status)) => {
            let mut task = task.clone();
            task.status = status;
            task.updated_at = update.updated_at.clone();
            Some(PushAction::Apply(task))
        }
        _ => Some(PushAction::Revalidate),
    }
}

/// Single task detail, joined to the task's push channel while signed in.
pub fn task_resource(ctx: &SyncContext, id: &str) -> Resource<Task> {
    let api = ctx.api.clone();
    let path = format!("/tasks/{}", id);
    let push_id = id.to_string();

    let spec = ResourceSpec::new(
        task_key(id),
        RefreshInterval::Fixed(Duration::from_millis(ctx.polling.task_ms)),
        move || {
            let api = api.clone();
            let path = path.clone();
            async move { api.get_value(&path, &[]).await }.boxed()
        },
    )
    .channel(Channel::Task(id.to_string()))
    .on_push(move |event, current| task_push(&push_id, event, current));

    Resource::spawn(ctx.clone(), spec)
}
