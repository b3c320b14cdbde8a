use std::time::Duration;

use futures::FutureExt;

use super::resource::{PushAction, RefreshInterval, Resource, ResourceSpec};
use super::SyncContext;
use crate::models::{Task, TaskQuery};
use crate::realtime::ServerEvent;

/// Task list for one filter/page. Any task update may move a task in or out
/// of the page, so every `task:update` revalidates.
pub fn task_list_resource(ctx: &SyncContext, query: &TaskQuery) -> Resource<Vec<Task>> {
    let api = ctx.api.clone();
    let path = query.path();
    let pairs = query.query_pairs();

    let spec = ResourceSpec::new(
        query.cache_key(),
        RefreshInterval::Fixed(Duration::from_millis(ctx.polling.task_list_ms)),
        move || {
            let api = api.clone();
            let pairs = pairs.clone();
            async move { api.get_value(path, &pairs).await }.boxed()
        },
    )
    .on_push(|event, _| match event {
        ServerEvent::TaskUpdate(_) => Some(PushAction::Revalidate),
        _ => None,
    });

    Resource::spawn(ctx.clone(), spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Session;
    use crate::models::TaskStatus;
    use crate::sync::testing::context;

    #[tokio::test]
    async fn test_key_follows_query() {
        let session = Session::new(None);
        let (ctx, _ends) = context(&session);

        let all = task_list_resource(&ctx, &TaskQuery::default());
        assert_eq!(all.key(), "tasks");

        let filtered = task_list_resource(
            &ctx,
            &TaskQuery {
                status: Some(TaskStatus::Done),
                page: Some(2),
                ..Default::default()
            },
        );
        assert_eq!(filtered.key(), "tasks?page=2&status=done");
    }
}
