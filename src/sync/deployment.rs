use std::time::Duration;

use futures::FutureExt;

use super::resource::{RefreshInterval, Resource, ResourceSpec};
use super::SyncContext;
use crate::models::DeploymentStatus;

/// Hosting status badge. Polled whether or not a session exists; a failed
/// poll keeps the previous value.
pub fn deployment_resource(ctx: &SyncContext) -> Resource<DeploymentStatus> {
    let api = ctx.api.clone();
    let spec = ResourceSpec::new(
        "deployment-status",
        RefreshInterval::Fixed(Duration::from_millis(ctx.polling.deployment_ms)),
        move || {
            let api = api.clone();
            async move { api.get_value("/api/deployment-status", &[]).await }.boxed()
        },
    )
    .public();
    Resource::spawn(ctx.clone(), spec)
}
