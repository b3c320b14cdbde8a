//! Hosting deployment status, `masdash deployment`.

use anyhow::{Context, Result};

use masdash::Dashboard;
use masdash::models::ServiceStatus;

fn styled(status: ServiceStatus) -> console::StyledObject<&'static str> {
    match status {
        ServiceStatus::Ok => console::style("ok").green(),
        ServiceStatus::Error => console::style("error").red().bold(),
        ServiceStatus::Building => console::style("building").yellow(),
        ServiceStatus::Unknown => console::style("unknown").dim(),
    }
}

pub async fn cmd_deployment(dash: &Dashboard) -> Result<()> {
    let status = dash
        .api()
        .deployment_status()
        .await
        .context("Failed to fetch deployment status")?;
    println!("Frontend (vercel):  {}", styled(status.vercel));
    println!("Backend  (railway): {}", styled(status.railway));
    Ok(())
}
