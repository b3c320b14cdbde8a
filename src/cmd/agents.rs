//! Agent pipeline commands: `masdash agents`, `masdash merge`.

use anyhow::{Context, Result};

use masdash::Dashboard;
use masdash::models::{AgentStatus, MergeActionState};
use masdash::sync::reviewer_merge_state;

fn print_agents(agents: &[AgentStatus]) {
    println!(
        "{:<10} {:>8} {:>8} {:>10} {:>8}  {}",
        "agent", "waiting", "active", "completed", "failed", "state"
    );
    for agent in agents {
        let state = agent.action_state.as_deref().unwrap_or("-");
        println!(
            "{:<10} {:>8} {:>8} {:>10} {:>8}  {}",
            agent.name.as_str(),
            agent.waiting,
            agent.active,
            agent.completed,
            agent.failed,
            state
        );
    }
}

fn print_merge_state(state: Option<MergeActionState>) {
    match state {
        Some(MergeActionState::Merging) => {
            println!("{}", console::style("Merge in progress").yellow().bold())
        }
        Some(MergeActionState::Merged) => println!("{}", console::style("Merged").green()),
        Some(MergeActionState::MergeFailed) => {
            println!("{}", console::style("Merge failed").red().bold())
        }
        None => {}
    }
}

pub async fn cmd_agents(dash: &Dashboard, watch: bool) -> Result<()> {
    if !watch {
        let agents = dash
            .api()
            .agent_status()
            .await
            .context("Failed to fetch agent status")?;
        print_agents(&agents);
        print_merge_state(reviewer_merge_state(&agents));
        return Ok(());
    }

    super::require_token(dash)?;
    let status = dash.agent_status();
    let mut rx = status.resource().subscribe();
    let mut last: Option<Vec<AgentStatus>> = None;
    println!("{}", console::style("Watching agent status (Ctrl-C to stop)").dim());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = rx.borrow_and_update().clone();
                if let Some(err) = &state.error {
                    eprintln!("{} {}", console::style("Error:").red().bold(), err);
                }
                if state.data.is_some() && state.data != last {
                    if let Some(agents) = &state.data {
                        println!();
                        print_agents(agents);
                        print_merge_state(reviewer_merge_state(agents));
                        println!(
                            "{}",
                            console::style(format!(
                                "next refresh in {}s",
                                state.refresh_interval.as_secs()
                            ))
                            .dim()
                        );
                    }
                    last = state.data;
                }
            }
        }
    }
    Ok(())
}

pub async fn cmd_merge(dash: &Dashboard, task_id: &str, branch: &str) -> Result<()> {
    let result = dash
        .api()
        .merge_branch(task_id, branch)
        .await
        .with_context(|| format!("Failed to merge {} for task {}", branch, task_id))?;

    if result.merged {
        println!("{} {}", console::style("Merged:").green().bold(), result.message);
    } else {
        println!("{} {}", console::style("Not merged:").yellow().bold(), result.message);
    }
    if let Some(url) = result.pull_request_url {
        println!("  {}", url);
    }
    Ok(())
}
