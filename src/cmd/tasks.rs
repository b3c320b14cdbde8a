//! Task commands: `masdash tasks`, `masdash task <id>`, `masdash new`.

use anyhow::{Context, Result};

use masdash::Dashboard;
use masdash::models::{AgentEvent, NewTask, Task, TaskQuery, TaskStatus};

fn styled_status(status: TaskStatus) -> console::StyledObject<&'static str> {
    let s = console::style(status.as_str());
    match status {
        TaskStatus::Done => s.green(),
        TaskStatus::Failed | TaskStatus::Escalated => s.red(),
        TaskStatus::Pending => s.dim(),
        _ => s.yellow(),
    }
}

fn print_task_row(task: &Task) {
    println!(
        "{:<38} {:<10} {:<28} {}",
        task.id,
        styled_status(task.status),
        task.repo_full_name,
        task.updated_at
    );
}

fn print_task(task: &Task) {
    println!("{}", console::style(format!("Task {}", task.id)).bold().cyan());
    println!("  Repo:    {}", task.repo_full_name);
    println!("  Status:  {}", styled_status(task.status));
    if let Some(branch) = &task.branch_name {
        println!("  Branch:  {}", branch);
    }
    if let Some(pr) = task.pr_number {
        println!("  PR:      #{}", pr);
    }
    if task.fix_attempts > 0 {
        println!("  Fixes:   {}", task.fix_attempts);
    }
    println!("  Updated: {}", task.updated_at);
    if let Some(plan) = &task.planner_output {
        println!();
        println!("  Plan: {}", plan.summary);
        for (i, step) in plan.steps.iter().enumerate() {
            println!("    {}. {}", i + 1, step);
        }
    }
    println!();
    println!("{}", task.issue_body);
}

fn print_event(event: &AgentEvent) {
    let kind: String = event.event_type.clone().into();
    println!(
        "{} {:<9} {:<20} {}",
        console::style(&event.timestamp).dim(),
        event.agent.as_str(),
        console::style(kind).cyan(),
        event.message
    );
}

pub async fn cmd_tasks(
    dash: &Dashboard,
    status: Option<TaskStatus>,
    repo: Option<String>,
    page: Option<u32>,
    limit: Option<u32>,
) -> Result<()> {
    let query = TaskQuery {
        status,
        repo,
        page,
        limit,
    };
    let tasks = dash
        .api()
        .list_tasks(&query)
        .await
        .context("Failed to list tasks")?;

    if tasks.is_empty() {
        println!("No tasks.");
        return Ok(());
    }
    for task in &tasks {
        print_task_row(task);
    }
    Ok(())
}

pub async fn cmd_new(dash: &Dashboard, repo: String, body: String) -> Result<()> {
    let task = dash
        .api()
        .create_task(&NewTask {
            repo_full_name: repo,
            issue_body: body,
        })
        .await
        .context("Failed to create task")?;
    println!("Created task {}", console::style(&task.id).bold());
    Ok(())
}

pub async fn cmd_task(dash: &Dashboard, id: &str, watch: bool) -> Result<()> {
    if !watch {
        let task = dash
            .api()
            .get_task(id)
            .await
            .with_context(|| format!("Failed to fetch task {}", id))?;
        print_task(&task);
        return Ok(());
    }

    super::require_token(dash)?;
    let resource = dash.task(id);
    let feed = dash.task_events(id);
    let mut state = resource.subscribe();
    let mut changes = feed.changes();

    let first = resource.ready().await;
    match (&first.data, &first.error) {
        (Some(task), _) => print_task(task),
        (None, Some(err)) => anyhow::bail!("Failed to fetch task {}: {}", id, err),
        (None, None) => {}
    }
    println!();
    println!("{}", console::style("Following agent events (Ctrl-C to stop)").dim());

    let mut last_status = first.data.as_ref().map(|t| t.status);
    let mut last_event: Option<AgentEvent> = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = state.borrow_and_update().data.as_ref().map(|t| t.status);
                if status != last_status {
                    if let Some(status) = status {
                        println!("{} {}", console::style("status").bold(), styled_status(status));
                    }
                    last_status = status;
                }
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let events = feed.events();
                // Everything after the last printed event; all of it if that one was evicted.
                let start = last_event
                    .as_ref()
                    .and_then(|last| events.iter().rposition(|e| e == last))
                    .map_or(0, |i| i + 1);
                for event in &events[start..] {
                    print_event(event);
                }
                if let Some(event) = events.last() {
                    last_event = Some(event.clone());
                }
            }
        }
    }
    Ok(())
}
