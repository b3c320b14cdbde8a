//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled          |
//! |-----------|---------------------------|
//! | `tasks`   | `Tasks`, `Task`, `New`    |
//! | `agents`  | `Agents`, `Merge`         |
//! | `chat`    | `Chat`                    |
//! | `status`  | `Deployment`              |
//! | `config`  | `Config`                  |

pub mod agents;
pub mod chat;
pub mod config;
pub mod status;
pub mod tasks;

pub use agents::{cmd_agents, cmd_merge};
pub use chat::cmd_chat;
pub use config::cmd_config;
pub use status::cmd_deployment;
pub use tasks::{cmd_new, cmd_task, cmd_tasks};

use masdash::Dashboard;

/// Watch modes poll authenticated resources, which stay idle without a token.
pub(crate) fn require_token(dash: &Dashboard) -> anyhow::Result<()> {
    if !dash.session().is_authenticated() {
        anyhow::bail!("Not signed in: set MASDASH_TOKEN or pass --token");
    }
    Ok(())
}
