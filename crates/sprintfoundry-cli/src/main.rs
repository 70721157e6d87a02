mod config;
mod gate_cmd;
mod invariant_cmds;
mod log_cmd;
mod plan_cmds;
mod report_cmd;
mod status_cmd;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "sprintfoundry", about = "filesystem-based multi-step coding agent orchestrator")]
struct Cli {
    /// Workspace directory to operate against (overrides
    /// SPRINTFOUNDRY_WORKSPACE and the config file default).
    #[arg(long, global = true)]
    workspace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan inspection and validation
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
    /// Event log inspection
    Events {
        #[command(subcommand)]
        command: EventsCommands,
    },
    /// Human review gate inspection and resolution
    Gate {
        #[command(subcommand)]
        command: GateCommands,
    },
    /// Resumable-runtime session inspection
    Sessions {
        /// Filter to a specific agent id
        #[arg(long)]
        agent: Option<String>,
    },
    /// Quality-gate invariant presets
    Invariant {
        #[command(subcommand)]
        command: InvariantCommands,
    },
    /// Summarise a run's event log
    Report {
        /// Run ID to report on
        run_id: String,
    },
}

#[derive(Subcommand)]
pub enum PlanCommands {
    /// Run a plan through the validator against a ticket
    Validate {
        /// Path to a ticket JSON file
        #[arg(long)]
        ticket: String,
        /// Path to an execution plan JSON file
        #[arg(long)]
        plan: String,
        /// Path to a rules JSON file (defaults to the built-in rule set)
        #[arg(long)]
        rules: Option<String>,
    },
    /// Show a plan's steps, dependencies, and gates
    Show {
        /// Path to an execution plan JSON file
        plan: String,
    },
}

#[derive(Subcommand)]
pub enum EventsCommands {
    /// Show events, optionally filtered by run id or event type
    Show {
        #[arg(long)]
        run_id: Option<String>,
        #[arg(long)]
        r#type: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum GateCommands {
    /// List pending human review gates
    List,
    /// Approve a pending review
    Approve {
        review_id: String,
        #[arg(long)]
        feedback: Option<String>,
    },
    /// Reject a pending review
    Reject {
        review_id: String,
        #[arg(long)]
        feedback: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum InvariantCommands {
    /// List built-in invariant presets
    List {
        /// Restrict to one project type (rust, node, python, go)
        #[arg(long)]
        project_type: Option<String>,
    },
    /// Detect the project type at `dir` and run its quality gate
    Check {
        /// Directory to check (defaults handled by caller)
        #[arg(default_value = ".")]
        dir: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let workspace = config::resolve_workspace(cli.workspace.as_deref())?;

    match cli.command {
        Commands::Plan { command } => plan_cmds::run_plan_command(command),
        Commands::Events { command } => match command {
            EventsCommands::Show { run_id, r#type } => {
                log_cmd::run_events_show(&workspace, run_id.as_deref(), r#type.as_deref()).await
            }
        },
        Commands::Gate { command } => gate_cmd::run_gate_command(command, &workspace).await,
        Commands::Sessions { agent } => status_cmd::run_sessions_show(&workspace, agent.as_deref()).await,
        Commands::Invariant { command } => invariant_cmds::run_invariant_command(command).await,
        Commands::Report { run_id } => report_cmd::run_report(&workspace, &run_id).await,
    }
}
