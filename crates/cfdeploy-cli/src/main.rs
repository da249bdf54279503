use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "cfdeploy",
    about = "Declarative application deployments with blue-green rollover",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a deployment config for errors
    Validate {
        /// Path to the deployment config (TOML)
        config: PathBuf,
    },
    /// Show what applying a config would do to the recorded application.
    ///
    /// Prints one of: create, no-op, update, restart, restage, rollover,
    /// followed by the attributes that changed.
    Plan {
        /// Path to the deployment config (TOML)
        config: PathBuf,
        /// Resource address the application is recorded under
        #[arg(short, long)]
        address: String,
        /// State database
        #[arg(short, long, default_value = "cfdeploy.redb")]
        state: PathBuf,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Inspect recorded state
    State {
        #[command(subcommand)]
        action: StateAction,
    },
    /// Inspect applications left behind by rollovers
    Deposed {
        #[command(subcommand)]
        action: DeposedAction,
    },
}

#[derive(Subcommand)]
enum StateAction {
    /// Show recorded applications
    Show {
        /// Only this address
        address: Option<String>,
        #[arg(short, long, default_value = "cfdeploy.redb")]
        state: PathBuf,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[derive(Subcommand)]
enum DeposedAction {
    /// List deposed applications across all records
    List {
        #[arg(short, long, default_value = "cfdeploy.redb")]
        state: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cfdeploy=info".parse()?)
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { config } => commands::validate::validate(&config),
        Commands::Plan {
            config,
            address,
            state,
            format,
        } => commands::plan::plan(&config, &address, &state, &format),
        Commands::State { action } => match action {
            StateAction::Show {
                address,
                state,
                format,
            } => commands::state::show(&state, address.as_deref(), &format),
        },
        Commands::Deposed { action } => match action {
            DeposedAction::List { state } => commands::state::list_deposed(&state),
        },
    }
}
