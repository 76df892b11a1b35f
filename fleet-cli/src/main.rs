//! fleet — sync, rebuild and redeploy services on git pushes.
//!
//! # Usage
//!
//! ```text
//! fleet event <repository> <ref> [--dry-run] [--json]
//! fleet init [--deploy] [--json]
//! fleet registry check
//! fleet registry list [--json]
//! fleet daemon start|stop|status|reload|logs|install|uninstall
//! fleet daemon send <repository> <ref> [--wait]
//! ```

mod commands;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};

use commands::{
    daemon::DaemonCommand, event::EventArgs, init::InitArgs, registry::RegistryCommand,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "fleet",
    version,
    about = "Keep container services in step with their git repositories",
    long_about = None,
)]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug). `RUST_LOG` wins when set.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Route one push event and run its pipeline in-process.
    Event(EventArgs),

    /// Bring every registered service to its latest tag.
    Init(InitArgs),

    /// Validate or show the service registry.
    Registry {
        #[command(subcommand)]
        command: RegistryCommand,
    },

    /// Manage the fleet background daemon and its systemd unit.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();

    // The daemon installs its own subscriber.
    if !matches!(
        cli.command,
        Commands::Daemon {
            command: DaemonCommand::Start
        }
    ) {
        init_tracing(cli.verbose);
    }

    match cli.command {
        Commands::Event(args) => args.run(),
        Commands::Init(args) => args.run(),
        Commands::Registry { command } => commands::registry::run(command),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}

fn init_tracing(verbose: u8) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
