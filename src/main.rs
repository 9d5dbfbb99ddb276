use std::path::PathBuf;

use clap::{Parser, Subcommand};
use eventgate::audit::AuditTrail;
use eventgate::guard::engine::Guard;
use eventgate::guard::loader::load_policies;
use eventgate::guard::types::{GuardConfig, Location};
use eventgate::session::Session;
use eventgate::{settings, web};
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "eventgate",
    version,
    about = "Role-based route guards for the event dashboard"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP decision service (default)
    Serve,
    /// Print the guard decision for one location
    Check {
        /// Location to check, e.g. "/events?create=true"
        location: String,
        /// Role of the signed-in user
        #[arg(long, default_value = "user")]
        role: String,
        #[arg(long, default_value = "cli")]
        user_id: String,
        /// Check as a visitor without a session
        #[arg(long, conflicts_with = "loading")]
        anonymous: bool,
        /// Check while the session is still bootstrapping
        #[arg(long)]
        loading: bool,
        /// Override the policies directory from the configuration
        #[arg(long)]
        policies: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).with_writer(std::io::stderr).init();

    let cli = Cli::parse();

    let settings = settings::Settings::load(&cli.config)?;
    tracing::debug!(?settings, "Loaded configuration");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => web::serve(settings).await?,
        Command::Check {
            location,
            role,
            user_id,
            anonymous,
            loading,
            policies,
        } => {
            let dir = policies.unwrap_or_else(|| settings.guard.policies_dir.clone());
            let table = load_policies(&dir, GuardConfig::from(&settings.guard))?;
            let audit = AuditTrail::from_settings_inline(&settings.audit)?;

            let session = if loading {
                Session::uninitialized()
            } else if anonymous {
                Session::anonymous()
            } else {
                Session::authenticated(user_id, role.as_str())
            };
            let location = Location::parse(&location)?;

            let guard = Guard::new(table, audit.log);
            let decision = guard.decide(&session, &location, Some("eventgate-cli"));
            println!(
                "{}",
                serde_json::to_string_pretty(&decision).into_diagnostic()?
            );
        }
    }
    Ok(())
}
