//! Coachdesk CLI - sign in and call the coaching API from the terminal.

mod commands;
mod output;

use clap::{Parser, Subcommand};

/// Coachdesk CLI - manage your session and talk to the coaching API.
#[derive(Parser)]
#[command(name = "coach")]
#[command(about = "Coachdesk CLI for authentication and API access")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text", global = true)]
    format: output::OutputFormat,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "COACH_LOG_LEVEL")]
    log_level: Option<String>,

    /// Keep the session in memory only; nothing is written to disk
    #[arg(long, global = true)]
    ephemeral: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Login with email and password
    Login {
        /// Account email (prompted when omitted)
        #[arg(short, long)]
        email: Option<String>,
    },

    /// Create an account and sign in
    Register {
        #[arg(short, long)]
        email: String,
        /// Display name
        #[arg(short, long)]
        name: String,
        /// Account role, e.g. coach or client
        #[arg(short, long)]
        role: Option<String>,
    },

    /// Logout and clear the stored session
    Logout,

    /// Check authentication status
    Status,

    /// Print a valid access token, refreshing it first if needed
    Token,

    /// Force a token refresh cycle
    Refresh,

    /// Send an authenticated request to the API
    Request {
        /// HTTP method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,
        /// Path below the API base URL, e.g. /students
        path: String,
        /// JSON request body
        #[arg(short, long)]
        data: Option<String>,
    },

    /// Keep the session alive and print every phase change
    Watch,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let format = cli.format;

    let app = match commands::App::build(cli.ephemeral, cli.log_level.as_deref()) {
        Ok(app) => app,
        Err(e) => {
            output::print_error(&format!("{:#}", e), &format);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Login { email } => commands::login(&app, email, &format).await,
        Commands::Register { email, name, role } => {
            commands::register(&app, email, name, role, &format).await
        }
        Commands::Logout => commands::logout(&app, &format).await,
        Commands::Status => commands::status(&app, &format).await,
        Commands::Token => commands::token(&app, &format).await,
        Commands::Refresh => commands::refresh(&app, &format).await,
        Commands::Request { method, path, data } => {
            commands::request(&app, &method, &path, data.as_deref(), &format).await
        }
        Commands::Watch => commands::watch(&app, &format).await,
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e), &format);
        std::process::exit(1);
    }
}
