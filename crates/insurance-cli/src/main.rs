mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "insurance-cli")]
#[command(about = "Durable HTTP request delivery engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Request administration commands
    Request {
        #[command(subcommand)]
        cmd: RequestCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    Migrate,
}

#[derive(Subcommand)]
enum RequestCmd {
    /// Insert a new `ready` row from CLI flags.
    Enqueue {
        #[arg(long, default_value = "POST")]
        method: String,

        #[arg(long)]
        url: String,

        #[arg(long, default_value_t = 0)]
        priority: i32,

        /// Inline JSON object of request headers, encrypted at rest.
        #[arg(long = "headers-json")]
        headers_json: Option<String>,

        /// Inline JSON payload.
        #[arg(long)]
        payload: Option<String>,

        /// Path to a file containing the JSON payload.
        #[arg(long = "payload-file")]
        payload_file: Option<String>,

        #[arg(long = "retry-factor", default_value_t = 2)]
        retry_factor: i32,

        #[arg(long = "retry-inconsistent", default_value_t = true)]
        retry_inconsistent: bool,
    },

    /// Move a request straight to `abandoned`, refusing if it is already
    /// terminal.
    Abandon {
        id: i64,
    },

    /// Move a stuck `pending` row back to `ready` and clear its lock.
    Unlock {
        id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => match cmd {
            DbCmd::Status => commands::db::status().await?,
            DbCmd::Migrate => commands::db::migrate().await?,
        },

        Commands::Request { cmd } => match cmd {
            RequestCmd::Enqueue {
                method,
                url,
                priority,
                headers_json,
                payload,
                payload_file,
                retry_factor,
                retry_inconsistent,
            } => {
                commands::request::enqueue(
                    method,
                    url,
                    priority,
                    headers_json,
                    payload,
                    payload_file,
                    retry_factor,
                    retry_inconsistent,
                )
                .await?
            }
            RequestCmd::Abandon { id } => commands::request::abandon(id).await?,
            RequestCmd::Unlock { id } => commands::request::unlock(id).await?,
        },
    }

    Ok(())
}
