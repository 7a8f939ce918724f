use anyhow::Result;
use clap::{Parser, Subcommand};
use linkup_store::bootstrap;
use linkup_store::cli;
use linkup_store::config::StoreConfig;
use linkup_store::seed;
use linkup_store::telemetry;
use linkup_store::utils::{short_id, APP_NAME};

#[derive(Parser)]
#[command(author, version, about = "LinkUp local feed store and CLI")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the interactive feed CLI
    Cli {
        /// User id, id prefix or name to sign in as
        #[arg(long)]
        user: Option<String>,
    },
    /// Fill the store with demo users, posts, likes and comments
    Seed {
        #[arg(long, default_value_t = 5)]
        users: usize,
        #[arg(long, default_value_t = 30)]
        posts: usize,
    },
    /// List known users
    Users,
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();

    let args = Args::parse();

    let config = StoreConfig::from_env()?;
    let resources = bootstrap::initialize(&config)?;
    for dir in &resources.directories_created {
        tracing::info!(path = %dir, "created directory");
    }
    tracing::info!(app = APP_NAME, "bootstrap complete");

    match args.command.unwrap_or(Command::Cli { user: None }) {
        Command::Cli { user } => cli::run_cli(resources.backend, config.feed, user).await,
        Command::Seed { users, posts } => {
            let summary = seed::seed(&resources.backend, users, posts).await?;
            println!(
                "Seeded {} users, {} posts, {} likes, {} comments",
                summary.users, summary.posts, summary.likes, summary.comments
            );
            Ok(())
        }
        Command::Users => {
            for user in resources.backend.list_users()? {
                println!("{}  {}", short_id(&user.id), user.name);
            }
            Ok(())
        }
    }
}
