use anyhow::Result;
use clap::{Parser, Subcommand};
use storage::Storage;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://./data/gateway.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the stored status of a protocol message id.
    Status { message_id: String },
    /// Print the newest message recorded for an instance.
    Latest { source: String },
    /// Remove every status row.
    Reset {
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::Status { message_id } => {
            match storage.message_status_by_id(&message_id).await? {
                Some(record) => println!(
                    "message_id={} status={} timestamp={} source={}",
                    record.message_id, record.status, record.timestamp, record.source
                ),
                None => println!("no status recorded for message_id={message_id}"),
            }
        }
        Command::Latest { source } => {
            let (message_id, timestamp) = storage.latest_message_for_source(&source).await?;
            if message_id.is_empty() {
                println!("no messages recorded for source={source}");
            } else {
                println!("message_id={message_id} timestamp={timestamp}");
            }
        }
        Command::Reset { yes } => {
            if !yes {
                anyhow::bail!("refusing to delete all statuses without --yes");
            }
            let removed = storage.delete_all_message_statuses().await?;
            println!("removed {removed} status rows");
        }
    }

    Ok(())
}
