/**
 * Piggybank Sync CLI
 *
 * Small driver around the sync engine:
 *
 *   piggybank-sync status             connection, queue and totals
 *   piggybank-sync set <id> <qty>     set a denomination count
 *   piggybank-sync history            list history entries
 *   piggybank-sync export <csv|json>  print the history export
 *   piggybank-sync sync               flush the queue and reload
 *
 * Configuration comes from `PIGGYBANK_CONFIG`, `CLIENT_API_URL`,
 * `PIGGYBANK_DB_PATH` and `DEV_USER_ID`.
 */
use std::process::ExitCode;

use piggybank_sync::client::config::Config;
use piggybank_sync::client::engine::SyncEngine;
use piggybank_sync::client::history::ExportFormat;
use piggybank_sync::client::local_db::SqliteStorage;
use piggybank_sync::shared::currency::convert_eur_to_bgn;

const USAGE: &str = "usage: piggybank-sync <status | set <id> <qty> | history | export <csv|json> | sync>";

#[derive(Debug)]
enum Command {
    Status,
    Set { id: String, quantity: i64 },
    History,
    Export(ExportFormat),
    Sync,
}

fn parse_command(args: &[String]) -> Result<Command, String> {
    match args {
        [] => Ok(Command::Status),
        [cmd] if cmd == "status" => Ok(Command::Status),
        [cmd] if cmd == "history" => Ok(Command::History),
        [cmd] if cmd == "sync" => Ok(Command::Sync),
        [cmd, id, quantity] if cmd == "set" => {
            let quantity = quantity
                .parse()
                .map_err(|_| format!("quantity must be a whole number, got '{}'", quantity))?;
            Ok(Command::Set { id: id.clone(), quantity })
        }
        [cmd, format] if cmd == "export" => format.parse().map(Command::Export).map_err(|e| format!("{}", e)),
        _ => Err(USAGE.to_string()),
    }
}

fn format_eur(cents: i64) -> String {
    format!("{}.{:02} EUR", cents / 100, cents % 100)
}

async fn run(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    let user_id = config.require_user_id()?.to_string();
    let mut app = config.into_app();
    if app.database_path.is_none() {
        app.database_path = Some(SqliteStorage::default_path());
    }

    let engine = SyncEngine::new(app).await?;
    engine.sign_in(&user_id).await?;
    let store = engine.store();

    match command {
        Command::Status => {
            let status = engine.monitor().sync_status().await;
            let total = store.grand_total().await;
            println!("user:        {}", user_id);
            println!("connection:  {:?}", status.status);
            println!("pending:     {}", status.pending_changes);
            if let Some(time) = status.last_sync_time {
                println!("last sync:   {}", time.to_rfc3339());
            }
            println!("total:       {} ({:.2} BGN)", format_eur(total), convert_eur_to_bgn(total));
            for denomination in store.denominations().await.iter().filter(|d| d.quantity > 0) {
                println!("  {:>5} x {}", denomination.label, denomination.quantity);
            }
            if let Some(error) = store.error_message().await {
                println!("warning:     {}", error);
            }
        }
        Command::Set { id, quantity } => {
            store.set_quantity(&id, quantity, &user_id).await;
            println!("{} -> {:?}", id, store.sync_status().await);
            println!("total: {}", format_eur(store.grand_total().await));
        }
        Command::History => {
            for entry in store.history().await {
                println!(
                    "{}  {:<12}  {:>14}  {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M"),
                    entry.kind.as_str(),
                    format_eur(entry.total_eur),
                    entry.title.unwrap_or_default()
                );
            }
        }
        Command::Export(format) => {
            println!("{}", engine.export_history(format, None).await?);
        }
        Command::Sync => {
            engine.sync_now().await?;
            println!("sync: {:?}, pending {}", store.sync_status().await, engine.queue().pending_count().await);
        }
    }

    engine.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&env_filter))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_command(&args) {
        Ok(command) => command,
        Err(message) => {
            eprintln!("{}", message);
            return ExitCode::from(2);
        }
    };

    match run(command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("[Cli] {}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
