//! ppe_events - print recent violations from the local store as JSON

use anyhow::Result;
use clap::Parser;

use ppe_zone_kernel::{SqliteViolationStore, ViolationStore};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the violation database.
    #[arg(long, env = "PPE_DB_PATH", default_value = "ppe_violations.db")]
    db_path: String,
    /// Maximum number of violations to print (newest first).
    #[arg(long, default_value_t = 20)]
    limit: usize,
    /// Only show violations from this camera.
    #[arg(long)]
    camera: Option<String>,
    /// Only show violations attributed to this identity name.
    #[arg(long)]
    identity: Option<String>,
    /// Pretty-print the JSON output.
    #[arg(long)]
    pretty: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let mut store = SqliteViolationStore::open(&args.db_path)?;
    let filtered = args.camera.is_some() || args.identity.is_some();
    // Over-fetch when filtering so the limit applies to matching rows.
    let fetch = if filtered { usize::MAX >> 1 } else { args.limit };

    let rows: Vec<_> = store
        .recent(fetch)?
        .into_iter()
        .filter(|row| {
            args.camera
                .as_deref()
                .map_or(true, |camera| row.event.camera_id == camera)
        })
        .filter(|row| {
            args.identity
                .as_deref()
                .map_or(true, |name| row.event.identity_name == name)
        })
        .take(args.limit)
        .collect();

    let json = if args.pretty {
        serde_json::to_string_pretty(&rows)?
    } else {
        serde_json::to_string(&rows)?
    };
    println!("{}", json);
    log::info!("printed {} violations from {}", rows.len(), args.db_path);
    Ok(())
}
