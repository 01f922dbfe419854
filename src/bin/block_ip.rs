//! Adds IP addresses to the blocklist.
//!
//! Usage: `block_ip 203.0.113.7 2001:db8::1`

use anyhow::Context;
use dotenv::dotenv;
use structopt::StructOpt;

use ip_tracking_service::config;
use ip_tracking_service::core::seed_blocklist;
use ip_tracking_service::storage::{init_pool, SqliteStore};

#[derive(Debug, StructOpt)]
#[structopt(name = "block_ip", about = "Add IP addresses to the blocklist")]
struct Opt {
    /// IPv4 or IPv6 addresses to block
    #[structopt(name = "IP", required = true, min_values = 1)]
    ips: Vec<String>,

    /// Database URL, overriding the configured one
    #[structopt(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let opt = Opt::from_args();

    let mut config = config::load_config().context("Failed to load configuration")?;
    if let Some(url) = opt.database_url {
        config.database.url = url;
    }

    let pool = init_pool(&config.database)
        .await
        .context("Failed to open database")?;
    let store = SqliteStore::new(pool);

    let outcomes = seed_blocklist(&store, &opt.ips).await;
    for outcome in &outcomes {
        if outcome.is_success() {
            println!("{}", outcome);
        } else {
            eprintln!("{}", outcome);
        }
    }

    let added = outcomes.iter().filter(|o| o.is_success()).count();
    println!("{} of {} addresses on the blocklist", added, outcomes.len());

    Ok(())
}
