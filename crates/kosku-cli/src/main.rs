use anyhow::Result;
use clap::{Parser, Subcommand};
use kosku_core::{KostCategory, SearchFilters};
use kosku_search::{AppConfig, SearchService, SyncService};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "kosku")]
#[command(about = "Kost search aggregator command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the web API.
    Serve,
    /// Refresh the listing file from every reachable source.
    Sync {
        #[arg(long, default_value = "kos murah Bandung")]
        keyword: String,
    },
    /// Run one search and print the ranked hits.
    Search {
        #[arg(long)]
        location: String,
        #[arg(long, default_value_t = 1_000_000)]
        budget: u64,
        /// Comma-joined facility tags, e.g. "WiFi,AC".
        #[arg(long)]
        facilities: Option<String>,
        #[arg(long = "type", default_value = "Semua")]
        category: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let config = AppConfig::from_env();
            let state = kosku_web::AppState::from_env()?;
            kosku_web::serve(state, config.web_port).await?;
        }
        Commands::Sync { keyword } => {
            let sync = SyncService::from_env()?;
            let summary = sync.run(&keyword).await?;
            println!(
                "sync complete: listings={} sources={} price range={:?}..{:?}",
                summary.total_listings,
                summary.sources.join(","),
                summary.price_min,
                summary.price_max
            );
        }
        Commands::Search {
            location,
            budget,
            facilities,
            category,
        } => {
            let filters = SearchFilters {
                location,
                max_budget: budget,
                facilities: facilities
                    .map(|joined| {
                        joined
                            .split(',')
                            .map(str::trim)
                            .filter(|tag| !tag.is_empty())
                            .map(ToString::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
                category: KostCategory::parse_or(&category, KostCategory::Semua),
            };
            let service = SearchService::from_env()?;
            for hit in service.search(&filters).await {
                let origin = if hit.is_synthetic() { "synthetic" } else { "sourced" };
                let listing = hit.listing();
                println!(
                    "Rp {:>9}  {}  [{}] {} ({origin})",
                    listing.price, listing.name, listing.source, listing.category
                );
            }
        }
    }

    Ok(())
}
