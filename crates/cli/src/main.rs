mod settings;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use futarb_board::{apply_view, SortKey, ViewOptions};
use futarb_core::*;
use futarb_engine::{build_comparison_rows, compute_stats, lookup_lot_size, Refresher};
use settings::{Settings, SourceKind};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "futarb")]
#[command(about = "Spot/futures differential board: compare cash prices against futures expiries")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Settings file
    #[arg(short, long, env = "FUTARB_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server with a live board
    Serve {
        /// Bind address (overrides server.bind)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Run one refresh against the configured source and print the board
    Scan {
        /// Only show one expiry (current, near/next, far)
        #[arg(short, long)]
        bucket: Option<ExpiryBucket>,

        /// Only show contracts trading above spot
        #[arg(long)]
        profitable_only: bool,

        /// Sort by profit, change or symbol
        #[arg(short, long, default_value = "profit")]
        sort: SortKey,

        /// Maximum rows to print
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Compare a spot CSV against one futures CSV, offline
    Compare {
        /// Spot quotes (symbol plus ask and/or ltp columns)
        #[arg(long)]
        spot: PathBuf,

        /// Futures quotes for a single expiry
        #[arg(long)]
        futures: PathBuf,

        /// Expiry the futures file belongs to
        #[arg(short, long, default_value = "current")]
        bucket: ExpiryBucket,

        /// Maximum rows to print
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show how contract symbols resolve and classify
    Classify {
        #[arg(required = true)]
        symbols: Vec<String>,
    },

    /// Show lot sizes for symbols, or the whole table when none are given
    Lots { symbols: Vec<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    if cli.json_logs {
        fmt().json().with_env_filter(filter).with_target(false).init();
    } else {
        fmt().with_env_filter(filter).with_target(false).init();
    }

    let settings = Settings::load(cli.config.as_deref())
        .with_context(|| match &cli.config {
            Some(path) => format!("Loading settings from {}", path.display()),
            None => "Loading default settings".to_string(),
        })?;

    match cli.command {
        Commands::Serve { bind } => serve(settings, bind).await?,
        Commands::Scan {
            bucket,
            profitable_only,
            sort,
            limit,
        } => {
            let options = ViewOptions {
                bucket,
                profitable_only,
                sort,
                search: None,
                limit,
            };
            scan(settings, options).await?;
        }
        Commands::Compare {
            spot,
            futures,
            bucket,
            limit,
        } => compare(settings, spot, futures, bucket, limit)?,
        Commands::Classify { symbols } => classify(&settings, &symbols),
        Commands::Lots { symbols } => lots(&settings, &symbols)?,
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

fn lot_table(settings: &Settings) -> Result<Arc<LotSizeTable>> {
    let table = futarb_data::load_lot_size_table(
        settings.lot_sizes.file.as_deref(),
        settings.lot_sizes.default,
    )
    .context("Loading lot sizes")?;
    Ok(Arc::new(table))
}

fn build_source(settings: &Settings, calendar: &ExpiryCalendar) -> Result<Arc<dyn QuoteSource>> {
    let source: Arc<dyn QuoteSource> = match settings.source.kind {
        SourceKind::Simulated => {
            tracing::warn!("Simulated source selected, serving built-in demo prices");
            Arc::new(futarb_sources_common::SimulatedQuoteSource::demo())
        }
        SourceKind::Algo => Arc::new(futarb_sources_algo::AlgoClient::new(
            settings.source.algo.clone(),
        )?),
        SourceKind::Kite => Arc::new(futarb_sources_kite::KiteClient::new(
            settings.source.kite.clone(),
            calendar.clone(),
        )?),
        SourceKind::Csv => {
            let Some(dir) = &settings.source.csv_dir else {
                bail!("source.csv_dir is required for the csv source");
            };
            Arc::new(futarb_data::CsvQuoteSource::new(dir))
        }
    };
    Ok(source)
}

fn refresher(settings: &Settings) -> Result<Refresher> {
    let calendar = settings.calendar.calendar(Utc::now().date_naive());
    let source = build_source(settings, &calendar)?;
    tracing::info!(
        source = %source.name(),
        calendar = ?calendar.entries(),
        "Quote source ready"
    );
    Ok(
        Refresher::new(source, lot_table(settings)?, Arc::new(calendar))
            .with_buckets(settings.refresh.buckets.clone()),
    )
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn serve(settings: Settings, bind: Option<String>) -> Result<()> {
    let refresher = Arc::new(refresher(&settings)?);
    let state = Arc::new(futarb_api::AppState::new(refresher, settings.alerts.clone()));
    let bind = bind.unwrap_or(settings.server.bind);
    futarb_api::start_server(state, &bind, settings.refresh.mode, settings.refresh.interval()).await
}

async fn scan(settings: Settings, options: ViewOptions) -> Result<()> {
    let refresher = refresher(&settings)?;
    let snapshot = refresher.refresh().await?;

    let rows = apply_view(&snapshot.rows, &options);
    print_rows(&rows);

    let stats = compute_stats(&snapshot);
    println!(
        "  {} rows from {} | {} profitable | mean {:.2}% | dropped {} (unmatched {}, no price {}, unclassified {})",
        stats.total_rows,
        snapshot.source,
        stats.profitable,
        stats.mean_percent,
        stats.drops.total(),
        stats.drops.unmatched_spot,
        stats.drops.missing_price,
        stats.drops.unclassified,
    );
    if let Some(best) = stats.best {
        println!(
            "  Best: {} ({}) {:+.2}% | {:.2} per lot",
            best.symbol, best.category, best.percent_delta, best.lot_spread
        );
    }
    Ok(())
}

fn compare(
    settings: Settings,
    spot_path: PathBuf,
    futures_path: PathBuf,
    bucket: ExpiryBucket,
    limit: Option<usize>,
) -> Result<()> {
    if !bucket.is_tracked() {
        bail!("--bucket must be current, near or far");
    }
    let spot = futarb_data::csv_loader::load_quotes_from_csv(&spot_path)
        .with_context(|| format!("Reading {}", spot_path.display()))?;
    let futures = futarb_data::csv_loader::load_quotes_from_csv(&futures_path)
        .with_context(|| format!("Reading {}", futures_path.display()))?;
    let lots = lot_table(&settings)?;

    tracing::info!(spot = spot.len(), futures = futures.len(), %bucket, "Comparing quotes");
    let report = build_comparison_rows(&spot, &futures, bucket, &lots);

    let options = ViewOptions {
        limit,
        ..ViewOptions::default()
    };
    print_rows(&apply_view(&report.rows, &options));
    println!(
        "  {} rows | dropped {} (unmatched {}, no price {}) | {} lot sizes defaulted",
        report.rows.len(),
        report.drops.total(),
        report.drops.unmatched_spot,
        report.drops.missing_price,
        report.defaulted_lot_sizes,
    );
    Ok(())
}

fn classify(settings: &Settings, symbols: &[String]) {
    let calendar = settings.calendar.calendar(Utc::now().date_naive());
    println!("{:<24} {:<14} {:<8} {}", "SYMBOL", "BASE", "MONTH", "BUCKET");
    for symbol in symbols {
        let parsed = ContractSymbol::parse(symbol);
        println!(
            "{:<24} {:<14} {:<8} {}",
            parsed.raw,
            parsed.base,
            parsed.month_token.as_deref().unwrap_or("-"),
            classify_expiry(&calendar, symbol),
        );
    }
}

fn lots(settings: &Settings, symbols: &[String]) -> Result<()> {
    let table = lot_table(settings)?;
    if symbols.is_empty() {
        for (symbol, lot) in table.sorted_entries() {
            println!("{:<14} {:>6}", symbol, lot);
        }
        println!("  {} entries, default {}", table.len(), table.default_lot_size());
        return Ok(());
    }
    for symbol in symbols {
        let base = resolve_base_symbol(symbol);
        let note = if table.get(&base).is_some() { "" } else { " (default)" };
        println!("{:<24} {:<14} {:>6}{}", symbol.to_ascii_uppercase(), base, lookup_lot_size(&table, &base), note);
    }
    Ok(())
}

fn print_rows(rows: &[ComparisonRow]) {
    let sep = "=".repeat(96);
    println!("\n{sep}");
    println!(
        "  {:<22} {:<8} {:>6} {:>11} {:>11} {:>9} {:>8} {:>11}",
        "CONTRACT", "EXPIRY", "LOT", "SPOT", "FUTURES", "CHANGE", "PCT", "PER LOT"
    );
    println!("{sep}");
    for row in rows {
        println!(
            "  {:<22} {:<8} {:>6} {:>11.2} {:>11.2} {:>9.2} {:>7.2}% {:>11.2}",
            row.symbol,
            row.category.as_str(),
            row.lot_size,
            row.spot_price,
            row.futures_price,
            row.absolute_delta,
            row.percent_delta,
            row.lot_spread,
        );
    }
    println!("{sep}");
}
