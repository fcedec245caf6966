use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};

use chock_rs::config::Settings;
use chock_rs::daemon::{AccountHandle, InstrumentHandle, OrderStatuses};
use chock_rs::engine::acquisition::{AcquisitionEngine, AcquisitionEvent};
use chock_rs::engine::signal::CancelSignal;
use chock_rs::engine::types::Order;
use chock_rs::telemetry;
use chock_rs::ApiClient;

#[derive(Parser)]
#[command(name = "chock")]
#[command(about = "Accumulate a stock position on a Stockfighter venue with IOC orders")]
struct Args {
    /// TOML settings file (defaults to ./chock.toml if present)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Legacy 4-line file: api key, account, venue, stock
    #[arg(long, conflicts_with = "config")]
    information: Option<PathBuf>,

    /// Port for the Prometheus exporter (needs the metrics-exporter feature)
    #[arg(long, default_value = "9000")]
    metrics_port: u16,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Buy the configured stock whenever the ask is under the reference price
    Acquire {
        /// Highest price (cents, exclusive) worth paying; prompted if absent
        #[arg(long)]
        reference_price: Option<u64>,
        /// Shares to accumulate
        #[arg(long)]
        target: Option<u64>,
    },
    /// Check service and venue liveness and list the venue's stocks
    Probe,
    /// Show the order book and quote for the configured stock
    Book,
    /// Show order statuses for one venue, or every discovered venue
    Orders {
        #[arg(long)]
        venue: Option<String>,
    },
    /// Cancel an order on the configured stock
    Cancel { id: u64 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok(); // load .env
    telemetry::init_tracing("info,chock_rs=info");
    let args = Args::parse();
    telemetry::init_metrics(args.metrics_port)?;

    let settings = match &args.information {
        Some(path) => Settings::from_information_file(path)?,
        None => Settings::load(args.config.as_deref())?,
    };

    let client = Arc::new(ApiClient::new(settings.credentials()?, settings.client_options())?);
    let account = AccountHandle::new(client);

    match args.command {
        Command::Probe => probe(&account, &settings).await,
        Command::Orders { venue } => orders(&account, &settings, venue.as_deref()).await,
        Command::Book => {
            let stock = configured_stock(&account, &settings).await?;
            let book = stock.get_order_book().await?;
            let quote = stock.get_quote().await?;
            println!("=== {stock} ===");
            for level in book.asks.iter().rev() {
                println!("  ASK {:>8} x {}", level.price, level.size);
            }
            for level in &book.bids {
                println!("  BID {:>8} x {}", level.price, level.size);
            }
            println!(
                "Quote: bid {:?} ({}), ask {:?} ({}), ask depth {}, last {:?}",
                quote.bid, quote.bid_size, quote.ask, quote.ask_size, quote.ask_depth, quote.last
            );
            Ok(())
        }
        Command::Cancel { id } => {
            let stock = configured_stock(&account, &settings).await?;
            let order = stock.cancel_order(id).await?;
            print_order(&order);
            Ok(())
        }
        Command::Acquire { reference_price, target } => {
            let mut settings = settings;
            if let Some(target) = target {
                settings.target_quantity = target;
            }
            settings.validate()?;
            let reference_price = match reference_price.or(settings.reference_price) {
                Some(p) => p,
                None => prompt_reference_price()?,
            };
            acquire(&account, &settings, reference_price).await
        }
    }
}

async fn configured_stock(account: &AccountHandle, settings: &Settings) -> anyhow::Result<Arc<InstrumentHandle>> {
    let table = account.spawn_instrument_handles(&[settings.venue.as_str()]).await;
    if !table.contains_key(&settings.venue) {
        bail!("venue {} is not up", settings.venue);
    }
    account
        .instrument(&settings.venue, &settings.stock)
        .with_context(|| format!("{} does not list {}", settings.venue, settings.stock))
}

async fn acquire(account: &AccountHandle, settings: &Settings, reference_price: u64) -> anyhow::Result<()> {
    let stock = configured_stock(account, settings).await?;
    info!(%stock, target = settings.target_quantity, reference_price, "starting acquisition");

    let cancel = CancelSignal::new();
    cancel.cancel_on_ctrl_c();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let AcquisitionEvent::OrderFilled { order_id, price, requested, filled, remaining, .. } = event {
                println!("order {order_id}: {filled}/{requested} @ {price}, {remaining} to go");
            }
        }
    });

    let engine = AcquisitionEngine::new(stock, settings.acquisition_config(reference_price))
        .with_cancel(cancel)
        .with_events(tx);
    let result = engine.run().await;
    drop(engine); // closes the event channel
    printer.await.ok();

    match result {
        Ok(report) => {
            println!(
                "{:?} after {} cycles: bought {} of {} ({} orders)",
                report.outcome,
                report.cycles,
                report.state.filled(),
                report.state.target(),
                report.orders_submitted
            );
            Ok(())
        }
        Err(e) => {
            println!("Stopped: bought {} of {}", e.state.filled(), e.state.target());
            Err(e.into())
        }
    }
}

async fn probe(account: &AccountHandle, settings: &Settings) -> anyhow::Result<()> {
    let service_up = account.is_service_up().await;
    println!("API heartbeat: {}", if service_up { "up" } else { "DOWN" });
    if !service_up {
        bail!("service heartbeat failed");
    }
    match account.discover_instruments(&settings.venue).await {
        Ok(symbols) => {
            println!("Venue {}: up, {} stocks", settings.venue, symbols.len());
            for symbol in symbols {
                println!("  {symbol}");
            }
            Ok(())
        }
        Err(e) => {
            warn!(venue = %settings.venue, error = %e, "venue probe failed");
            Err(e.into())
        }
    }
}

async fn orders(account: &AccountHandle, settings: &Settings, venue: Option<&str>) -> anyhow::Result<()> {
    if venue.is_none() {
        account.spawn_instrument_handles(&[settings.venue.as_str()]).await;
    }
    match account.get_all_order_statuses(venue).await? {
        OrderStatuses::Venue(orders) => orders.iter().for_each(print_order),
        OrderStatuses::PerVenue(per_venue) => {
            for (venue, result) in per_venue {
                println!("=== {venue} ===");
                match result {
                    Ok(orders) => orders.iter().for_each(print_order),
                    Err(e) => println!("  error: {e}"),
                }
            }
        }
    }
    Ok(())
}

fn print_order(order: &Order) {
    println!(
        "  #{} {} {:?} {} {}/{} @ {} {:?}",
        order.id,
        order.symbol,
        order.direction,
        order.order_type,
        order.filled_quantity(),
        order.original_qty,
        order.price,
        order.status()
    );
}

fn prompt_reference_price() -> anyhow::Result<u64> {
    print!("Average Price: ");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    input
        .trim()
        .parse::<u64>()
        .with_context(|| format!("not a price in cents: {:?}", input.trim()))
}
