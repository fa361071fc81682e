use std::process::ExitCode;

use catalogo_sync::prelude::*;
use clap::{Arg, Command};
use log::error;

fn cli() -> Command<'static> {
    Command::new("catalogo-sync")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Inspect the synchronized catalog, offers and credits")
        .subcommand_required(true)
        .subcommand(Command::new("load").about("Load every collection and report where it came from"))
        .subcommand(
            Command::new("lookup")
                .about("Resolve a scan code against the catalog")
                .arg(Arg::new("code").value_name("CODE").required(true)),
        )
        .subcommand(
            Command::new("search")
                .about("Search products by name or scan code")
                .arg(Arg::new("term").value_name("TERM").required(true)),
        )
        .subcommand(Command::new("overdue").about("List pending credits past the overdue threshold"))
}

async fn run() -> catalogo_sync::error::Result<()> {
    let matches = cli().get_matches();
    let inventory = Inventory::new(SyncOptions::from_env()?)?;
    let report = inventory.load_all().await;

    match matches.subcommand() {
        Some(("load", _)) => {
            println!("products:   {:?} ({})", report.products, inventory.products().items().await.len());
            println!("especiales: {:?} ({})", report.especiales, inventory.especiales().items().await.len());
            println!("credits:    {:?} ({})", report.credits, inventory.credits().items().await.len());
        }
        Some(("lookup", args)) => {
            let code = args.value_of("code").unwrap_or_default();
            match inventory.lookup_by_code(code) {
                Some(entry) => println!(
                    "{}  {}  {}  {:.2}",
                    entry.upc, entry.nombre, entry.item_number, entry.costo
                ),
                None => println!("{}: not found", code),
            }
        }
        Some(("search", args)) => {
            let term = args.value_of("term").unwrap_or_default();
            for product in inventory.products().search(term).await {
                println!("{}  {}  {}", product.upc, product.item_number, product.nombre);
            }
        }
        Some(("overdue", _)) => {
            let today = chrono::Local::now().date_naive();
            for credit in inventory.credits().overdue(today).await {
                println!(
                    "{}  {}  {} day(s)",
                    credit.id,
                    credit.provider,
                    credit.days_elapsed(today).unwrap_or_default()
                );
            }
        }
        _ => {}
    }

    inventory.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    pretty_env_logger::init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
