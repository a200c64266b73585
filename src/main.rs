//! Command-line entry point for the warehouse loader.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use songplay_dwh::config::Config;
use songplay_dwh::db::{CATALOG, Warehouse};
use songplay_dwh::pipeline::{LoadReport, Pipeline, PipelineError, Stage};

/// Build the song play star schema from staged event logs and song metadata.
#[derive(Parser)]
#[command(name = "songplay-dwh")]
#[command(about = "Star-schema warehouse loader for song play analytics")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "dwh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drop and recreate every staging and warehouse table
    CreateTables,

    /// Reset the schema, copy the sources into staging and build the star schema
    Etl,

    /// Print the table definitions without connecting
    ShowDdl,
}

fn create_tables(config: &Config) -> Result<(), PipelineError> {
    let pipeline = Pipeline::new(config)?;
    let mut warehouse = Warehouse::connect(&config.warehouse.database_url)?;
    pipeline.create_tables(&mut warehouse)
}

fn run_etl(config: &Config) -> Result<LoadReport, PipelineError> {
    let pipeline = Pipeline::new(config)?;
    let mut warehouse = Warehouse::connect(&config.warehouse.database_url)?;
    pipeline.run(&mut warehouse)
}

fn print_report(report: &LoadReport) {
    println!("\nLoad complete:");
    for copy in &report.copies {
        println!(
            "  {:<16} {} rows from {} objects ({} rejected)",
            copy.table,
            copy.rows_loaded,
            copy.objects,
            copy.rejected.len()
        );
    }
    for stage in Stage::ALL {
        println!("  {:<16} {} rows", stage.to_string(), report.rows_for(stage));
    }
    println!("  Unmatched plays:  {}", report.unmatched);
    println!("  Ambiguous plays:  {}", report.ambiguous);
}

fn main() {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "songplay_dwh=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Commands::ShowDdl = cli.command {
        for table in CATALOG {
            println!("{}", table.describe());
        }
        return;
    }

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    match cli.command {
        Commands::CreateTables => match create_tables(&config) {
            Ok(()) => println!("Created {} tables", CATALOG.len()),
            Err(e) => {
                eprintln!("Failed to create tables: {}", e);
                std::process::exit(1);
            }
        },
        Commands::Etl => match run_etl(&config) {
            Ok(report) => print_report(&report),
            Err(e) => {
                eprintln!("Load failed: {}", e);
                std::process::exit(1);
            }
        },
        Commands::ShowDdl => {}
    }
}
