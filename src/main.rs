use anyhow::{Context, Result};
use rusqlite::Connection;
use std::env;
use std::path::PathBuf;

use ans_consolidator::{publish_run, setup_database, Pipeline, PipelineConfig};

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    let mut command = String::from("run");
    let mut config_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "run" | "fetch" => command = args[i].clone(),
            "--config" => {
                i += 1;
                let path = args.get(i).context("--config needs a file path")?;
                config_path = Some(PathBuf::from(path));
            }
            "-h" | "--help" => {
                print_usage();
                return Ok(());
            }
            other => {
                print_usage();
                return Err(anyhow::anyhow!("unknown argument: {}", other));
            }
        }
        i += 1;
    }

    let config = match config_path {
        Some(path) => PipelineConfig::load(&path)?,
        None => PipelineConfig::default(),
    };

    match command.as_str() {
        "fetch" => run_fetch(&config),
        _ => run_pipeline(&config),
    }
}

fn run_pipeline(config: &PipelineConfig) -> Result<()> {
    println!("🏥 ANS Consolidator - quarterly expense consolidation");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // 1. Registry + statements -> aggregates + artifacts
    println!("\n📂 Reading {} ...", config.data_dir.display());
    let output = Pipeline::new(config.clone()).run()?;

    println!("\n{}", output.report.summary());

    // 2. Artifacts are already on disk once run() returns
    println!("\n📦 Artifacts:");
    println!("✓ {}", output.receipt.consolidated_path.display());
    println!("✓ {}", output.receipt.aggregated_path.display());
    println!("✓ {}", output.receipt.manifest_path.display());

    // 3. Publish the run to SQLite for the API server
    println!("\n💾 Publishing to {} ...", config.db_path.display());
    let mut conn = Connection::open(&config.db_path)?;
    setup_database(&conn)?;
    publish_run(
        &mut conn,
        &output.receipt.manifest,
        &output.records,
        &output.aggregates,
    )?;
    println!(
        "✓ Run {} published ({} rows, {} aggregates)",
        output.report.run_id,
        output.records.len(),
        output.aggregates.len()
    );

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("🎉 Consolidation complete");

    Ok(())
}

#[cfg(feature = "fetch")]
fn run_fetch(config: &PipelineConfig) -> Result<()> {
    use ans_consolidator::Fetcher;

    println!("📥 ANS Consolidator - open-data download");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("\n🌐 {}", config.demonstracoes_url);

    let report = Fetcher::new(config)?.fetch_all()?;

    println!("\n✓ {}", report.summary());
    println!("✓ Registry: {}", report.registry.display());
    println!("\nNext: ans-consolidator run");

    Ok(())
}

#[cfg(not(feature = "fetch"))]
fn run_fetch(_config: &PipelineConfig) -> Result<()> {
    eprintln!("❌ Fetch support not compiled in!");
    eprintln!("   Rebuild with: cargo build --features fetch");
    std::process::exit(1);
}

fn print_usage() {
    println!("ANS Consolidator v{}", ans_consolidator::VERSION);
    println!();
    println!("Usage: ans-consolidator [COMMAND] [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  run              Consolidate the local data dir (default)");
    println!("  fetch            Download the newest quarters and the CADOP registry");
    println!();
    println!("Options:");
    println!("  --config <file>  JSON file overriding any configuration field");
    println!("  -h, --help       Show this help");
}
