use anyhow::{Context, Result};
use catalog_merge::config::RunConfig;
use catalog_merge::io::{load_provider, write_tables, RunManifest};
use catalog_merge::pipeline::{merge, ProviderExtract};
use chrono::Local;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn, LevelFilter};
use rayon::prelude::*;
use simple_logger::SimpleLogger;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use time::macros::format_description;

#[derive(Parser, Clone)]
#[command(name = "Catalog Merge")]
#[command(about = "Merges per-provider stellar catalog extracts into one deduplicated, quality-ranked table set.")]
#[command(version = "1.0.0")]
struct Cli {
    #[arg(long, help = "Path to the run configuration YAML file", required = true)]
    run_config: PathBuf,
    #[arg(short, long, help = "Output directory for CSV files", required = true)]
    output: PathBuf,
    #[arg(short, long, default_value = "INFO", help = "Logging level (DEBUG, INFO, WARN, ERROR)")]
    log_level: String,
    #[arg(short, long, default_value = "0", help = "Number of threads used to load extracts (0 for auto)")]
    threads: usize,
    #[arg(long, help = "Write merge_manifest.json next to the output tables")]
    write_manifest: bool,
}

fn format_elapsed(elapsed: Duration) -> String {
    let total_secs = elapsed.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}.{:03}s", seconds, elapsed.subsec_millis())
    }
}

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_uppercase().as_str() {
        "DEBUG" => LevelFilter::Debug,
        "INFO" => LevelFilter::Info,
        "WARN" | "WARNING" => LevelFilter::Warn,
        "ERROR" => LevelFilter::Error,
        _ => {
            eprintln!("Invalid log level '{}', defaulting to INFO.", cli.log_level);
            LevelFilter::Info
        }
    };
    SimpleLogger::new()
        .with_level(log_level)
        .with_timestamp_format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
        .init()?;

    info!("Starting Catalog Merge");
    info!("Loading run configuration from: {}", cli.run_config.display());
    let run_config = RunConfig::load(&cli.run_config)?;
    if let Some(description) = &run_config.description {
        info!("Run: {}", description);
    }
    let priority = &run_config.priority;
    info!(
        "Priority list '{}' version {} ({}): {}",
        priority.name,
        priority.version,
        priority.digest(),
        priority.provider_names().collect::<Vec<_>>().join(" > ")
    );

    let num_threads = if cli.threads == 0 {
        let cores = num_cpus::get();
        info!("Auto-detected {} CPU cores. Using {} threads.", cores, cores);
        cores
    } else {
        info!("Using specified {} threads.", cli.threads);
        cli.threads
    };
    if let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(num_threads).build_global() {
        error!("Failed to build global thread pool: {}. Proceeding with default.", e);
    }

    let run_date = Local::now().format("%Y-%m-%d").to_string();
    let progress_bar = ProgressBar::new(priority.providers.len() as u64);
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );
    progress_bar.set_message("Loading provider extracts...");

    let extracts: Vec<ProviderExtract> = priority
        .providers
        .par_iter()
        .map(|provider| {
            let load_start = Instant::now();
            let extract = load_provider(provider, &run_date)
                .with_context(|| format!("Failed to load extracts of provider '{}'", provider.name));
            match &extract {
                Ok(loaded) => progress_bar.set_message(format!(
                    "OK: {} ({} rows, {})",
                    provider.name,
                    loaded.row_count(),
                    format_elapsed(load_start.elapsed())
                )),
                Err(_) => progress_bar.set_message(format!("ERR: {}", provider.name)),
            }
            progress_bar.inc(1);
            extract
        })
        .collect::<Result<Vec<_>>>()?;
    progress_bar.finish_with_message(format!("Loaded {} providers.", extracts.len()));

    info!("Merging {} providers in priority order...", extracts.len());
    let merged = match merge(&extracts, &run_config.null_values) {
        Ok(merged) => merged,
        Err(e) => {
            error!("Merge failed: {}", e);
            return Err(e.into());
        }
    };

    let row_counts = write_tables(&cli.output, &merged)?;
    if cli.write_manifest {
        let manifest_path = RunManifest::new(priority, row_counts.clone()).write(&cli.output)?;
        info!("Run manifest written to {}", manifest_path.display());
    }

    info!("-------------------- FINAL SUMMARY --------------------");
    info!("Total execution time: {}", format_elapsed(start_time.elapsed()));
    info!("Providers merged: {}", extracts.len());
    info!("Total rows written per table:");
    for (table_name, count) in &row_counts {
        if *count == 0 {
            warn!("  - {}.csv: {}", table_name, count);
        } else {
            info!("  - {}.csv: {}", table_name, count);
        }
    }
    info!("Merge finished.");
    info!("-------------------------------------------------------");

    Ok(())
}
