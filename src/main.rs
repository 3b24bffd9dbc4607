use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use tracing::{error, info};

use halo_catalog::callbacks::{builtin_callbacks, create_callback, HaloCallback};
use halo_catalog::catalog::HaloCatalog;
use halo_catalog::config::Config;
use halo_catalog::constants::ROCKSTAR_METHOD;
use halo_catalog::dataset::Dataset;
use halo_catalog::domain::RecordedHaloList;
use halo_catalog::finding::{builtin_finding_methods, FinderOptions, FindingOutcome};
use halo_catalog::logging;
use halo_catalog::metrics;
use halo_catalog::storage::{InMemoryCatalogStore, JsonCatalogStore};

#[derive(Parser)]
#[command(name = "halo_catalog")]
#[command(about = "Run halo finders and normalize their output into halo catalogs")]
#[command(version = "0.1.0")]
struct Cli {
    /// Print Prometheus metrics for the run on exit
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the registered finding methods and callbacks
    Methods,
    /// Run a finding method against a dataset and save the catalog
    Find {
        /// Dataset descriptor (TOML)
        #[arg(long)]
        dataset: PathBuf,
        /// Finding method name, e.g. fof, hop, rockstar
        #[arg(long)]
        method: String,
        /// Finder option as key=value; repeatable
        #[arg(long = "option", value_name = "KEY=VALUE")]
        options: Vec<String>,
        /// Keep the catalog in memory instead of writing it
        #[arg(long)]
        dry_run: bool,
    },
    /// Apply callbacks to every halo of a recorded halo list
    Callbacks {
        #[arg(long)]
        dataset: PathBuf,
        /// Halo list (JSON) written by a finder run
        #[arg(long)]
        halos: PathBuf,
        /// Callback name; repeatable, run in the given order
        #[arg(long = "callback", required = true)]
        callbacks: Vec<String>,
        /// Callback option as key=value; passed to every callback
        #[arg(long = "option", value_name = "KEY=VALUE")]
        options: Vec<String>,
    },
}

/// `key=value`, with the value read as JSON when it parses and as a plain
/// string otherwise.
fn parse_options(raw: &[String]) -> anyhow::Result<FinderOptions> {
    let mut options = FinderOptions::new();
    for entry in raw {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("option '{}' is not in key=value form", entry))?;
        let value =
            serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        options.insert(key.trim().to_string(), value);
    }
    Ok(options)
}

fn list_methods(config: &Config) {
    let methods = builtin_finding_methods(&config.finder_backends());
    let callbacks = builtin_callbacks();

    println!("Finding methods:");
    for name in methods.names() {
        println!("   {}", name);
    }
    println!("Callbacks:");
    for name in callbacks.names() {
        println!("   {}", name);
    }
}

fn run_find(
    config: &Config,
    dataset: PathBuf,
    method: &str,
    mut options: FinderOptions,
    dry_run: bool,
) -> anyhow::Result<()> {
    let ds = Dataset::load(&dataset)
        .with_context(|| format!("loading dataset {}", dataset.display()))?;
    let methods = builtin_finding_methods(&config.finder_backends());

    if method == ROCKSTAR_METHOD && !options.contains_key("outbase") {
        options.insert(
            "outbase".to_string(),
            Value::String(config.rockstar.outbase.display().to_string()),
        );
    }

    let mut hc = if dry_run {
        HaloCatalog::new(ds, InMemoryCatalogStore::new())
    } else {
        HaloCatalog::new(ds, JsonCatalogStore::new(&config.catalog.output_dir))
    };

    let outcome = hc
        .find_halos(&methods, method, options)
        .with_context(|| format!("running finding method '{}'", method))?;

    match outcome {
        Some(FindingOutcome::Saved(saved)) => {
            println!("Saved {} halos to {}", saved.num_halos, saved.location);
            if let Some(digest) = saved.digest {
                println!("   digest: {}", digest);
            }
        }
        Some(FindingOutcome::Loaded(halos_ds)) => {
            println!(
                "Loaded {} halos from {}",
                halos_ds.header.num_halos,
                halos_ds.path.display()
            );
        }
        None => println!("No halo catalog produced by '{}'", method),
    }
    Ok(())
}

fn run_callbacks(
    dataset: PathBuf,
    halos: PathBuf,
    names: &[String],
    options: FinderOptions,
) -> anyhow::Result<()> {
    let ds = Dataset::load(&dataset)
        .with_context(|| format!("loading dataset {}", dataset.display()))?;
    let halo_list = RecordedHaloList::load(&halos)
        .with_context(|| format!("loading halo list {}", halos.display()))?;

    let registry = builtin_callbacks();
    let mut callbacks: Vec<Box<dyn HaloCallback>> = Vec::with_capacity(names.len());
    for name in names {
        callbacks.push(create_callback(&registry, name, Vec::new(), options.clone())?);
    }

    let hc = HaloCatalog::new(ds, InMemoryCatalogStore::new());
    let processed = hc.apply_callbacks(&halo_list, &mut callbacks)?;
    info!("Callbacks finished");
    println!("Applied {} callback(s) to {} halos", callbacks.len(), processed);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let _log_guard = logging::init_logging();

    let cli = Cli::parse();
    let metrics_handle = if cli.metrics {
        metrics::init_metrics()
    } else {
        None
    };

    let config = Config::load().context("loading configuration")?;

    let result = match cli.command {
        Commands::Methods => {
            list_methods(&config);
            Ok(())
        }
        Commands::Find {
            dataset,
            method,
            options,
            dry_run,
        } => parse_options(&options)
            .and_then(|options| run_find(&config, dataset, &method, options, dry_run)),
        Commands::Callbacks {
            dataset,
            halos,
            callbacks,
            options,
        } => parse_options(&options)
            .and_then(|options| run_callbacks(dataset, halos, &callbacks, options)),
    };

    if let Err(e) = &result {
        error!("Run failed: {:#}", e);
    }
    if let Some(handle) = metrics_handle {
        println!("{}", handle.render());
    }
    result
}
