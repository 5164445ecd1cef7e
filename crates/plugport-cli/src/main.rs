//! Command-line interface for the plugport extension runtime.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use plugport_core::areas::{areas_from_store, AreaReport, AreaResolver};
use plugport_core::config::{defaults, env_vars, read_capabilities, HostConfig};
use plugport_core::extension::{of_type, resolve_all, LoadedExtension, ResolvedExtension};
use plugport_core::loader::{
    integrity_of, parse_manifest, FileFetcher, HttpFetcher, LoadOutcome, RemotePluginLoader,
    SchemeFetcher,
};
use plugport_core::store::PluginStore;
use serde_json::{json, Value};

/// Load extension bundles and inspect what a host would activate.
#[derive(Parser, Debug)]
#[command(name = "plugport")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Host config file. Defaults to $PLUGPORT_CONFIG or ./plugport.toml.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Load configured plugins and print the active extensions.
    List {
        /// Only extensions of this type.
        #[arg(short = 't', long = "type")]
        type_name: Option<String>,

        /// Backend capabilities JSON file, overriding the config.
        #[arg(long)]
        capabilities: Option<PathBuf>,

        /// Resolve code references before printing.
        #[arg(long)]
        resolve: bool,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Print the status of every capability area.
    Areas {
        /// Backend capabilities JSON file, overriding the config.
        #[arg(long)]
        capabilities: Option<PathBuf>,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Validate a plugin manifest file.
    Check {
        /// Path to the manifest.
        #[arg(required = true)]
        manifest: PathBuf,

        /// Fail when any entry is dropped.
        #[arg(long)]
        strict: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::List {
            type_name,
            capabilities,
            resolve,
            json,
        } => {
            let host = Host::start(args.config.as_deref(), capabilities.as_deref()).await?;
            run_list(&host, type_name, resolve, json).await
        }
        Command::Areas { capabilities, json } => {
            let host = Host::start(args.config.as_deref(), capabilities.as_deref()).await?;
            run_areas(&host.report, json)
        }
        Command::Check { manifest, strict } => run_check(&manifest, strict),
    }
}

fn init_logging(verbose: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let filter = if verbose {
            defaults::VERBOSE_LOG_FILTER
        } else {
            defaults::LOG_FILTER
        };
        tracing_subscriber::EnvFilter::new(filter).add_directive(tracing::Level::WARN.into())
    });

    // stdout carries command output only
    if env_vars::log_json() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    }
}

/// A started host: plugins loaded, areas applied.
struct Host {
    store: PluginStore,
    report: AreaReport,
}

impl Host {
    async fn start(config_path: Option<&Path>, capabilities: Option<&Path>) -> Result<Self> {
        let mut config = load_config(config_path)?;
        config.apply_env_overrides();

        let store = PluginStore::new();
        store.set_feature_flags(&config.flags);

        let file = match config.bundles_root() {
            Some(root) => FileFetcher::with_root(root),
            None => FileFetcher::new(),
        };
        let http = HttpFetcher::new(config.fetch_timeout())?;
        let loader = RemotePluginLoader::with_shared_scope(
            store.clone(),
            Arc::new(SchemeFetcher::new(http, file)),
            config.shared.clone(),
        );

        for result in loader.load_plugins(config.plugin_entries()).await {
            if let LoadOutcome::Failed(failure) = &result.outcome {
                eprintln!("plugin {} failed to load: {failure}", result.plugin_id);
            }
        }

        let caps = match capabilities {
            Some(path) => read_capabilities(path)
                .with_context(|| format!("reading capabilities from {}", path.display()))?,
            None => config.load_capabilities()?,
        };

        let mut areas = config.areas.clone();
        areas.extend(areas_from_store(&store));
        let report = AreaResolver::new(areas, config.resolver_options()).apply(&caps, &store);

        Ok(Self { store, report })
    }
}

fn load_config(explicit: Option<&Path>) -> Result<HostConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let path = env_vars::config_path();
            if !path.exists() && std::env::var(env_vars::CONFIG).is_err() {
                tracing::debug!("No config file, using defaults");
                return Ok(HostConfig::default());
            }
            path
        }
    };
    HostConfig::load(&path).with_context(|| format!("loading config {}", path.display()))
}

async fn run_list(host: &Host, type_name: Option<String>, resolve: bool, json: bool) -> Result<()> {
    let extensions = match type_name {
        Some(tag) => host.store.get_extensions(of_type(tag)),
        None => host.store.active_extensions(),
    };

    let resolved = if resolve {
        let (resolved, errors) = resolve_all(&extensions).await;
        for error in &errors {
            eprintln!("resolution failed: {error}");
        }
        Some(resolved)
    } else {
        None
    };

    if json {
        let rows: Vec<Value> = match &resolved {
            Some(resolved) => resolved.iter().map(resolved_row).collect(),
            None => extensions.iter().map(extension_row).collect(),
        };
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    match &resolved {
        Some(resolved) => {
            for ext in resolved {
                println!("{}", text_row(ext.source()));
            }
        }
        None => {
            for ext in &extensions {
                println!("{}", text_row(ext));
            }
        }
    }
    Ok(())
}

fn text_row(ext: &LoadedExtension) -> String {
    let id = ext
        .value("id")
        .and_then(Value::as_str)
        .unwrap_or("-");
    format!("{}\t{}\t{}", ext.plugin_id(), ext.type_name(), id)
}

fn extension_row(ext: &LoadedExtension) -> Value {
    json!({
        "plugin": ext.plugin_id(),
        "extension": ext.to_json(),
    })
}

fn resolved_row(ext: &ResolvedExtension) -> Value {
    let code: serde_json::Map<String, Value> = ext
        .source()
        .code_refs()
        .filter_map(|(name, _)| {
            let value = ext.code(name)?.as_json().cloned().unwrap_or(Value::Null);
            Some((name.to_string(), value))
        })
        .collect();
    json!({
        "plugin": ext.plugin_id(),
        "extension": ext.source().to_json(),
        "code": code,
    })
}

fn run_areas(report: &AreaReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&report.statuses)?);
        return Ok(());
    }

    for (id, status) in &report.statuses {
        let state = if status.status { "available" } else { "unavailable" };
        let mut reasons = Vec::new();
        if status.in_cycle {
            reasons.push("dependency cycle".to_string());
        }
        let missing = |map: &std::collections::BTreeMap<String, bool>| {
            map.iter()
                .filter(|(_, ok)| !**ok)
                .map(|(name, _)| name.as_str())
                .collect::<Vec<_>>()
                .join(",")
        };
        let components = missing(&status.required_components);
        if !components.is_empty() {
            reasons.push(format!("missing components: {components}"));
        }
        let flags = missing(&status.feature_flags);
        if !flags.is_empty() {
            reasons.push(format!("flags off: {flags}"));
        }
        let reliant = missing(&status.reliant_areas);
        if !reliant.is_empty() {
            reasons.push(format!("unavailable areas: {reliant}"));
        }
        if status.forced_by_dev_flag {
            reasons.push("forced by dev flag".to_string());
        }

        if reasons.is_empty() {
            println!("{id}\t{state}");
        } else {
            println!("{id}\t{state}\t{}", reasons.join("; "));
        }
    }
    Ok(())
}

fn run_check(path: &Path, strict: bool) -> Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let parsed = parse_manifest(&bytes)?;

    let mut valid = 0;
    let mut dropped = parsed.rejected.len();
    for ext in &parsed.extensions {
        match ext.validate() {
            Ok(()) => {
                valid += 1;
                println!("ok\t{}", ext.type_name());
            }
            Err(e) => {
                dropped += 1;
                println!("drop\t{e}");
            }
        }
    }
    for (index, error) in &parsed.rejected {
        println!("drop\t#{index}: {error}");
    }

    if let Some(name) = &parsed.name {
        println!("name: {name}");
    }
    println!("integrity: {}", integrity_of(&bytes));
    println!("{valid} valid, {dropped} dropped");

    if strict && dropped > 0 {
        bail!("{dropped} manifest entries dropped");
    }
    Ok(())
}
