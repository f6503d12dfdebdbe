//! ctxmesh - Multi-module context aggregation
//!
//! Main entry point for the ctxmesh CLI.

use ctxmesh::config::{validate_config, MeshConfig};
use ctxmesh::{
    select_by_priority, AggregationEngine, AggregationRequest, MergeStrategy, MeshError, ModuleId,
};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

/// ctxmesh - Fan a query out to business modules and merge the answers
#[derive(Parser, Debug)]
#[command(name = "ctxmesh")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: ~/.config/ctxmesh/config.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize ctxmesh configuration
    Init,

    /// List registered modules with their priorities and addresses
    Modules,

    /// Aggregate context for a query
    Query {
        /// Query text (parsed as JSON when --json is given)
        query: String,

        /// Treat the query as a JSON value
        #[arg(long)]
        json: bool,

        /// Modules to query (comma-separated, default: configured set)
        #[arg(short, long)]
        modules: Option<String>,

        /// Merge strategy (merge, priority, latest)
        #[arg(short, long, default_value = "merge")]
        strategy: String,

        /// Module to put first (or "auto")
        #[arg(short, long)]
        prefer: Option<String>,

        /// Cache TTL in seconds (default: configured TTL)
        #[arg(long)]
        ttl: Option<u64>,

        /// Skip the cache
        #[arg(long)]
        no_cache: bool,

        /// Print only the best single view instead of the full result
        #[arg(long)]
        select: bool,
    },

    /// Run the HTTP server
    Serve {
        /// Bind address (default: server.bind from config)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Manage configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Check the configuration for errors
    Validate,

    /// Print the effective configuration
    Show,
}

fn main() {
    // Initialize logging
    if let Err(e) = ctxmesh::logging::init() {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> ctxmesh::Result<()> {
    // Handle init command first (creates config)
    if let Commands::Init = cli.command {
        return handle_init_command(cli.config.as_deref());
    }

    let config = MeshConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        // Handled above
        Commands::Init => Ok(()),
        Commands::Modules => handle_modules_command(&config),
        Commands::Config(cmd) => handle_config_command(cmd, &config),
        Commands::Query {
            query,
            json,
            modules,
            strategy,
            prefer,
            ttl,
            no_cache,
            select,
        } => {
            let request = build_request(&query, json, modules, &strategy, prefer)?;
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(handle_query_command(
                &config, request, ttl, no_cache, select,
            ))
        }
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            let engine = AggregationEngine::from_config(&config)?;
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(ctxmesh::server::MeshServer::new(Arc::new(engine)).run(&bind))
        }
    }
}

fn handle_init_command(config_path: Option<&Path>) -> ctxmesh::Result<()> {
    let config_file = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(MeshConfig::default_path);

    // Check if already initialized
    if config_file.exists() {
        println!("Configuration already exists at {}", config_file.display());
        return Ok(());
    }

    MeshConfig::new().save(&config_file)?;

    println!("✓ Created configuration at {}", config_file.display());
    println!();
    println!("Next steps:");
    println!("  1. Point modules at their servers (modules: [{{id, url}}])");
    println!("  2. Try a query:");
    println!("     ctxmesh query \"cash position\" --strategy priority");
    println!("  3. Or serve the HTTP API:");
    println!("     ctxmesh serve");

    Ok(())
}

fn handle_modules_command(config: &MeshConfig) -> ctxmesh::Result<()> {
    let registry = config.registry();
    let defaults = &config.default_modules;

    println!("{:<15} {:>8}  {:<8} URL", "MODULE", "PRIORITY", "DEFAULT");
    for endpoint in registry.endpoints() {
        println!(
            "{:<15} {:>8}  {:<8} {}",
            endpoint.id.as_str(),
            endpoint.priority(),
            if defaults.contains(&endpoint.id) { "yes" } else { "no" },
            endpoint.url
        );
    }

    Ok(())
}

fn handle_config_command(cmd: ConfigCommands, config: &MeshConfig) -> ctxmesh::Result<()> {
    match cmd {
        ConfigCommands::Validate => match validate_config(config) {
            Ok(()) => {
                println!("✓ Configuration is valid");
                Ok(())
            }
            Err(errors) => {
                for error in &errors {
                    println!("✗ {}", error);
                }
                Err(MeshError::Config(format!(
                    "{} configuration error(s)",
                    errors.len()
                )))
            }
        },
        ConfigCommands::Show => {
            print!("{}", serde_yaml::to_string(config)?);
            Ok(())
        }
    }
}

fn build_request(
    query: &str,
    json: bool,
    modules: Option<String>,
    strategy: &str,
    prefer: Option<String>,
) -> ctxmesh::Result<AggregationRequest> {
    let query = if json {
        serde_json::from_str(query)?
    } else {
        Value::String(query.to_string())
    };

    let mut request = AggregationRequest::new(query).with_strategy(strategy.parse::<MergeStrategy>()?);

    if let Some(modules) = modules {
        request = request.with_module_names(
            modules
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty()),
        )?;
    }

    if let Some(prefer) = prefer.filter(|p| !p.eq_ignore_ascii_case("auto")) {
        request = request.with_priority_override(prefer.parse::<ModuleId>()?);
    }

    Ok(request)
}

async fn handle_query_command(
    config: &MeshConfig,
    request: AggregationRequest,
    ttl: Option<u64>,
    no_cache: bool,
    select: bool,
) -> ctxmesh::Result<()> {
    let engine = AggregationEngine::from_config(config)?;

    let result = if no_cache {
        engine.aggregate(&request).await?
    } else {
        let ttl = ttl.map(Duration::from_secs).unwrap_or(engine.default_ttl());
        engine.aggregate_cached(&request, ttl).await?
    };

    if result.responding_modules.is_empty() {
        eprintln!("Warning: no module answered");
    }

    let output = if select {
        serde_json::to_string_pretty(&select_by_priority(&result, request.priority_override))?
    } else {
        serde_json::to_string_pretty(&result)?
    };
    println!("{}", output);

    Ok(())
}
