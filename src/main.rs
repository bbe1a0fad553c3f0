//! Mock resolver - CLI Entry Point

use anyhow::Result;
use clap::Parser;
use mock_resolver::{
    import, HttpForwarder, InMemoryRepository, MockConfig, MockEngine, MockServer, TokioClock,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "mock-resolver",
    about = "REST/SOAP mock server - response strategies, sequencing, latency simulation and forwarding",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "mock-resolver.yaml")]
    config: PathBuf,

    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    /// Synthesize an application from an API definition, print it as YAML and exit
    #[arg(long, value_name = "DEFINITION", requires = "project")]
    import: Option<PathBuf>,

    /// Project id the imported application belongs to
    #[arg(long)]
    project: Option<String>,

    /// Generate mock responses for every documented status code on import
    #[arg(long, requires = "import")]
    generate_responses: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so --import and --print-config output stays clean
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.print_config {
        let default_config = include_str!("../config/default-config.yaml");
        println!("{}", default_config);
        return Ok(());
    }

    if let Some(definition_path) = &args.import {
        let project_id = args.project.as_deref().unwrap_or_default();
        info!(path = ?definition_path, project_id, "Importing API definition");
        let definition = import::load_definition(definition_path)?;
        let application = import::synthesize(&definition, project_id, args.generate_responses)?;
        print!("{}", serde_yaml::to_string(&application)?);
        return Ok(());
    }

    let config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        MockConfig::from_file(&args.config)?
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!("Using default configuration (no projects)");
        MockConfig::default()
    };

    if args.validate {
        config.validate()?;
        println!(
            "Configuration is valid ({} projects, {} operations defined)",
            config.projects.len(),
            config.operation_count()
        );
        return Ok(());
    }

    let forwarder = HttpForwarder::new(
        Duration::from_millis(config.settings.forward_timeout_ms),
        Duration::from_millis(config.settings.connect_timeout_ms),
    );
    let engine = MockEngine::new(
        Arc::new(InMemoryRepository::new(config.projects)),
        Arc::new(forwarder),
        Arc::new(TokioClock),
        config.settings,
    );

    MockServer::new(Arc::new(engine)).run(args.listen).await
}
