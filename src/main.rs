mod cli;

use castforge::{
    config,
    runtime::Runtime,
    server::{self, AppContext},
};

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    ingest_port: Option<u16>,
    config_path: Option<&std::path::Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    // CLI flags win over the config file
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(ingest_port) = ingest_port {
        config.ingest.port = ingest_port;
    }
    config::validate_config(&config)?;

    tracing::info!("Starting castforge");

    let mut runtime = Runtime::launch(config).await?;
    let ingest_addr = runtime.serve_ingest().await?;
    tracing::info!("Accepting broadcasts on {}", ingest_addr);

    let server_result =
        server::start_server(AppContext::from_runtime(&runtime), runtime.shutdown_token()).await;

    tracing::info!("Shutting down...");
    runtime.shutdown().await;

    server_result
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "castforge=trace,castforge_media=trace,castforge_common=debug,tower_http=debug".to_string()
        } else {
            "castforge=debug,castforge_media=debug,castforge::ffmpeg=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start {
            host,
            port,
            ingest_port,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, ingest_port, cli.config.as_deref()))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("castforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn check_tools(config_path: Option<&std::path::Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = config::load_config_or_default(config_path)?;
    let ffmpeg = match &config.transcoder.ffmpeg_path {
        Some(path) => Ok(path.clone()),
        None => which::which("ffmpeg"),
    };

    match ffmpeg {
        Ok(path) => {
            let version = std::process::Command::new(&path)
                .arg("-version")
                .output()
                .ok()
                .filter(|out| out.status.success())
                .map(|out| String::from_utf8_lossy(&out.stdout).to_string());

            match version {
                Some(version) => {
                    println!(
                        "✓ ffmpeg ({}) - {}",
                        version.lines().next().unwrap_or(""),
                        path.display()
                    );
                    println!("\nAll required tools are available!");
                }
                None => {
                    println!("✗ ffmpeg - {} did not run", path.display());
                    println!("\nSome tools are missing. Install them to enable all features.");
                }
            }
        }
        Err(_) => {
            println!("✗ ffmpeg");
            println!("\nSome tools are missing. Install them to enable all features.");
        }
    }

    Ok(())
}

fn validate_config(path: Option<&std::path::Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!("  Ingest: {}:{}", config.ingest.host, config.ingest.port);
            println!("  HLS directory: {:?}", config.paths.hls_dir);
            println!("  Variants: {}", config.transcoder.variants.len());
            println!(
                "  Storage: {}",
                if config.storage.provider.is_remote() {
                    "remote object store"
                } else {
                    "local"
                }
            );
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!("  Ingest: {}:{}", config.ingest.host, config.ingest.port);
        }
    }

    Ok(())
}
