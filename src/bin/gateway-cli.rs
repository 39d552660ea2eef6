use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use api_gateway::config::{load_config, ConfigError};
use api_gateway::service::{route_path, Service};

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Offline checks for an API gateway configuration", long_about = None)]
struct Cli {
    #[arg(short, long, env = "GATEWAY_CONFIG", default_value = "/config/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate the configuration
    Validate,
    /// Print every endpoint with its resolved policy
    Routes,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(ConfigError::Validation(errors)) => {
            for error in errors {
                eprintln!("{error}");
            }
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Validate => println!("ok"),
        Commands::Routes => {
            let provider = config.middlewares.auth.as_ref();
            for service_config in &config.services {
                // Discovery is skipped: routes are resolved from config alone.
                let service = Service::with_guard(service_config, provider, None);
                println!("{} -> {}", service.name(), service_config.base_url);

                for endpoint in service.endpoints() {
                    let route = route_path(service.path_prefix(), &endpoint.path);
                    println!("  {:<7} {route}", endpoint.method);

                    match &endpoint.auth {
                        Some(auth) if auth.enabled => println!(
                            "    auth: roles={:?} permissions={:?}",
                            auth.authorized_roles, auth.required_permissions
                        ),
                        _ => println!("    auth: off"),
                    }
                    if let Some(limit) = endpoint.max_body_size {
                        println!("    max_body_size: {limit}");
                    }
                    if let Some(limit) = endpoint.max_header_size {
                        println!("    max_header_size: {limit}");
                    }
                    match &endpoint.rate_limit {
                        Some(rate_limit) if rate_limit.enabled => println!(
                            "    rate_limit: {} per {} by {}",
                            rate_limit.max_count,
                            humantime::format_duration(rate_limit.window),
                            String::from(rate_limit.limit_by)
                        ),
                        _ => println!("    rate_limit: off"),
                    }
                }
            }
        }
    }

    ExitCode::SUCCESS
}
