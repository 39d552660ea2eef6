//! Configuration loading from disk.
//!
//! After parsing, every scalar present in the file can be overridden from the
//! environment: `server.port` is read from `GATEWAY_SERVER_PORT`. Arrays,
//! and therefore services, are not overridable.

use std::fs;
use std::path::Path;

use thiserror::Error;
use toml::{Table, Value};

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Prefix of every overriding environment variable.
pub const ENV_PREFIX: &str = "GATEWAY";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value in {var}: {reason}")]
    Env { var: String, reason: String },

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file, applying overrides from
/// the process environment.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    load_config_from_str(&content, std::env::vars())
}

/// Same as [`load_config`] with explicit content and environment.
pub fn load_config_from_str<I>(content: &str, env: I) -> Result<GatewayConfig, ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut table: Table = toml::from_str(content)?;

    let env: Vec<(String, String)> = env
        .into_iter()
        .filter(|(name, _)| name.starts_with(ENV_PREFIX))
        .collect();
    apply_env_overrides(&mut table, ENV_PREFIX, &env)?;

    let config: GatewayConfig = Value::Table(table).try_into()?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

fn apply_env_overrides(
    table: &mut Table,
    prefix: &str,
    env: &[(String, String)],
) -> Result<(), ConfigError> {
    for (key, value) in table.iter_mut() {
        let var = format!("{prefix}_{}", key.to_uppercase().replace(['.', '-'], "_"));

        if let Value::Table(nested) = value {
            apply_env_overrides(nested, &var, env)?;
            continue;
        }

        let Some((_, raw)) = env.iter().find(|(name, _)| *name == var) else {
            continue;
        };

        let parsed = match value {
            Value::String(_) => Value::String(raw.clone()),
            Value::Integer(_) => raw.trim().parse().map(Value::Integer).map_err(|e| {
                ConfigError::Env {
                    var: var.clone(),
                    reason: format!("expected an integer: {e}"),
                }
            })?,
            Value::Float(_) => raw.trim().parse().map(Value::Float).map_err(|e| {
                ConfigError::Env {
                    var: var.clone(),
                    reason: format!("expected a float: {e}"),
                }
            })?,
            Value::Boolean(_) => raw.trim().parse().map(Value::Boolean).map_err(|e| {
                ConfigError::Env {
                    var: var.clone(),
                    reason: format!("expected true or false: {e}"),
                }
            })?,
            _ => continue,
        };

        tracing::debug!(%var, "Configuration value overridden from environment");
        *value = parsed;
    }
    Ok(())
}
