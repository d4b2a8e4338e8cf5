//! Configuration file support for appautomate.
//!
//! Settings live in an optional `appautomate.toml`, searched for in the current
//! directory and then each parent up to the repository root (a directory
//! containing `.git`) or the filesystem root.
//!
//! ## Example Configuration
//!
//! ```toml
//! [browserstack]
//! username = "${BROWSERSTACK_USERNAME}"
//! access_key = "${BROWSERSTACK_ACCESS_KEY}"
//!
//! [context]
//! file = "target/appautomate/lane.env"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::AutomateError;
use crate::transport::BrowserStackAuth;

/// The default configuration file name.
pub const CONFIG_FILE_NAME: &str = "appautomate.toml";

/// Root configuration structure for `appautomate.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppAutomateConfig {
    /// BrowserStack account and endpoint.
    pub browserstack: BrowserStackConfig,

    /// Where the lane context is persisted between steps.
    pub context: ContextConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserStackConfig {
    /// Account username; `${VAR}` is expanded from the environment.
    pub username: Option<String>,

    /// Account access key; `${VAR}` is expanded from the environment.
    pub access_key: Option<String>,

    /// API root. Defaults to `https://api-cloud.browserstack.com`.
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Dotenv file the lane context is loaded from and saved to.
    pub file: Option<PathBuf>,
}

impl AppAutomateConfig {
    /// Loads configuration from the specified file path.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: AppAutomateConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    /// Finds and loads `appautomate.toml` from the current directory upward.
    pub fn discover() -> Result<Option<(Self, PathBuf)>> {
        let cwd = env::current_dir().context("Failed to get current directory")?;
        Self::discover_from(&cwd)
    }

    /// Finds and loads `appautomate.toml` starting from `start_dir`.
    ///
    /// Returns `Ok(None)` when no file exists up to the repository or
    /// filesystem root, and `Err` when a file exists but cannot be parsed.
    pub fn discover_from(start_dir: &Path) -> Result<Option<(Self, PathBuf)>> {
        for dir in start_dir.ancestors() {
            let candidate = dir.join(CONFIG_FILE_NAME);
            if candidate.is_file() {
                return Self::load_from_file(&candidate).map(|config| Some((config, candidate)));
            }
            if dir.join(".git").exists() {
                break;
            }
        }
        Ok(None)
    }

    /// Resolves credentials: explicit flag, then config file, then
    /// `BROWSERSTACK_USERNAME` / `BROWSERSTACK_ACCESS_KEY`.
    pub fn resolve_auth(
        &self,
        username: Option<&str>,
        access_key: Option<&str>,
    ) -> Result<BrowserStackAuth> {
        let username = resolve_credential(
            username,
            self.browserstack.username.as_deref(),
            "BROWSERSTACK_USERNAME",
        )?
        .ok_or_else(|| AutomateError::validation("No browserstack_username given."))?;
        let access_key = resolve_credential(
            access_key,
            self.browserstack.access_key.as_deref(),
            "BROWSERSTACK_ACCESS_KEY",
        )?
        .ok_or_else(|| AutomateError::validation("No browserstack_access_key given."))?;

        Ok(BrowserStackAuth {
            username,
            access_key,
        })
    }

    /// Generates a starter configuration file as a formatted TOML string.
    pub fn generate_starter_toml() -> String {
        r#"# appautomate configuration file
# CLI flags override these settings when provided.

[browserstack]
# Account credentials. ${VAR} references are read from the environment;
# BROWSERSTACK_USERNAME / BROWSERSTACK_ACCESS_KEY are used when unset.
username = "${BROWSERSTACK_USERNAME}"
access_key = "${BROWSERSTACK_ACCESS_KEY}"

# API root (default: https://api-cloud.browserstack.com)
# base_url = "https://api-cloud.browserstack.com"

[context]
# Dotenv file that carries results (app id, build id, sessions) between steps
# file = "target/appautomate/lane.env"
"#
        .to_string()
    }
}

fn resolve_credential(
    flag: Option<&str>,
    configured: Option<&str>,
    env_name: &str,
) -> Result<Option<String>> {
    if let Some(value) = flag.filter(|v| !v.is_empty()) {
        return Ok(Some(value.to_string()));
    }
    if let Some(raw) = configured {
        let value = expand_env_var(raw)?;
        if !value.is_empty() {
            return Ok(Some(value));
        }
    }
    Ok(env::var(env_name).ok().filter(|v| !v.is_empty()))
}

/// Expands a whole-value `${VAR}` reference; other values pass through.
pub fn expand_env_var(raw: &str) -> Result<String> {
    match raw.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
        Some(name) => env::var(name)
            .with_context(|| format!("{CONFIG_FILE_NAME} references unset variable ${{{name}}}")),
        None => Ok(raw.to_string()),
    }
}
