//! # appautomate
//!
//! Command-line tool for driving BrowserStack App Automate from CI pipelines.
//!
//! ## Overview
//!
//! Each subcommand performs one BrowserStack call and hands its result to the
//! next pipeline step through a lane context file:
//!
//! | Command | Description | Context key |
//! |---------|-------------|-------------|
//! | `upload-app` | Upload an `.ipa`, `.apk` or `.aab` | `BROWSERSTACK_APP_ID` |
//! | `upload-test-suite` | Upload a zipped XCUITest runner | `BROWSERSTACK_TEST_SUITE_ID` |
//! | `run-xcuitest` | Launch an XCUITest build | `BROWSERSTACK_XCUITEST_BUILD_ID` |
//! | `status` | Read a build's status | `BROWSERSTACK_XCTEST_STATUS` |
//! | `sessions` | List a build's session ids | `BROWSERSTACK_XCTEST_SESSIONS_LIST` |
//! | `download-result-bundles` | Fetch `.xcresult` bundles | `BROWSERSTACK_XCRESULT_PATHS_LIST` |
//! | `init-config` | Write a starter `appautomate.toml` | |
//!
//! ## Quick Start
//!
//! ```bash
//! export BROWSERSTACK_USERNAME="your_username"
//! export BROWSERSTACK_ACCESS_KEY="your_access_key"
//!
//! appautomate --context-file lane.env upload-app --file-path build/App.ipa
//! appautomate --context-file lane.env upload-test-suite --file-path build/Runner.zip
//! appautomate --context-file lane.env run-xcuitest --device "iPhone 14-16" --enable-result-bundle
//! appautomate --context-file lane.env status
//! appautomate --context-file lane.env sessions
//! appautomate --context-file lane.env download-result-bundles --dir-path results
//! ```
//!
//! Every command prints the updated context as `KEY='value'` lines on stdout.
//!
//! ## Modules
//!
//! - [`browserstack`] - REST client and the shared request executor
//! - [`actions`] - one function per pipeline action
//! - [`context`] - lane context persisted between steps
//! - [`config`] - `appautomate.toml` support

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use actions::{Platform, RunArgs};
use browserstack::BrowserStackClient;
use config::AppAutomateConfig;
use context::{LaneContext, split_list};

pub mod actions;
pub mod artifact;
pub mod browserstack;
pub mod config;
pub mod context;
pub mod error;
pub mod result_bundle;
pub mod transport;

pub use error::{AutomateError, GENERIC_FAILURE_REASON};

/// Drives BrowserStack App Automate uploads, XCUITest runs and result downloads.
#[derive(Parser, Debug)]
#[command(name = "appautomate", author, version, about = "BrowserStack App Automate for CI pipelines", long_about = None)]
struct Cli {
    /// Enable debug logging on stderr (RUST_LOG overrides).
    #[arg(long, short, global = true)]
    verbose: bool,
    /// Config file (default: discover appautomate.toml upward from cwd).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Dotenv file carrying results between pipeline steps.
    #[arg(long, global = true)]
    context_file: Option<PathBuf>,
    /// BrowserStack username (default: config, then BROWSERSTACK_USERNAME).
    #[arg(long, global = true)]
    username: Option<String>,
    /// BrowserStack access key (default: config, then BROWSERSTACK_ACCESS_KEY).
    #[arg(long, global = true)]
    access_key: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a starter config file.
    InitConfig {
        #[arg(long, default_value = config::CONFIG_FILE_NAME)]
        output: PathBuf,
    },
    #[command(flatten)]
    Action(ActionCommand),
}

/// Commands that talk to BrowserStack.
#[derive(Subcommand, Debug)]
enum ActionCommand {
    /// Upload an app (.ipa, .apk, .aab) to BrowserStack App Automate.
    UploadApp {
        #[arg(long, help = "Path to the app file (default: IPA_OUTPUT_PATH / GRADLE_APK_OUTPUT_PATH)")]
        file_path: Option<PathBuf>,
        #[arg(long)]
        custom_id: Option<String>,
        #[arg(long, value_enum)]
        platform: Option<Platform>,
    },
    /// Upload a zipped XCUITest runner.
    UploadTestSuite {
        #[arg(long)]
        file_path: PathBuf,
        #[arg(long)]
        custom_id: Option<String>,
    },
    /// Launch an XCUITest build.
    RunXcuitest {
        #[arg(long, help = "App url (default: BROWSERSTACK_APP_ID)")]
        app_url: Option<String>,
        #[arg(long, help = "Test suite url (default: BROWSERSTACK_TEST_SUITE_ID)")]
        test_suite_url: Option<String>,
        #[arg(long = "device", required = true, help = "Device, e.g. \"iPhone 14-16\"; repeatable")]
        devices: Vec<String>,
        #[arg(long, help = "Test to run, e.g. TestClass/testMethod; repeatable")]
        only_testing: Vec<String>,
        #[arg(long, help = "Test to skip; repeatable")]
        skip_testing: Vec<String>,
        #[arg(long)]
        enable_result_bundle: bool,
    },
    /// Check the status of an XCUITest build.
    Status {
        #[arg(long, help = "Build id (default: BROWSERSTACK_XCUITEST_BUILD_ID)")]
        build_id: Option<String>,
    },
    /// List the session ids of an XCUITest build.
    Sessions {
        #[arg(long, help = "Build id (default: BROWSERSTACK_XCUITEST_BUILD_ID)")]
        build_id: Option<String>,
    },
    /// Download and extract the result bundle of each session.
    DownloadResultBundles {
        #[arg(long, help = "Build id (default: BROWSERSTACK_XCUITEST_BUILD_ID)")]
        build_id: Option<String>,
        #[arg(long, help = "Comma-separated session ids (default: BROWSERSTACK_XCTEST_SESSIONS_LIST)")]
        sessions: Option<String>,
        #[arg(long)]
        dir_path: PathBuf,
    },
}

pub fn run() -> Result<()> {
    load_dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let command = match cli.command {
        Command::InitConfig { output } => return write_config_template(&output),
        Command::Action(command) => command,
    };

    let config = match &cli.config {
        Some(path) => AppAutomateConfig::load_from_file(path)?,
        None => match AppAutomateConfig::discover()? {
            Some((config, path)) => {
                tracing::debug!(path = %path.display(), "loaded config");
                config
            }
            None => AppAutomateConfig::default(),
        },
    };

    let auth = config.resolve_auth(cli.username.as_deref(), cli.access_key.as_deref())?;
    let mut client = BrowserStackClient::new(auth)?;
    if let Some(base_url) = &config.browserstack.base_url {
        client = client.with_base_url(config::expand_env_var(base_url)?);
    }

    let context_file = cli.context_file.clone().or(config.context.file.clone());
    let mut context = match &context_file {
        Some(path) => LaneContext::load(path)?,
        None => LaneContext::new(),
    };

    match command {
        ActionCommand::UploadApp {
            file_path,
            custom_id,
            platform,
        } => {
            actions::upload_app(&client, &mut context, file_path, custom_id.as_deref(), platform)?;
        }
        ActionCommand::UploadTestSuite {
            file_path,
            custom_id,
        } => {
            actions::upload_test_suite(&client, &mut context, &file_path, custom_id.as_deref())?;
        }
        ActionCommand::RunXcuitest {
            app_url,
            test_suite_url,
            devices,
            only_testing,
            skip_testing,
            enable_result_bundle,
        } => {
            let args = RunArgs {
                app_url,
                test_suite_url,
                devices,
                only_testing,
                skip_testing,
                enable_result_bundle,
            };
            actions::run_xcuitest(&client, &mut context, args)?;
        }
        ActionCommand::Status { build_id } => {
            actions::check_status(&client, &mut context, build_id)?;
        }
        ActionCommand::Sessions { build_id } => {
            actions::list_sessions(&client, &mut context, build_id)?;
        }
        ActionCommand::DownloadResultBundles {
            build_id,
            sessions,
            dir_path,
        } => {
            let sessions = sessions.as_deref().map(split_list);
            let bundles = actions::download_result_bundles(
                &client,
                &mut context,
                build_id,
                sessions,
                &dir_path,
            )?;
            println!("Downloaded {} result bundle(s) to {:?}", bundles.len(), dir_path);
        }
    }

    if let Some(path) = &context_file {
        context.save(path)?;
        tracing::debug!(path = %path.display(), "saved lane context");
    }
    print!("{}", context.render());
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "appautomate=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn write_config_template(path: &Path) -> Result<()> {
    if path.exists() {
        anyhow::bail!("refusing to overwrite existing config at {:?}", path);
    }
    fs::write(path, AppAutomateConfig::generate_starter_toml())
        .with_context(|| format!("writing config template to {:?}", path))?;
    println!("Wrote starter config to {:?}", path);
    Ok(())
}

fn load_dotenv() {
    if let Some(root) = std::env::current_dir().ok().and_then(|cwd| find_repo_root(&cwd)) {
        let _ = dotenvy::from_path(root.join(".env.local"));
    }
}

fn find_repo_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(".git").exists())
        .map(Path::to_path_buf)
}
