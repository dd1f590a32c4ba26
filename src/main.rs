/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! webnode CLI - run an embedded browser node from a config file
//!
//! Usage:
//!   webnode <app.toml>              Run the app from config file
//!   webnode --url about:blank       Run with the default config
//!   webnode --help                  Show help

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use webnode::engine::process::run_helper;
use webnode::{logging, WebnodeApp, WebnodeConfig};

#[derive(Parser)]
#[command(name = "webnode")]
#[command(author = "The Servo Project Developers")]
#[command(version)]
#[command(about = "Embedded browser node with a page-to-host call bridge")]
struct Cli {
    /// Path to app.toml configuration file
    #[arg(value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// URL or local file to load instead of the configured one
    #[arg(long, value_name = "URL")]
    url: Option<String>,

    /// Stop after this many frames
    #[arg(long, value_name = "N")]
    frames: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new webnode app in the current directory
    Init {
        /// Application name
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Validate a configuration file
    Check {
        /// Path to configuration file
        config: PathBuf,
    },
    /// Run as a renderer helper process
    #[command(hide = true)]
    Helper {
        /// Simulated page load time in milliseconds
        #[arg(long, default_value_t = 0)]
        load_delay_ms: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle subcommands
    if let Some(command) = cli.command {
        return match command {
            Commands::Init { name } => init_app(name),
            Commands::Check { config } => check_config(&config),
            Commands::Helper { load_delay_ms } => run_helper_process(load_delay_ms),
        };
    }

    // Determine config source
    let config = if let Some(config_path) = cli.config {
        WebnodeConfig::load(&config_path)
            .with_context(|| format!("Failed to load config: {}", config_path.display()))?
    } else {
        // Try to find app.toml in current directory
        let default_path = PathBuf::from("app.toml");
        if default_path.exists() {
            WebnodeConfig::load(&default_path).with_context(|| "Failed to load app.toml")?
        } else {
            WebnodeConfig::default()
        }
    };

    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    logging::init(level, &config.logging.categories).context("Failed to set up logging")?;

    if cli.url.is_none() && config.node.url.is_none() {
        eprintln!("Usage: webnode <app.toml>");
        eprintln!("       webnode --url <URL>");
        eprintln!("       webnode --help");
        std::process::exit(1);
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Error setting Ctrl-C handler")?;

    let mut app = WebnodeApp::new(config);
    info!("Starting webnode app: {}", app.name());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("Failed to start runtime")?;
    let frames = runtime
        .block_on(app.run(cli.url.as_deref(), cli.frames, running))
        .with_context(|| "App failed")?;

    info!("Shutting down after {} frames", frames);
    Ok(())
}

fn run_helper_process(load_delay_ms: u64) -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp_millis()
        .init();

    let input = BufReader::new(std::io::stdin());
    let output = std::io::stdout().lock();
    let code = run_helper(input, output, Duration::from_millis(load_delay_ms))
        .context("Renderer helper failed")?;
    std::process::exit(code);
}

fn init_app(name: Option<String>) -> Result<()> {
    let app_name = name.unwrap_or_else(|| {
        std::env::current_dir()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
            .unwrap_or_else(|| "my-app".to_string())
    });

    let config = format!(
        r#"# webnode App Configuration

[app]
name = "{name}"
resolution = "1024x600"

[plugin]
# "headless" runs renderers in threads, "process" in helper processes
backend = "headless"
# helper = "/path/to/engine"  # Defaults to the webnode binary
load_delay_ms = 0

[node]
id = "cef"
url = "testpage.html"
mouse_input = true
keyboard_input = true
scrollbars = true
volume = 1.0

[logging]
level = "info"
categories = "APP:DBG CONFIG:DBG EVENTS:DBG PLUGIN:DBG BRIDGE:WARNING"
"#,
        name = app_name
    );

    let config_path = PathBuf::from("app.toml");
    if config_path.exists() {
        anyhow::bail!("app.toml already exists in current directory");
    }

    std::fs::write(&config_path, config)?;
    println!("Created app.toml for '{}'", app_name);
    println!();
    println!("Next steps:");
    println!("  1. Create testpage.html next to app.toml");
    println!("  2. Call bridge.send('load', 'ready') from the page");
    println!("  3. Run: webnode app.toml");

    Ok(())
}

fn check_config(config_path: &Path) -> Result<()> {
    let config = WebnodeConfig::load(config_path)
        .with_context(|| format!("Failed to load: {}", config_path.display()))?;
    let (width, height) = config.app.resolution()?;

    println!("Configuration valid!");
    println!();
    println!("App:     {}", config.app.name);
    println!("Window:  {}x{}", width, height);
    println!("Plugin:  {} ({:?} backend)", config.plugin.name, config.plugin.backend);
    println!("Node:    {}", config.node.id);
    println!("URL:     {}", config.node.url.as_deref().unwrap_or("(none)"));

    Ok(())
}
