#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]

use std::{
    fs::{self, File},
    path::{Path, PathBuf},
};

use clap::Parser;
use eyre::WrapErr;
use tracing_subscriber::{
    Layer, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt,
};
use vkboot::{app::Application, config::BootConfig, driver::AshLoader};

/// Console verbosity. The log file always records everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Off => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Bootstrap a Vulkan instance and device, then tear them down again.
#[derive(clap::Parser, Debug)]
struct CliArgs {
    #[arg(short = 'l', long = "tracing-log-level", default_value = "info")]
    log_level: LogLevel,
    /// TOML file overriding the built-in layer and extension lists.
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(long)]
    app_name: Option<String>,
    /// Request this layer instead of the configured list. Repeatable.
    #[arg(long = "layer")]
    layers: Vec<String>,
    /// Pass requested layers to the driver without checking them first.
    #[arg(long)]
    no_validation: bool,
    /// Do not register the debug report callback.
    #[arg(long)]
    no_diagnostics: bool,
}

impl CliArgs {
    fn boot_config(&self) -> eyre::Result<BootConfig> {
        let mut config = match &self.config {
            Some(path) => BootConfig::load(path)?,
            None => BootConfig::default(),
        };
        if let Some(app_name) = &self.app_name {
            config.app_name = app_name.clone();
        }
        if !self.layers.is_empty() {
            config.layers = self.layers.clone();
        }
        config.validate_layers &= !self.no_validation;
        config.diagnostics &= !self.no_diagnostics;
        Ok(config)
    }
}

fn log_dir() -> eyre::Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "vkboot", "boot-app");
    match dirs
        .as_ref()
        .map(|dirs| dirs.runtime_dir().unwrap_or(dirs.data_dir()))
    {
        Some(dir) => Ok(dir.to_owned()),
        None => Ok(std::env::current_dir()?),
    }
}

/// Console output at `level`, plus an unfiltered plain-text log in `dir`.
fn install_tracing(level: LogLevel, dir: &Path) -> eyre::Result<PathBuf> {
    fs::create_dir_all(dir)
        .wrap_err_with(|| format!("creating log dir {}", dir.display()))?;
    let log_file_path = dir.join("boot-app.log");
    let log_file = File::create(&log_file_path)?;

    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(LevelFilter::from(level));
    let file = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .init();
    Ok(log_file_path)
}

fn main() -> eyre::Result<()> {
    let cli_args = CliArgs::parse();

    let log_file_path = install_tracing(cli_args.log_level, &log_dir()?)?;
    tracing::info!("Logging to {}", log_file_path.display());

    let config = cli_args.boot_config()?;
    tracing::debug!("config: {config:#?}");

    //SAFETY: Every object created through the loader is owned by app, which
    //is dropped before the loader's library handle
    let loader = unsafe { AshLoader::load() }?;

    let mut app = Application::new(loader, config);
    app.initialize().wrap_err("Vulkan bootstrap failed")?;
    app.prepare()?;
    app.update();
    if !app.render() {
        tracing::info!("render requested exit");
    }
    app.deinitialize()?;

    tracing::info!("Shut down cleanly");
    Ok(())
}
