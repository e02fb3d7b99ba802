use crate::app::{App, SortMode};
use crate::config::ToolPreference;
use crate::scanner::{Scanner, VenvEntry};
use crate::tui::{self, Session};
use crate::utils::{format_size, resolve_root, shorten_path};
use crate::Config;
use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use prettytable::{format, Cell, Row, Table};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "venv-cleaner")]
#[command(version, about = "Find and remove Python virtual environments inside git repositories", long_about = None)]
pub struct Cli {
    /// Directory to scan (defaults to the current directory)
    pub path: Option<PathBuf>,

    /// Config file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Print the environments found as a table instead of opening the interactive view
    #[arg(long, conflicts_with = "json")]
    pub list: bool,

    /// Print the environments found as JSON
    #[arg(long)]
    pub json: bool,

    /// Initial sort order
    #[arg(long, value_enum)]
    pub sort: Option<SortArg>,

    /// Removal mechanism (defaults to `auto`)
    #[arg(long, value_enum)]
    pub tool: Option<ToolArg>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Write diagnostics to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Write a default config file and exit
    #[arg(long)]
    pub init_config: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum SortArg {
    Time,
    Size,
    Path,
}

impl SortArg {
    fn to_mode(self) -> SortMode {
        match self {
            Self::Time => SortMode::Time,
            Self::Size => SortMode::Size,
            Self::Path => SortMode::Path,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ToolArg {
    Auto,
    Rip,
    Rm,
    Native,
}

impl ToolArg {
    fn to_preference(self) -> ToolPreference {
        match self {
            Self::Auto => ToolPreference::Auto,
            Self::Rip => ToolPreference::Rip,
            Self::Rm => ToolPreference::Rm,
            Self::Native => ToolPreference::Native,
        }
    }
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let interactive = !self.list && !self.json;
        init_logging(self.verbose, self.log_file.as_deref(), interactive)?;

        if self.init_config {
            return init_config(self.config);
        }

        let config = if let Some(config_path) = &self.config {
            Config::load(config_path)?
        } else {
            Config::load_or_default(Config::default_path())?
        };

        // Fatal before any stream exists
        let root = resolve_root(self.path)?;
        let sort = self.sort.map_or(config.default_sort, SortArg::to_mode);
        let scanner = config.scanner(&root);

        if self.json {
            run_json(&scanner, sort)
        } else if self.list {
            run_list(&scanner, &root, sort)
        } else {
            let tool = self
                .tool
                .map_or(config.removal_tool, ToolArg::to_preference)
                .resolve();
            info!(root = %root.display(), tool = tool.name(), "starting interactive session");

            let app = App::new(root, sort);
            let session = tui::run_tui(app, scanner.scan(), tool)?;
            print_session_summary(&session);
            Ok(())
        }
    }
}

/// Set up `tracing`.
///
/// The interactive view owns the terminal, so without `--log-file` it gets no
/// subscriber at all; deletion failures are printed after it closes instead.
fn init_logging(verbose: bool, log_file: Option<&Path>, interactive: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = fmt().with_env_filter(filter).with_target(false);

    let result = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).try_init()
        }
        None if interactive => return Ok(()),
        None => builder.with_writer(std::io::stderr).try_init(),
    };

    result.map_err(|err| anyhow!("Failed to initialize logging: {}", err))
}

fn init_config(path: Option<PathBuf>) -> Result<()> {
    let config_path = match path {
        Some(path) => path,
        None => Config::ensure_config_dir()?,
    };

    let config = Config::default();
    config.save(&config_path)?;

    println!(
        "{} {}",
        "Config file created:".green().bold(),
        config_path.display()
    );

    Ok(())
}

fn run_json(scanner: &Scanner, sort: SortMode) -> Result<()> {
    let mut entries = scanner.scan().drain(|_| {});
    sort.sort(&mut entries);
    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}

fn run_list(scanner: &Scanner, root: &Path, sort: SortMode) -> Result<()> {
    println!("{}", "Scanning for virtual environments...".cyan().bold());

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(100));

    let mut entries = scanner.scan().drain(|progress| {
        pb.set_message(format!(
            "{} folders, {} environments | {}",
            progress.folders_scanned,
            progress.repos_found,
            shorten_path(&progress.current_path, 50)
        ));
    });
    pb.finish_and_clear();

    if entries.is_empty() {
        println!(
            "{}",
            format!(
                "No git repositories with a virtual environment found under {}",
                root.display()
            )
            .yellow()
        );
        return Ok(());
    }

    sort.sort(&mut entries);
    print_table(&entries);

    let total: u64 = entries.iter().map(|e| e.size).sum();
    println!(
        "\n  Found {} environments, {} reclaimable",
        entries.len().to_string().bright_white(),
        format_size(total).bright_yellow()
    );

    Ok(())
}

fn print_table(entries: &[VenvEntry]) {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
    table.set_titles(Row::new(vec![
        Cell::new("#"),
        Cell::new("Repository"),
        Cell::new("Size"),
        Cell::new("Age"),
        Cell::new("Manifest"),
    ]));

    for (i, entry) in entries.iter().enumerate() {
        table.add_row(Row::new(vec![
            Cell::new(&(i + 1).to_string()),
            Cell::new(&shorten_path(&entry.repo_path, 60)),
            Cell::new(&entry.size_human()),
            Cell::new(&format!("{}d", entry.days_since_modified())),
            Cell::new(if entry.has_manifest { "yes" } else { "no" }),
        ]));
    }

    table.printstd();
}

fn print_session_summary(session: &Session) {
    let app = &session.app;

    if app.deletion.is_some() {
        let (removed, freed) = app.totals();
        println!("\n{}", "Cleaning completed!".green().bold());
        println!("  Removed: {}", removed);
        println!("  Space freed: {}", format_size(freed).bright_yellow());
    } else if app.entries.is_empty() {
        println!(
            "{}",
            format!(
                "No git repositories with a virtual environment found under {}",
                app.root.display()
            )
            .yellow()
        );
    }

    if !session.failures.is_empty() {
        println!("  Failed: {}", session.failures.len().to_string().red());
        for failure in &session.failures {
            eprintln!(
                "{} {}: {}",
                "Error deleting".red(),
                failure.path.display(),
                failure.error
            );
        }
    }
}
