// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use company_registry::{
    format_cnpj, ingest, views, Config, LatestMode, SnapshotStore, DEFAULT_DATABASE_PATH,
    DEFAULT_SOURCE_URL,
};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, error};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// SQLite database holding the snapshots.
    #[arg(long, global = true, env = "REGISTRY_DATABASE", default_value = DEFAULT_DATABASE_PATH)]
    database: PathBuf,

    /// Defaults to the terminal UI.
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Download today's registry snapshot and store it.
    Import {
        /// Ingest a CSV already on disk instead of downloading it.
        #[arg(long)]
        file: Option<PathBuf>,

        #[arg(long, env = "REGISTRY_SOURCE_URL", default_value = DEFAULT_SOURCE_URL)]
        url: String,

        /// Keep a copy of the downloaded CSV here.
        #[arg(long, env = "REGISTRY_CACHE")]
        cache: Option<PathBuf>,

        /// Roll the whole run back if any record fails.
        #[arg(long)]
        atomic: bool,
    },

    /// Print the current listing.
    Latest {
        /// `global` (rows from the newest run) or `per-entity` (each company's newest row).
        #[arg(long, env = "REGISTRY_LATEST_MODE", default_value = "global")]
        mode: LatestMode,
    },

    /// Print every stored version of one company.
    History {
        /// CNPJ, with or without punctuation.
        identifier: String,
    },

    /// Browse the listing and histories in the terminal.
    Ui {
        #[arg(long, env = "REGISTRY_LATEST_MODE", default_value = "global")]
        mode: LatestMode,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    debug!("command line input recorded: {cli:?}");

    let mut config = Config {
        database_path: cli.database,
        ..Config::default()
    };

    match cli.command {
        Some(Commands::Import {
            file,
            url,
            cache,
            atomic,
        }) => {
            config.source_url = url;
            config.cache_path = cache;
            config.atomic_ingest = atomic;
            run_import(&config, file)
        }
        Some(Commands::Latest { mode }) => {
            config.latest_mode = mode;
            run_latest(&config)
        }
        Some(Commands::History { identifier }) => run_history(&config, &identifier),
        Some(Commands::Ui { mode }) => {
            config.latest_mode = mode;
            run_ui_mode(&config)
        }
        None => run_ui_mode(&config),
    }
}

fn open_store(config: &Config) -> Result<SnapshotStore> {
    SnapshotStore::open(&config.database_path)
        .with_context(|| format!("Failed to open database {}", config.database_path.display()))
}

fn run_import(config: &Config, file: Option<PathBuf>) -> Result<()> {
    println!("🗄️  Registry import - CSV → SQLite");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let store = open_store(config)?;
    let run_date = ingest::today();

    let result = match &file {
        Some(path) => {
            println!("\n📂 Loading {} ...", path.display());
            ingest::run_from_file(&store, config, path, run_date)
        }
        None => {
            println!("\n🌐 Downloading {} ...", config.source_url);
            ingest::run(&store, config, run_date)
        }
    };

    let report = match result {
        Ok(report) => report,
        Err(err) => {
            if err.is_retrieval() {
                error!("snapshot not retrieved; the store was not touched");
            }
            return Err(err).context("Import failed");
        }
    };

    println!("\n✓ Snapshot date: {}", report.snapshot_date);
    println!("✓ Records read: {}", report.records);
    println!("✓ Inserted: {} snapshots", report.inserted);
    println!("✓ Skipped (already stored today): {}", report.skipped);
    println!("✓ Database contains {} snapshots", store.count()?);

    Ok(())
}

fn run_latest(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let listing = views::listing(&store, config.latest_mode)?;

    match listing.last_updated {
        Some(date) => println!("Last update: {date} ({} view)", listing.mode),
        None => {
            println!("No snapshots stored yet. Run: company-registry import");
            return Ok(());
        }
    }
    println!();

    for company in &listing.companies {
        println!(
            "{:<20} {:<12} {:<10} {}",
            format_cnpj(company.identifier()),
            company.snapshot_date,
            company.status(),
            company.legal_name()
        );
    }
    println!("\n{} companies", listing.companies.len());

    Ok(())
}

fn run_history(config: &Config, identifier: &str) -> Result<()> {
    let store = open_store(config)?;
    let history = views::history(&store, identifier)?;

    if history.is_empty() {
        println!("No snapshots for {}", format_cnpj(&history.identifier));
        return Ok(());
    }

    println!("History for {}\n", format_cnpj(&history.identifier));

    let changes: HashSet<_> = history.status_changes().map(|s| s.snapshot_date).collect();
    for entry in &history.entries {
        let marker = if changes.contains(&entry.snapshot_date) { "•" } else { " " };
        println!(
            "{marker} {:<12} {:<10} {}",
            entry.snapshot_date,
            entry.status(),
            entry.legal_name()
        );
    }

    Ok(())
}

#[cfg(feature = "tui")]
fn run_ui_mode(config: &Config) -> Result<()> {
    if !config.database_path.exists() {
        eprintln!("❌ Database not found at {}", config.database_path.display());
        eprintln!("   Run: company-registry import");
        eprintln!("   to download a snapshot first.");
        std::process::exit(1);
    }

    let store = open_store(config)?;
    let listing = views::listing(&store, config.latest_mode)?;

    let mut app = ui::App::new(&store, listing);
    ui::run_ui(&mut app)?;

    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_config: &Config) -> Result<()> {
    eprintln!("❌ TUI mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or use the API: cargo run --bin registry-server --features server");
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_import_flags() {
        let cli = Cli::parse_from([
            "company-registry",
            "--database",
            "/tmp/registry.db",
            "import",
            "--file",
            "cad_cia_aberta.csv",
            "--atomic",
        ]);

        assert_eq!(cli.database, PathBuf::from("/tmp/registry.db"));
        match cli.command {
            Some(Commands::Import { file, atomic, .. }) => {
                assert_eq!(file, Some(PathBuf::from("cad_cia_aberta.csv")));
                assert!(atomic);
            }
            other => panic!("expected import, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_history() {
        let cli = Cli::parse_from(["company-registry", "history", "11.222.333/0001-44"]);
        assert!(matches!(
            cli.command,
            Some(Commands::History { ref identifier }) if identifier == "11.222.333/0001-44"
        ));
    }

    #[test]
    fn test_latest_mode_flag() {
        let cli = Cli::parse_from(["company-registry", "latest", "--mode", "per-entity"]);
        assert!(matches!(cli.command, Some(Commands::Latest { mode: LatestMode::PerEntity })));

        let cli = Cli::parse_from(["company-registry", "ui", "--mode", "global"]);
        assert!(matches!(cli.command, Some(Commands::Ui { mode: LatestMode::Global })));

        assert!(Cli::try_parse_from(["company-registry", "latest", "--mode", "newest"]).is_err());
    }
}
