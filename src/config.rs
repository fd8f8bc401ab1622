// Runtime configuration shared by the CLI, the TUI and the API server

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// CVM open-data snapshot of every publicly-traded company.
pub const DEFAULT_SOURCE_URL: &str =
    "https://dados.cvm.gov.br/dados/CIA_ABERTA/CAD/DADOS/cad_cia_aberta.csv";

pub const DEFAULT_DATABASE_PATH: &str = "companhias.db";

/// Which rows count as "current" in the listing view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LatestMode {
    /// Rows stamped with the table-wide maximum snapshot date.
    #[default]
    Global,
    /// Each entity's own most recent row.
    PerEntity,
}

impl LatestMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LatestMode::Global => "global",
            LatestMode::PerEntity => "per-entity",
        }
    }
}

impl fmt::Display for LatestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LatestMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(LatestMode::Global),
            "per-entity" => Ok(LatestMode::PerEntity),
            other => Err(format!("unknown latest mode '{other}' (expected global or per-entity)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Where the registry CSV is downloaded from.
    pub source_url: String,
    /// SQLite database holding the snapshots.
    pub database_path: PathBuf,
    /// Where to keep a copy of the last downloaded CSV, if anywhere.
    pub cache_path: Option<PathBuf>,
    pub latest_mode: LatestMode,
    /// Run each ingestion inside a single transaction.
    pub atomic_ingest: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_url: DEFAULT_SOURCE_URL.to_string(),
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            cache_path: None,
            latest_mode: LatestMode::default(),
            atomic_ingest: false,
        }
    }
}
