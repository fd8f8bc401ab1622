// 📥 Ingestion Pipeline - download, decode, dedupe, insert
//
// One pass over the registry CSV. A record is inserted only when no row exists
// yet for its (canonical cnpj, run date) pair, so re-running on the same day
// stores nothing new.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::identifier::normalize;
use crate::snapshot::{missing_columns, CompanyRecord, EntitySnapshot};
use crate::store::{self, SnapshotStore};
use chrono::NaiveDate;
use reqwest::blocking::Client;
use rusqlite::Connection;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// The registry CSV is semicolon-delimited.
const DELIMITER: u8 = b';';

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub snapshot_date: NaiveDate,
    /// Records read from the CSV.
    pub records: usize,
    pub inserted: usize,
    /// Records whose (cnpj, date) pair was already stored.
    pub skipped: usize,
}

impl IngestReport {
    fn new(snapshot_date: NaiveDate) -> Self {
        Self {
            snapshot_date,
            records: 0,
            inserted: 0,
            skipped: 0,
        }
    }
}

/// Snapshot date for a run started now (local calendar day).
pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

// ============================================================================
// RETRIEVAL
// ============================================================================

/// HTTP client for downloads from `url`; a setup failure is reported against it.
pub fn build_client(url: &str) -> Result<Client> {
    Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|source| Error::ResourceRetrieval {
            url: url.to_string(),
            source,
        })
}

/// GET the registry CSV. Any network error or non-success status is fatal.
pub fn fetch(client: &Client, url: &str) -> Result<Vec<u8>> {
    let retrieval = |source| Error::ResourceRetrieval {
        url: url.to_string(),
        source,
    };

    debug!(url, "fetching registry snapshot");
    let bytes = client
        .get(url)
        .send()
        .and_then(|response| response.error_for_status())
        .and_then(|response| response.bytes())
        .map_err(|err| {
            error!(url, "failed to fetch registry snapshot, error({err})");
            retrieval(err)
        })?;
    debug!(url, bytes = bytes.len(), "registry snapshot downloaded");

    Ok(bytes.to_vec())
}

/// Decode ISO-8859-1 text: every byte is the Unicode code point of the same value.
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

fn write_cache(path: &Path, payload: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| Error::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(path, payload).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "registry snapshot cached");

    Ok(())
}

// ============================================================================
// INGESTION
// ============================================================================

fn malformed(err: csv::Error) -> Error {
    Error::MalformedRecord {
        line: err.position().map(|pos| pos.line()).unwrap_or(0),
        reason: err.to_string(),
    }
}

/// Ingest decoded CSV text into `conn`, stamping every new row with `run_date`.
///
/// Records are processed in file order. Stops at the first malformed record;
/// whatever was inserted before it stays unless `conn` is inside a transaction
/// that the caller rolls back.
pub fn ingest(conn: &Connection, text: &str, run_date: NaiveDate) -> Result<IngestReport> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(DELIMITER)
        .from_reader(text.as_bytes());

    let missing = missing_columns(reader.headers().map_err(malformed)?);
    if !missing.is_empty() {
        return Err(Error::MalformedRecord {
            line: 1,
            reason: format!("missing columns: {}", missing.join(", ")),
        });
    }

    let mut report = IngestReport::new(run_date);

    for result in reader.deserialize::<CompanyRecord>() {
        let mut record = result.map_err(malformed)?;
        report.records += 1;

        record.cnpj = normalize(&record.cnpj);

        if store::exists(conn, &record.cnpj, run_date)? {
            debug!(cnpj = %record.cnpj, "already stored for this date, skipping");
            report.skipped += 1;
            continue;
        }

        store::insert(conn, &EntitySnapshot::new(record, run_date))?;
        report.inserted += 1;
    }

    Ok(report)
}

/// Decode a raw payload and ingest it into the store.
pub fn ingest_payload(
    store: &SnapshotStore,
    payload: &[u8],
    run_date: NaiveDate,
    atomic: bool,
) -> Result<IngestReport> {
    let text = decode_latin1(payload);

    let result = if atomic {
        store.with_transaction(|conn| ingest(conn, &text, run_date))
    } else {
        store.with_connection(|conn| ingest(conn, &text, run_date))
    };

    match &result {
        Ok(report) => info!(
            date = %report.snapshot_date,
            records = report.records,
            inserted = report.inserted,
            skipped = report.skipped,
            "ingestion finished"
        ),
        Err(err) => warn!(atomic, "ingestion aborted: {err}"),
    }

    result
}

/// Download the registry from `config.source_url` and ingest it.
pub fn run(store: &SnapshotStore, config: &Config, run_date: NaiveDate) -> Result<IngestReport> {
    let client = build_client(&config.source_url)?;
    let payload = fetch(&client, &config.source_url)?;

    if let Some(cache) = &config.cache_path {
        write_cache(cache, &payload)?;
    }

    ingest_payload(store, &payload, run_date, config.atomic_ingest)
}

/// Ingest a registry CSV already on disk (e.g. a previously cached download).
pub fn run_from_file(
    store: &SnapshotStore,
    config: &Config,
    path: &Path,
    run_date: NaiveDate,
) -> Result<IngestReport> {
    debug!(path = %path.display(), "reading registry snapshot from file");
    let payload = std::fs::read(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;

    ingest_payload(store, &payload, run_date, config.atomic_ingest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::COLUMNS;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn header() -> String {
        COLUMNS.iter().map(|c| c.header).collect::<Vec<_>>().join(";")
    }

    /// One CSV line with every column filled except the ones given
    fn create_test_row(cnpj: &str, legal_name: &str, trade_name: &str) -> String {
        COLUMNS
            .iter()
            .map(|c| match c.header {
                "CNPJ_CIA" => cnpj.to_string(),
                "DENOM_SOCIAL" => legal_name.to_string(),
                "DENOM_COMERC" => trade_name.to_string(),
                "SIT" => "ATIVO".to_string(),
                "CD_CVM" => "1234".to_string(),
                "DT_REG" => "1995-03-01".to_string(),
                "DT_CANCEL" => String::new(),
                "UF" => "SP".to_string(),
                other => format!("{}_VALUE", other.to_lowercase()),
            })
            .collect::<Vec<_>>()
            .join(";")
    }

    fn create_test_csv(rows: &[String]) -> String {
        let mut lines = vec![header()];
        lines.extend_from_slice(rows);
        lines.join("\n") + "\n"
    }

    fn encode_latin1(text: &str) -> Vec<u8> {
        text.chars().map(|c| c as u32 as u8).collect()
    }

    #[test]
    fn test_decode_latin1() {
        let bytes = [0x41, 0xC7, 0xDA, 0x43, 0x41, 0x52, 0x20, 0x53, 0xC3, 0x4F];
        assert_eq!(decode_latin1(&bytes), "AÇÚCAR SÃO");
    }

    #[test]
    fn test_ingest_normalizes_and_maps_columns() {
        let store = SnapshotStore::open_in_memory().unwrap();
        let csv = create_test_csv(&[create_test_row("11.222.333/0001-44", "ACME S.A.", "ACME")]);

        let report = store
            .with_connection(|conn| ingest(conn, &csv, date(2024, 2, 1)))
            .unwrap();

        assert_eq!(report.inserted, 1);
        let history = store.history_for("11222333000144").unwrap();
        assert_eq!(history.len(), 1);
        let record = &history[0].record;
        assert_eq!(record.legal_name, "ACME S.A.");
        assert_eq!(record.trade_name.as_deref(), Some("ACME"));
        assert_eq!(record.registered_on.as_deref(), Some("1995-03-01"));
        assert_eq!(record.cancelled_on, None);
        assert_eq!(record.auditor.as_deref(), Some("auditor_VALUE"));
        assert_eq!(history[0].snapshot_date, date(2024, 2, 1));
    }

    #[test]
    fn test_ingest_twice_same_day_inserts_once() {
        let store = SnapshotStore::open_in_memory().unwrap();
        let csv = create_test_csv(&[
            create_test_row("11.111.111/0001-11", "ALFA", "A"),
            create_test_row("22.222.222/0001-22", "BETA", "B"),
            create_test_row("33.333.333/0001-33", "GAMA", "G"),
        ]);
        let payload = encode_latin1(&csv);

        let first = ingest_payload(&store, &payload, date(2024, 2, 1), false).unwrap();
        let count_after_first = store.count().unwrap();
        let second = ingest_payload(&store, &payload, date(2024, 2, 1), false).unwrap();
        let count_after_second = store.count().unwrap();

        assert_eq!(first.inserted, 3);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.skipped, 3);
        assert_eq!(count_after_first, 3);
        assert_eq!(count_after_second, count_after_first);
    }

    #[test]
    fn test_ingest_on_a_new_day_appends_history() {
        let store = SnapshotStore::open_in_memory().unwrap();
        let csv = create_test_csv(&[create_test_row("12.345.678/0001-90", "ACME", "")]);

        ingest_payload(&store, csv.as_bytes(), date(2024, 1, 1), false).unwrap();
        ingest_payload(&store, csv.as_bytes(), date(2024, 2, 1), false).unwrap();

        let dates: Vec<_> = store
            .history_for("12345678000190")
            .unwrap()
            .iter()
            .map(|s| s.snapshot_date)
            .collect();
        assert_eq!(dates, vec![date(2024, 2, 1), date(2024, 1, 1)]);
    }

    #[test]
    fn test_first_record_wins_for_same_identifier() {
        let store = SnapshotStore::open_in_memory().unwrap();
        let csv = create_test_csv(&[
            create_test_row("11.222.333/0001-44", "FIRST S.A.", ""),
            create_test_row("11222333000144", "SECOND S.A.", ""),
        ]);

        let report = ingest_payload(&store, csv.as_bytes(), date(2024, 2, 1), false).unwrap();

        assert_eq!(report.records, 2);
        assert_eq!(report.inserted, 1);
        assert_eq!(report.skipped, 1);
        let history = store.history_for("11222333000144").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].legal_name(), "FIRST S.A.");
    }

    #[test]
    fn test_empty_trade_name_is_stored_as_null() {
        let store = SnapshotStore::open_in_memory().unwrap();
        let csv = create_test_csv(&[create_test_row("11.222.333/0001-44", "ACME", "")]);

        ingest_payload(&store, csv.as_bytes(), date(2024, 2, 1), false).unwrap();

        let history = store.history_for("11222333000144").unwrap();
        assert_eq!(history[0].record.trade_name, None);
    }

    #[test]
    fn test_latin1_payload_keeps_accents() {
        let store = SnapshotStore::open_in_memory().unwrap();
        let csv = create_test_csv(&[create_test_row("11.222.333/0001-44", "AÇÚCAR GUARANI S.A.", "")]);

        ingest_payload(&store, &encode_latin1(&csv), date(2024, 2, 1), false).unwrap();

        let history = store.history_for("11222333000144").unwrap();
        assert_eq!(history[0].legal_name(), "AÇÚCAR GUARANI S.A.");
    }

    #[test]
    fn test_missing_header_column_aborts_before_insert() {
        let store = SnapshotStore::open_in_memory().unwrap();
        let header = COLUMNS
            .iter()
            .filter(|c| c.header != "AUDITOR")
            .map(|c| c.header)
            .collect::<Vec<_>>()
            .join(";");
        let csv = format!("{header}\n11222333000144;ACME\n");

        let err = ingest_payload(&store, csv.as_bytes(), date(2024, 2, 1), false).unwrap_err();

        match err {
            Error::MalformedRecord { line, reason } => {
                assert_eq!(line, 1);
                assert!(reason.contains("AUDITOR"));
            }
            other => panic!("expected MalformedRecord, got {other:?}"),
        }
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_short_record_aborts_and_keeps_earlier_rows() {
        let store = SnapshotStore::open_in_memory().unwrap();
        let csv = create_test_csv(&[
            create_test_row("11.111.111/0001-11", "ALFA", ""),
            create_test_row("22.222.222/0001-22", "BETA", ""),
            "33.333.333/0001-33;GAMA;G".to_string(),
            create_test_row("44.444.444/0001-44", "DELTA", ""),
        ]);

        let err = ingest_payload(&store, csv.as_bytes(), date(2024, 2, 1), false).unwrap_err();

        assert!(matches!(err, Error::MalformedRecord { line: 4, .. }));
        assert_eq!(store.count().unwrap(), 2);
        assert!(!store.exists("44444444000144", date(2024, 2, 1)).unwrap());
    }

    #[test]
    fn test_atomic_ingest_rolls_back_on_malformed_record() {
        let store = SnapshotStore::open_in_memory().unwrap();
        let csv = create_test_csv(&[
            create_test_row("11.111.111/0001-11", "ALFA", ""),
            "22.222.222/0001-22;BETA".to_string(),
        ]);

        let result = ingest_payload(&store, csv.as_bytes(), date(2024, 2, 1), true);

        assert!(matches!(result, Err(Error::MalformedRecord { .. })));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_run_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cad_cia_aberta.csv");
        let csv = create_test_csv(&[
            create_test_row("11.111.111/0001-11", "ALFA", ""),
            create_test_row("22.222.222/0001-22", "BETA", ""),
        ]);
        std::fs::write(&path, encode_latin1(&csv)).unwrap();

        let store = SnapshotStore::open_in_memory().unwrap();
        let report = run_from_file(&store, &Config::default(), &path, date(2024, 2, 1)).unwrap();

        assert_eq!(report.inserted, 2);
        assert_eq!(store.latest_rows().unwrap().len(), 2);
    }

    #[test]
    fn test_run_from_missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open_in_memory().unwrap();

        let err = run_from_file(&store, &Config::default(), &dir.path().join("nope.csv"), date(2024, 2, 1))
            .unwrap_err();

        assert!(matches!(err, Error::Io { .. }));
        assert!(err.is_retrieval());
    }

    #[test]
    fn test_unreachable_source_is_a_retrieval_failure() {
        let store = SnapshotStore::open_in_memory().unwrap();
        let config = Config {
            source_url: "http://127.0.0.1:1/cad_cia_aberta.csv".to_string(),
            ..Config::default()
        };

        let err = run(&store, &config, date(2024, 2, 1)).unwrap_err();

        assert!(matches!(err, Error::ResourceRetrieval { ref url, .. } if url == &config.source_url));
        assert_eq!(store.count().unwrap(), 0);
    }

    /// Answers every connection on a local port with a bare 404.
    fn serve_not_found() -> String {
        use std::io::{Read, Write};
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let _ = stream.write_all(
                    b"HTTP/1.1 404 Not Found\r\ncontent-length: 9\r\nconnection: close\r\n\r\nnot found",
                );
            }
        });

        format!("http://{addr}/cad_cia_aberta.csv")
    }

    #[test]
    fn test_not_found_status_is_a_retrieval_failure() {
        let store = SnapshotStore::open_in_memory().unwrap();
        let config = Config {
            source_url: serve_not_found(),
            ..Config::default()
        };

        let err = run(&store, &config, date(2024, 2, 1)).unwrap_err();

        assert!(matches!(err, Error::ResourceRetrieval { ref url, .. } if url == &config.source_url));
        assert!(err.is_retrieval());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_write_cache_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("cad_cia_aberta.csv");

        write_cache(&path, b"CNPJ_CIA;DENOM_SOCIAL\n").unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"CNPJ_CIA;DENOM_SOCIAL\n");
    }
}
