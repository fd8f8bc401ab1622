// 👁️ Query Views - read-only projections handed to the presentation layer

use crate::config::LatestMode;
use crate::error::Result;
use crate::identifier::normalize;
use crate::snapshot::EntitySnapshot;
use crate::store::SnapshotStore;
use chrono::NaiveDate;
use serde::Serialize;

/// The current listing of companies.
#[derive(Debug, Clone, Serialize)]
pub struct Listing {
    pub mode: LatestMode,
    /// Most recent snapshot date in the store (None when empty).
    pub last_updated: Option<NaiveDate>,
    pub companies: Vec<EntitySnapshot>,
}

/// Every stored version of one company, most recent first.
#[derive(Debug, Clone, Serialize)]
pub struct History {
    /// Canonical identifier the lookup ran with.
    pub identifier: String,
    pub entries: Vec<EntitySnapshot>,
}

impl History {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshots where the status differs from the previous (older) one.
    pub fn status_changes(&self) -> impl Iterator<Item = &EntitySnapshot> {
        self.entries.iter().enumerate().filter_map(move |(i, entry)| {
            match self.entries.get(i + 1) {
                Some(older) if older.status() == entry.status() => None,
                _ => Some(entry),
            }
        })
    }
}

pub fn listing(store: &SnapshotStore, mode: LatestMode) -> Result<Listing> {
    let companies = match mode {
        LatestMode::Global => store.latest_rows()?,
        LatestMode::PerEntity => store.latest_rows_per_entity()?,
    };

    Ok(Listing {
        mode,
        last_updated: store.latest_snapshot_date()?,
        companies,
    })
}

/// Look up a company's history; `raw_identifier` may carry CNPJ punctuation.
pub fn history(store: &SnapshotStore, raw_identifier: &str) -> Result<History> {
    let identifier = normalize(raw_identifier.trim());
    let entries = store.history_for(&identifier)?;

    Ok(History {
        identifier,
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::CompanyRecord;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn seed(store: &SnapshotStore, cnpj: &str, name: &str, status: &str, on: NaiveDate) {
        let record = CompanyRecord {
            cnpj: cnpj.to_string(),
            legal_name: name.to_string(),
            status: status.to_string(),
            ..CompanyRecord::default()
        };
        store.insert(&EntitySnapshot::new(record, on)).unwrap();
    }

    #[test]
    fn test_listing_modes() {
        let store = SnapshotStore::open_in_memory().unwrap();
        seed(&store, "11111111000111", "ALFA", "ATIVO", date(2024, 1, 1));
        seed(&store, "22222222000122", "BETA", "ATIVO", date(2024, 2, 1));

        let global = listing(&store, LatestMode::Global).unwrap();
        assert_eq!(global.last_updated, Some(date(2024, 2, 1)));
        assert_eq!(global.companies.len(), 1);
        assert_eq!(global.companies[0].legal_name(), "BETA");

        let per_entity = listing(&store, LatestMode::PerEntity).unwrap();
        assert_eq!(per_entity.companies.len(), 2);
        assert_eq!(per_entity.companies[0].legal_name(), "ALFA");
    }

    #[test]
    fn test_empty_store_views() {
        let store = SnapshotStore::open_in_memory().unwrap();

        let listing = listing(&store, LatestMode::Global).unwrap();
        assert!(listing.companies.is_empty());
        assert_eq!(listing.last_updated, None);
        assert!(history(&store, "anything").unwrap().is_empty());
    }

    #[test]
    fn test_history_normalizes_lookup_key() {
        let store = SnapshotStore::open_in_memory().unwrap();
        seed(&store, "12345678000190", "ACME", "ATIVO", date(2024, 1, 1));
        seed(&store, "12345678000190", "ACME", "ATIVO", date(2024, 2, 1));

        let history = history(&store, " 12.345.678/0001-90 ").unwrap();

        assert_eq!(history.identifier, "12345678000190");
        let dates: Vec<_> = history.entries.iter().map(|s| s.snapshot_date).collect();
        assert_eq!(dates, vec![date(2024, 2, 1), date(2024, 1, 1)]);
    }

    #[test]
    fn test_status_changes() {
        let store = SnapshotStore::open_in_memory().unwrap();
        seed(&store, "12345678000190", "ACME", "ATIVO", date(2024, 1, 1));
        seed(&store, "12345678000190", "ACME", "ATIVO", date(2024, 2, 1));
        seed(&store, "12345678000190", "ACME", "CANCELADA", date(2024, 3, 1));

        let history = history(&store, "12345678000190").unwrap();
        let changes: Vec<_> = history
            .status_changes()
            .map(|s| (s.snapshot_date, s.status().to_string()))
            .collect();

        assert_eq!(
            changes,
            vec![
                (date(2024, 3, 1), "CANCELADA".to_string()),
                (date(2024, 1, 1), "ATIVO".to_string()),
            ]
        );
    }
}
