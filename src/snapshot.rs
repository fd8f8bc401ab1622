// 📸 Entity Snapshot - one company's registry record as of one calendar date
// Columns follow cad_cia_aberta.csv 1:1 (CSV header → store column)

use chrono::NaiveDate;
use csv::StringRecord;
use rusqlite::types::ToSql;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// A registry column: its upstream CSV header and its store column name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub header: &'static str,
    pub name: &'static str,
}

// ============================================================================
// COLUMN TABLE
// Single source for the record struct, the CSV headers, and the SQL columns.
// ============================================================================

macro_rules! registry_record {
    ( $( $(#[$meta:meta])* $field:ident : $ty:ty => $header:literal ),* $(,)? ) => {
        /// One CSV row of the registry, exactly as published (identifier aside).
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
        pub struct CompanyRecord {
            $(
                $(#[$meta])*
                #[serde(rename(deserialize = $header))]
                pub $field: $ty,
            )*
        }

        /// Every registry column, in CSV order.
        pub const COLUMNS: &[Column] = &[
            $( Column { header: $header, name: stringify!($field) }, )*
        ];

        impl CompanyRecord {
            /// Values to bind, in [`COLUMNS`] order.
            pub(crate) fn sql_values(&self) -> Vec<&dyn ToSql> {
                vec![ $( &self.$field as &dyn ToSql, )* ]
            }

            pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
                Ok(Self {
                    $( $field: row.get(stringify!($field))?, )*
                })
            }
        }
    };
}

registry_record! {
    /// Canonical (digits-only) CNPJ once ingested.
    cnpj: String => "CNPJ_CIA",
    legal_name: String => "DENOM_SOCIAL",
    trade_name: Option<String> => "DENOM_COMERC",
    registered_on: Option<String> => "DT_REG",
    constituted_on: Option<String> => "DT_CONST",
    cancelled_on: Option<String> => "DT_CANCEL",
    cancellation_reason: Option<String> => "MOTIVO_CANCEL",
    /// e.g. "ATIVO", "CANCELADA"
    status: String => "SIT",
    status_since: Option<String> => "DT_INI_SIT",
    cvm_code: String => "CD_CVM",
    sector: Option<String> => "SETOR_ATIV",
    market_type: Option<String> => "TP_MERC",
    registration_category: Option<String> => "CATEG_REG",
    category_since: Option<String> => "DT_INI_CATEG",
    issuer_status: Option<String> => "SIT_EMISSOR",
    issuer_status_since: Option<String> => "DT_INI_SIT_EMISSOR",
    shareholder_control: Option<String> => "CONTROLE_ACIONARIO",
    address_type: Option<String> => "TP_ENDER",
    street: Option<String> => "LOGRADOURO",
    complement: Option<String> => "COMPL",
    district: Option<String> => "BAIRRO",
    city: Option<String> => "MUN",
    state: Option<String> => "UF",
    country: Option<String> => "PAIS",
    postal_code: Option<String> => "CEP",
    phone_area: Option<String> => "DDD_TEL",
    phone: Option<String> => "TEL",
    fax_area: Option<String> => "DDD_FAX",
    fax: Option<String> => "FAX",
    email: Option<String> => "EMAIL",
    responsible_type: Option<String> => "TP_RESP",
    responsible: Option<String> => "RESP",
    responsible_since: Option<String> => "DT_INI_RESP",
    responsible_street: Option<String> => "LOGRADOURO_RESP",
    responsible_complement: Option<String> => "COMPL_RESP",
    responsible_district: Option<String> => "BAIRRO_RESP",
    responsible_city: Option<String> => "MUN_RESP",
    responsible_state: Option<String> => "UF_RESP",
    responsible_country: Option<String> => "PAIS_RESP",
    responsible_postal_code: Option<String> => "CEP_RESP",
    responsible_phone_area: Option<String> => "DDD_TEL_RESP",
    responsible_phone: Option<String> => "TEL_RESP",
    responsible_fax_area: Option<String> => "DDD_FAX_RESP",
    responsible_fax: Option<String> => "FAX_RESP",
    responsible_email: Option<String> => "EMAIL_RESP",
    auditor_cnpj: Option<String> => "CNPJ_AUDITOR",
    auditor: Option<String> => "AUDITOR",
}

/// Headers from [`COLUMNS`] that `headers` does not contain.
///
/// Optional columns would otherwise deserialize to `None` silently, so the
/// ingestion pipeline checks the header line before reading any record.
pub fn missing_columns(headers: &StringRecord) -> Vec<&'static str> {
    COLUMNS
        .iter()
        .filter(|col| !headers.iter().any(|h| h == col.header))
        .map(|col| col.header)
        .collect()
}

// ============================================================================
// ENTITY SNAPSHOT
// ============================================================================

/// A [`CompanyRecord`] stamped with the day it was ingested.
///
/// Identity is the pair (`record.cnpj`, `snapshot_date`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntitySnapshot {
    pub snapshot_date: NaiveDate,
    #[serde(flatten)]
    pub record: CompanyRecord,
}

impl EntitySnapshot {
    pub fn new(record: CompanyRecord, snapshot_date: NaiveDate) -> Self {
        Self {
            snapshot_date,
            record,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.record.cnpj
    }

    pub fn legal_name(&self) -> &str {
        &self.record.legal_name
    }

    pub fn status(&self) -> &str {
        &self.record.status
    }

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            snapshot_date: row.get("snapshot_date")?,
            record: CompanyRecord::from_row(row)?,
        })
    }
}
