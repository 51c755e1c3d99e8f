// src/models/token.rs
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Manufacturing stages a unit passes through.
///
/// The string form is the stable identifier stored in the database and
/// embedded in printed scan codes, so renaming a variant is a breaking change.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
    Serialize, Deserialize, Display, EnumString, EnumIter, AsRefStr,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Process {
    Inv,
    Scc,
    Batt,
    Pd,
    Pb,
    Wd,
    Wb,
    Qc,
    Pack,
    Finish,
}

impl Process {
    /// Label used inside scan codes. Kept to four characters at most.
    pub fn code_label(&self) -> &'static str {
        match self {
            Process::Inv => "INV",
            Process::Scc => "SCC",
            Process::Batt => "BATT",
            Process::Pd => "PD",
            Process::Pb => "PB",
            Process::Wd => "WD",
            Process::Wb => "WB",
            Process::Qc => "QC",
            Process::Pack => "PACK",
            Process::Finish => "FNSH",
        }
    }
}

/// Completion state of a single token. `Done` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenStatus {
    Pending,
    Done,
}

impl TokenStatus {
    pub fn from_flag(completed: bool) -> Self {
        if completed { TokenStatus::Done } else { TokenStatus::Pending }
    }

    /// The only transition a scan can cause.
    pub fn on_scan(self) -> Self {
        TokenStatus::Done
    }

    pub fn is_done(self) -> bool {
        matches!(self, TokenStatus::Done)
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct ProcessToken {
    pub id: String,
    pub unit_id: String,
    pub process: String,
    pub scan_code: String,
    pub barcode: String,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessToken {
    pub fn status(&self) -> TokenStatus {
        TokenStatus::from_flag(self.completed)
    }
}

/// Token row joined with the code of the unit that owns it.
#[derive(Debug, Serialize, sqlx::FromRow, Clone)]
pub struct TokenWithUnit {
    pub id: String,
    pub unit_id: String,
    pub unit_code: String,
    pub process: String,
    pub scan_code: String,
    pub completed: bool,
}

#[derive(Debug, Clone)]
pub struct NewProcessToken {
    pub id: String,
    pub unit_id: String,
    pub process: Process,
    pub scan_code: String,
    pub barcode: String,
}

/// Completion progress of one token, used by the weekly chart.
#[derive(Debug, sqlx::FromRow, Clone)]
pub struct TokenProgress {
    pub unit_id: String,
    pub completed: bool,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_process_round_trip_names() {
        assert_eq!(Process::Batt.to_string(), "BATT");
        assert_eq!(Process::from_str("WD").unwrap(), Process::Wd);
        assert!(Process::from_str("PAINT").is_err());
        assert_eq!(serde_json::to_string(&Process::Pack).unwrap(), "\"PACK\"");
    }

    #[test]
    fn test_code_labels_are_short() {
        for process in Process::iter() {
            assert!(process.code_label().len() <= 4);
            assert!(!process.code_label().contains('-'));
        }
        assert_eq!(Process::Finish.code_label(), "FNSH");
    }

    #[test]
    fn test_status_is_monotonic() {
        assert_eq!(TokenStatus::Pending.on_scan(), TokenStatus::Done);
        assert_eq!(TokenStatus::Done.on_scan(), TokenStatus::Done);
        assert!(TokenStatus::from_flag(true).is_done());
    }
}
