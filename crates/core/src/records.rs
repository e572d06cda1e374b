//! Dive Operation Records
//!
//! Read-only view over the divers and dive logs kept by the rest of the
//! application. The voice assistant only ever queries these records; loading
//! and saving them belongs to the persistence layer.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Operational status of a diver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiverStatus {
    #[serde(alias = "Activo")]
    Active,
    #[serde(alias = "En Espera")]
    OnStandby,
    #[serde(alias = "Inactivo")]
    Inactive,
    #[serde(alias = "Buceando")]
    Diving,
}

impl DiverStatus {
    /// A diver counts as operating while active or currently in the water.
    pub fn is_operating(self) -> bool {
        matches!(self, DiverStatus::Active | DiverStatus::Diving)
    }
}

/// A registered diver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diver {
    pub id: String,
    pub name: String,
    pub status: DiverStatus,
    #[serde(default)]
    pub team: String,
}

/// A single entry in the dive log book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiveLog {
    pub id: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub location: String,
    pub supervisor: String,
    /// Names of the divers who took part in the dive.
    #[serde(default)]
    pub divers: Vec<String>,
}

impl DiveLog {
    /// Returns true if `name` took part in the dive or supervised it.
    pub fn involves(&self, name: &str) -> bool {
        self.supervisor == name || self.divers.iter().any(|d| d == name)
    }
}

/// Read-only access to the record collections.
pub trait RecordStore: Send + Sync {
    fn divers(&self) -> &[Diver];
    fn dive_logs(&self) -> &[DiveLog];
}

/// On-disk snapshot layout accepted by [`InMemoryRecordStore::from_json_file`].
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordSnapshot {
    #[serde(default)]
    divers: Vec<Diver>,
    #[serde(default)]
    dive_logs: Vec<DiveLog>,
}

/// A `RecordStore` backed by plain vectors.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRecordStore {
    divers: Vec<Diver>,
    dive_logs: Vec<DiveLog>,
}

impl InMemoryRecordStore {
    pub fn new(divers: Vec<Diver>, dive_logs: Vec<DiveLog>) -> Self {
        Self { divers, dive_logs }
    }

    /// Parses a JSON snapshot of the form `{"divers": [...], "diveLogs": [...]}`.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let snapshot: RecordSnapshot =
            serde_json::from_str(json).context("Failed to parse record snapshot")?;
        Ok(Self::new(snapshot.divers, snapshot.dive_logs))
    }

    /// Loads a JSON snapshot from disk.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read records from {}", path.display()))?;
        let store = Self::from_json_str(&raw)
            .with_context(|| format!("Invalid record snapshot in {}", path.display()))?;
        tracing::info!(
            path = %path.display(),
            divers = store.divers.len(),
            dive_logs = store.dive_logs.len(),
            "Loaded record snapshot"
        );
        Ok(store)
    }
}

impl RecordStore for InMemoryRecordStore {
    fn divers(&self) -> &[Diver] {
        &self.divers
    }

    fn dive_logs(&self) -> &[DiveLog] {
        &self.dive_logs
    }
}
