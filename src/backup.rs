// src/backup.rs
//
// C7 backup/restore. A snapshot is one self-describing JSON archive
// (manifest + all four business tables) written to the export directory with
// write-then-rename so a reader never observes a half-written file. Restore
// validates the manifest's checksum before replacing any table.
use crate::error::FundError;
use crate::store::FundSnapshot;
use blake3::Hasher;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Schema versions this build can restore. Bump when the archive's row shape
/// changes in a way that isn't forward-readable.
pub const SUPPORTED_SCHEMA_VERSIONS: &[u32] = &[1];
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupKind {
    Manual,
    Auto,
    Safety,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowCounts {
    pub investors: usize,
    pub tranches: usize,
    pub transactions: usize,
    pub fee_records: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub id: String,
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
    pub kind: BackupKind,
    pub row_counts: RowCounts,
    pub checksum_algorithm: String,
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupArchive {
    pub manifest: Manifest,
    pub snapshot: FundSnapshot,
}

fn checksum_of(snapshot: &FundSnapshot) -> Result<String, FundError> {
    let canonical =
        serde_json::to_vec(snapshot).map_err(|e| FundError::Storage(e.to_string()))?;
    let mut hasher = Hasher::new();
    hasher.update(&canonical);
    Ok(hasher.finalize().to_hex().to_string())
}

impl BackupArchive {
    pub fn new(snapshot: FundSnapshot, kind: BackupKind, created_at: DateTime<Utc>) -> Result<Self, FundError> {
        let row_counts = RowCounts {
            investors: snapshot.investors.len(),
            tranches: snapshot.tranches.len(),
            transactions: snapshot.transactions.len(),
            fee_records: snapshot.fee_records.len(),
        };
        let checksum = checksum_of(&snapshot)?;
        Ok(Self {
            manifest: Manifest {
                id: Uuid::now_v7().to_string(),
                schema_version: CURRENT_SCHEMA_VERSION,
                created_at,
                kind,
                row_counts,
                checksum_algorithm: "blake3".to_string(),
                checksum,
            },
            snapshot,
        })
    }

    pub fn verify_checksum(&self) -> Result<(), FundError> {
        let actual = checksum_of(&self.snapshot)?;
        if actual != self.manifest.checksum {
            return Err(FundError::Corrupted(format!(
                "archive {} checksum mismatch: manifest says {}, computed {}",
                self.manifest.id, self.manifest.checksum, actual
            )));
        }
        Ok(())
    }
}

fn archive_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{id}.json"))
}

/// Serialize `archive` to a temp file in `dir`, then atomically rename it
/// into place. The filename is the archive id, so a reader can never race a
/// writer on the same final path.
pub async fn write_archive(dir: &Path, archive: &BackupArchive) -> Result<PathBuf, FundError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| FundError::Storage(e.to_string()))?;

    let final_path = archive_path(dir, &archive.manifest.id);
    let tmp_path = dir.join(format!("{}.tmp", archive.manifest.id));

    let bytes = serde_json::to_vec_pretty(archive).map_err(|e| FundError::Storage(e.to_string()))?;
    tokio::fs::write(&tmp_path, &bytes)
        .await
        .map_err(|e| FundError::Storage(e.to_string()))?;
    tokio::fs::rename(&tmp_path, &final_path)
        .await
        .map_err(|e| FundError::Storage(e.to_string()))?;

    Ok(final_path)
}

#[derive(Debug, Clone)]
pub struct BackupSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub kind: BackupKind,
    pub row_counts: RowCounts,
}

/// Enumerate archives in `dir`, newest first.
pub async fn list_backups(dir: &Path) -> Result<Vec<BackupSummary>, FundError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(FundError::Storage(e.to_string())),
    };

    let mut summaries = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| FundError::Storage(e.to_string()))?
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| FundError::Storage(e.to_string()))?;
        let archive: BackupArchive =
            serde_json::from_slice(&bytes).map_err(|e| FundError::Corrupted(e.to_string()))?;
        summaries.push(BackupSummary {
            id: archive.manifest.id,
            created_at: archive.manifest.created_at,
            kind: archive.manifest.kind,
            row_counts: archive.manifest.row_counts,
        });
    }

    summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(summaries)
}

/// Read and checksum-validate the archive `id` from `dir`.
pub async fn read_archive(dir: &Path, id: &str) -> Result<BackupArchive, FundError> {
    let path = archive_path(dir, id);
    let bytes = tokio::fs::read(&path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            FundError::NotFound(format!("backup {id}"))
        } else {
            FundError::Storage(e.to_string())
        }
    })?;
    let archive: BackupArchive =
        serde_json::from_slice(&bytes).map_err(|e| FundError::Corrupted(e.to_string()))?;

    if !SUPPORTED_SCHEMA_VERSIONS.contains(&archive.manifest.schema_version) {
        return Err(FundError::Corrupted(format!(
            "archive {id} has unsupported schema version {}",
            archive.manifest.schema_version
        )));
    }
    archive.verify_checksum()?;

    Ok(archive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn empty_snapshot() -> FundSnapshot {
        FundSnapshot {
            investors: vec![],
            tranches: vec![],
            transactions: vec![],
            fee_records: vec![],
        }
    }

    #[test]
    fn checksum_matches_on_round_trip() {
        let archive = BackupArchive::new(empty_snapshot(), BackupKind::Manual, date(2024, 1, 1)).unwrap();
        archive.verify_checksum().unwrap();
    }

    #[test]
    fn tampered_snapshot_fails_checksum() {
        let mut archive = BackupArchive::new(empty_snapshot(), BackupKind::Manual, date(2024, 1, 1)).unwrap();
        archive.manifest.checksum = "deadbeef".to_string();
        assert!(archive.verify_checksum().is_err());
    }

    #[tokio::test]
    async fn write_then_list_then_read_round_trips() {
        let dir = std::env::temp_dir().join(format!("fund-ledger-test-{}", Uuid::now_v7()));
        let archive = BackupArchive::new(empty_snapshot(), BackupKind::Manual, date(2024, 1, 1)).unwrap();
        write_archive(&dir, &archive).await.unwrap();

        let listed = list_backups(&dir).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, archive.manifest.id);

        let read_back = read_archive(&dir, &archive.manifest.id).await.unwrap();
        assert_eq!(read_back.manifest.checksum, archive.manifest.checksum);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
