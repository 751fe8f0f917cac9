//! File-backed node store: one JSON file per node.
//!
//! # Responsibility
//! - Persist records atomically (temp file in the same directory + rename).
//! - Keep the previous valid version in `<id>.json.bak` and fall back to it
//!   when the primary file is unreadable or invalid.
//! - Archive deleted records as `archive/<id>_<unix-ts>.json`.
//!
//! # Invariants
//! - Readers never observe a partially written record file.
//! - A `.bak` sibling only ever holds a record that passed validation.
//! - A missing primary is "not found", even when a stale `.bak` remains;
//!   stale backups are cleaned up by `delete`.
//! - Concurrent writers to the same id race last-write-wins; there is no
//!   lock beyond the filesystem's rename atomicity.

use crate::config::StoreConfig;
use crate::error::{StorageCause, StorageError, StorageOperation, StoreResult};
use crate::interrupt::Interrupt;
use crate::model::node::{is_valid_node_id, NodeId};
use crate::repo::node_store::{
    validate_record, validate_record_value, IntegrityReport, NodeRecord, NodeStore,
};
use log::{debug, error, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const RECORD_SUFFIX: &str = ".json";
const BACKUP_SUFFIX: &str = ".json.bak";
const TEMP_PREFIX: &str = ".cognode-";
const TEMP_SUFFIX: &str = ".tmp";

static ARCHIVE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<id>.+)_(?P<ts>\d+)\.json$").expect("valid archive name regex"));

/// One archived copy of a deleted record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedRecord {
    pub node_id: NodeId,
    /// Unix seconds at deletion time.
    pub archived_at: i64,
    pub path: PathBuf,
}

/// Outcome of [`FileNodeStore::sweep_archive`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub removed: usize,
    pub interrupted: bool,
}

enum FileState {
    Missing,
    Invalid(String),
    Valid { record: NodeRecord, raw: Vec<u8> },
}

/// JSON-file node store rooted at [`StoreConfig::data_dir`].
#[derive(Debug, Clone)]
pub struct FileNodeStore {
    config: StoreConfig,
    archive_dir: PathBuf,
}

impl FileNodeStore {
    /// Validates `config` and creates the data and archive directories.
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        config.validate().map_err(|err| {
            StorageError::io(
                None,
                StorageOperation::Open,
                std::io::Error::new(ErrorKind::InvalidInput, err.to_string()),
            )
        })?;
        let archive_dir = config.archive_dir();
        for dir in [&config.data_dir, &archive_dir] {
            fs::create_dir_all(dir).map_err(|err| {
                error!(
                    "event=store_open module=file_store status=error dir={} error={}",
                    dir.display(),
                    err
                );
                StorageError::io(None, StorageOperation::Open, err)
            })?;
        }
        info!(
            "event=store_open module=file_store status=ok data_dir={} backups={}",
            config.data_dir.display(),
            config.keep_backups
        );
        Ok(Self {
            config,
            archive_dir,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Path of the primary record file for `id`.
    pub fn record_path(&self, id: &str) -> PathBuf {
        self.config.data_dir.join(format!("{id}{RECORD_SUFFIX}"))
    }

    /// Path of the backup sibling for `id`.
    pub fn backup_path(&self, id: &str) -> PathBuf {
        self.config.data_dir.join(format!("{id}{BACKUP_SUFFIX}"))
    }

    /// Lists archived copies of `id`, newest first.
    pub fn archived(&self, id: &str) -> StoreResult<Vec<ArchivedRecord>> {
        let mut entries: Vec<ArchivedRecord> = self
            .scan_archive(Some(id))?
            .into_iter()
            .filter(|entry| entry.node_id == id)
            .collect();
        entries.sort_by(|a, b| b.archived_at.cmp(&a.archived_at));
        Ok(entries)
    }

    /// Moves the newest archived copy of `id` back into place.
    ///
    /// Returns `Ok(None)` when no valid archived copy exists.
    ///
    /// # Errors
    /// - `Conflict` when a live record for `id` already exists.
    pub fn restore_archived(&self, id: &str) -> StoreResult<Option<NodeRecord>> {
        let primary = self.record_path(id);
        if primary.exists() {
            return Err(StorageError::new(
                Some(id),
                StorageOperation::Restore,
                StorageCause::Conflict("a live record already exists".to_string()),
            ));
        }

        for entry in self.archived(id)? {
            match read_state(&entry.path, id) {
                FileState::Valid { record, raw } => {
                    self.write_atomic(&primary, &raw, id, StorageOperation::Restore)?;
                    remove_if_exists(&entry.path)
                        .map_err(|err| StorageError::io(Some(id), StorageOperation::Restore, err))?;
                    info!(
                        "event=node_restore module=file_store status=ok node_id={} archived_at={}",
                        id, entry.archived_at
                    );
                    return Ok(Some(record));
                }
                FileState::Invalid(reason) => warn!(
                    "event=node_restore module=file_store status=skip node_id={} path={} reason={}",
                    id,
                    entry.path.display(),
                    reason
                ),
                FileState::Missing => {}
            }
        }
        Ok(None)
    }

    /// Deletes archived copies older than `older_than`.
    ///
    /// Stops between files when `interrupt` is raised.
    pub fn sweep_archive(
        &self,
        older_than: Duration,
        interrupt: &Interrupt,
    ) -> StoreResult<SweepReport> {
        let started_at = Instant::now();
        let age = i64::try_from(older_than.as_secs()).unwrap_or(i64::MAX);
        let cutoff = unix_now().saturating_sub(age);
        let mut report = SweepReport::default();

        for entry in self.scan_archive(None)? {
            if interrupt.is_raised() {
                report.interrupted = true;
                break;
            }
            report.examined += 1;
            if entry.archived_at >= cutoff {
                continue;
            }
            remove_if_exists(&entry.path).map_err(|err| {
                StorageError::io(Some(&entry.node_id), StorageOperation::Archive, err)
            })?;
            report.removed += 1;
        }

        info!(
            "event=archive_sweep module=file_store status=ok examined={} removed={} interrupted={} duration_ms={}",
            report.examined,
            report.removed,
            report.interrupted,
            started_at.elapsed().as_millis()
        );
        Ok(report)
    }

    fn scan_archive(&self, id_hint: Option<&str>) -> StoreResult<Vec<ArchivedRecord>> {
        let entries = match fs::read_dir(&self.archive_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StorageError::io(id_hint, StorageOperation::List, err)),
        };

        let mut result = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| StorageError::io(id_hint, StorageOperation::List, err))?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some(captures) = ARCHIVE_NAME_RE.captures(name) else {
                continue;
            };
            let Ok(archived_at) = captures["ts"].parse::<i64>() else {
                continue;
            };
            result.push(ArchivedRecord {
                node_id: captures["id"].to_string(),
                archived_at,
                path: entry.path(),
            });
        }
        Ok(result)
    }

    fn archive_target(&self, id: &str) -> PathBuf {
        let mut timestamp = unix_now();
        loop {
            let candidate = self.archive_dir.join(format!("{id}_{timestamp}{RECORD_SUFFIX}"));
            if !candidate.exists() {
                return candidate;
            }
            timestamp += 1;
        }
    }

    fn write_atomic(
        &self,
        target: &Path,
        bytes: &[u8],
        id: &str,
        operation: StorageOperation,
    ) -> StoreResult<()> {
        let io_err = |err: std::io::Error| StorageError::io(Some(id), operation, err);
        let mut temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(TEMP_SUFFIX)
            .tempfile_in(&self.config.data_dir)
            .map_err(io_err)?;
        temp.write_all(bytes).map_err(io_err)?;
        temp.flush().map_err(io_err)?;
        if self.config.sync_writes {
            temp.as_file().sync_all().map_err(io_err)?;
        }
        temp.persist(target).map_err(|err| io_err(err.error))?;
        Ok(())
    }

    fn restore_from_backup(
        &self,
        id: &str,
        raw: &[u8],
        operation: StorageOperation,
    ) -> StoreResult<()> {
        self.write_atomic(&self.record_path(id), raw, id, operation)
    }
}

impl NodeStore for FileNodeStore {
    fn describe(&self) -> String {
        format!("file:{}", self.config.data_dir.display())
    }

    fn store(&self, record: &NodeRecord) -> StoreResult<()> {
        let started_at = Instant::now();
        validate_record(record, None)
            .map_err(|reason| StorageError::invalid_record(None, StorageOperation::Store, reason))?;
        let id = record
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let bytes = serde_json::to_vec_pretty(record)
            .map_err(|err| StorageError::json(Some(&id), StorageOperation::Store, err))?;

        let primary = self.record_path(&id);
        if self.config.keep_backups {
            match read_state(&primary, &id) {
                FileState::Valid { raw, .. } => {
                    self.write_atomic(&self.backup_path(&id), &raw, &id, StorageOperation::Store)?;
                }
                FileState::Invalid(reason) => warn!(
                    "event=node_backup module=file_store status=skip node_id={} reason={}",
                    id, reason
                ),
                FileState::Missing => {}
            }
        }

        if let Err(err) = self.write_atomic(&primary, &bytes, &id, StorageOperation::Store) {
            error!(
                "event=node_store module=file_store status=error node_id={} duration_ms={} error={}",
                id,
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err);
        }
        debug!(
            "event=node_store module=file_store status=ok node_id={} bytes={} duration_ms={}",
            id,
            bytes.len(),
            started_at.elapsed().as_millis()
        );
        Ok(())
    }

    fn get(&self, id: &str) -> StoreResult<Option<NodeRecord>> {
        if !is_valid_node_id(id) {
            return Ok(None);
        }
        let reason = match read_state(&self.record_path(id), id) {
            FileState::Valid { record, .. } => return Ok(Some(record)),
            FileState::Missing => return Ok(None),
            FileState::Invalid(reason) => reason,
        };

        match read_state(&self.backup_path(id), id) {
            FileState::Valid { record, raw } => {
                warn!(
                    "event=node_recover module=file_store status=start node_id={} reason={}",
                    id, reason
                );
                self.restore_from_backup(id, &raw, StorageOperation::Get)?;
                info!(
                    "event=node_recover module=file_store status=ok node_id={}",
                    id
                );
                Ok(Some(record))
            }
            FileState::Invalid(backup_reason) => {
                error!(
                    "event=node_get module=file_store status=error node_id={} error_code=corrupted reason={} backup_reason={}",
                    id, reason, backup_reason
                );
                Ok(None)
            }
            FileState::Missing => {
                error!(
                    "event=node_get module=file_store status=error node_id={} error_code=corrupted_no_backup reason={}",
                    id, reason
                );
                Ok(None)
            }
        }
    }

    fn delete(&self, id: &str) -> StoreResult<bool> {
        if !is_valid_node_id(id) {
            return Ok(false);
        }
        let primary = self.record_path(id);
        let backup = self.backup_path(id);

        if primary.exists() {
            let target = self.archive_target(id);
            fs::rename(&primary, &target)
                .map_err(|err| StorageError::io(Some(id), StorageOperation::Archive, err))?;
            remove_if_exists(&backup)
                .map_err(|err| StorageError::io(Some(id), StorageOperation::Delete, err))?;
            info!(
                "event=node_delete module=file_store status=ok node_id={} archive={}",
                id,
                target.display()
            );
            return Ok(true);
        }

        if backup.exists() {
            remove_if_exists(&backup)
                .map_err(|err| StorageError::io(Some(id), StorageOperation::Delete, err))?;
            info!(
                "event=node_delete module=file_store status=ok node_id={} mode=backup_only",
                id
            );
            return Ok(true);
        }

        Ok(false)
    }

    fn list_ids(&self) -> StoreResult<Vec<NodeId>> {
        let entries = fs::read_dir(&self.config.data_dir)
            .map_err(|err| StorageError::io(None, StorageOperation::List, err))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| StorageError::io(None, StorageOperation::List, err))?;
            let is_file = entry
                .file_type()
                .map_err(|err| StorageError::io(None, StorageOperation::List, err))?
                .is_file();
            if !is_file {
                continue;
            }
            let file_name = entry.file_name();
            let Some(stem) = file_name
                .to_str()
                .and_then(|name| name.strip_suffix(RECORD_SUFFIX))
            else {
                continue;
            };
            if is_valid_node_id(stem) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn check_integrity(&self, repair: bool) -> StoreResult<IntegrityReport> {
        let started_at = Instant::now();
        let mut report = IntegrityReport::default();

        for id in self.list_ids()? {
            let reason = match read_state(&self.record_path(&id), &id) {
                FileState::Valid { .. } | FileState::Missing => {
                    report.checked += 1;
                    continue;
                }
                FileState::Invalid(reason) => reason,
            };
            report.checked += 1;
            report.corrupted += 1;

            if repair {
                if let FileState::Valid { raw, .. } = read_state(&self.backup_path(&id), &id) {
                    self.restore_from_backup(&id, &raw, StorageOperation::CheckIntegrity)?;
                    report.repaired += 1;
                    info!(
                        "event=integrity_repair module=file_store status=ok node_id={} reason={}",
                        id, reason
                    );
                    continue;
                }
            }
            warn!(
                "event=integrity_check module=file_store status=corrupted node_id={} repair={} reason={}",
                id, repair, reason
            );
            report.unrepaired_ids.push(id);
        }

        info!(
            "event=integrity_check module=file_store status=ok checked={} corrupted={} repaired={} duration_ms={}",
            report.checked,
            report.corrupted,
            report.repaired,
            started_at.elapsed().as_millis()
        );
        Ok(report)
    }
}

fn read_state(path: &Path, expected_id: &str) -> FileState {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return FileState::Missing,
        Err(err) => return FileState::Invalid(format!("unreadable: {err}")),
    };
    let value: Value = match serde_json::from_slice(&raw) {
        Ok(value) => value,
        Err(err) => return FileState::Invalid(format!("malformed json: {err}")),
    };
    match validate_record_value(&value, Some(expected_id)) {
        Ok(record) => FileState::Valid {
            record: record.clone(),
            raw,
        },
        Err(reason) => FileState::Invalid(reason),
    }
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
