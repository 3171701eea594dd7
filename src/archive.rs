//! The reconciler: orchestrates scanning, hashing, encryption, and index
//! maintenance into `backup`, `restore`, `cleanup_soft`, `cleanup_hard`, and
//! `info`.

use crate::blob_store::{BlobStore, BlobStoreError};
use crate::cipher::{self, CipherError};
use crate::config::{BackupConfig, ConfigError};
use crate::hasher::{self, HashError};
use crate::index::{
    ArchiveEntry, ArchiveFilePointer, ArchiveIndex, ArchiveLogEvent, IndexError, LogEventKind,
};
use crate::pipeline::Pipeline;
use crate::scanner::{self, FileInfo, ScanError};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Hash(#[from] HashError),
    #[error(transparent)]
    Cipher(#[from] CipherError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    BlobStore(#[from] BlobStoreError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a backup run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BackupStats {
    pub n_new: usize,
    pub n_removed: usize,
    pub n_path_change: usize,
    pub n_errs: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RestoreStats {
    pub n_restored: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupStats {
    pub entries_pruned: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoReport {
    pub n_active: usize,
    pub n_history: usize,
    pub restore_size: u64,
    pub archive_size_active: u64,
    pub archive_size_history: u64,
}

/// User-confirmation port for destructive cleanup actions, injectable so
/// the reconciler is testable without a real terminal.
pub trait Confirm {
    fn confirm(&self, prompt: &str) -> bool;
}

/// Prompts on stdin, proceeding only on an exact `y` response.
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&self, prompt: &str) -> bool {
        eprint!("{prompt} y/n: ");
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).is_err() {
            return false;
        }
        line.trim() == "y"
    }
}

pub struct Archive {
    config: BackupConfig,
    index: ArchiveIndex,
    blob_store: BlobStore,
    pipeline: Pipeline,
    key: String,
}

impl Archive {
    /// Open (or initialize) the archive described by `config`: create the
    /// table/blob directories if missing and load the existing index.
    pub fn open(config: BackupConfig) -> Result<Self, ArchiveError> {
        fs::create_dir_all(&config.table_dir)?;
        fs::create_dir_all(&config.file_dir)?;
        let index = ArchiveIndex::load(&config.table_dir)?;
        let blob_store = BlobStore::new(config.file_dir.clone());
        let pipeline = Pipeline::with_defaults();
        let key = config.load_key()?;
        Ok(Self {
            config,
            index,
            blob_store,
            pipeline,
            key,
        })
    }

    pub fn info(&self) -> InfoReport {
        let restore_size = self
            .index
            .active
            .values()
            .flat_map(|e| e.fptrs.iter())
            .map(|f| f.size)
            .sum();
        let archive_size_active = self.index.active.values().map(|e| e.arch_size).sum();
        let archive_size_history = self.index.history.values().map(|e| e.arch_size).sum();
        InfoReport {
            n_active: self.index.active.len(),
            n_history: self.index.history.len(),
            restore_size,
            archive_size_active,
            archive_size_history,
        }
    }

    /// Run the full backup reconciliation described in SPEC_FULL.md §4.7:
    /// scan, fill in missing hashes, sweep `active` against what was found,
    /// encrypt and store anything new, then persist.
    pub fn backup(&mut self, full: bool) -> Result<BackupStats, ArchiveError> {
        let mut stats = BackupStats::default();
        log::info!("scanning {} root(s)", self.config.backup_roots.len());
        let mut infos = scanner::scan(&self.config.backup_roots, full)?;

        if !full {
            self.fill_hashes(&mut infos)?;
        }

        let mut scanned_by_cs: HashMap<String, Vec<FileInfo>> = HashMap::new();
        for info in infos {
            let cs = info
                .checksum
                .clone()
                .expect("checksum must be populated before grouping");
            scanned_by_cs.entry(cs).or_default().push(info);
        }

        self.sweep_active(&scanned_by_cs, &mut stats)?;
        let to_store = self.collect_new_blobs(&scanned_by_cs, &mut stats)?;
        self.store_new_blobs(to_store)?;

        self.index.persist(&self.config.table_dir)?;
        log::info!(
            "backup complete: {} new, {} removed, {} path changes, {} errors",
            stats.n_new,
            stats.n_removed,
            stats.n_path_change,
            stats.n_errs
        );
        Ok(stats)
    }

    fn fill_hashes(&self, infos: &mut [FileInfo]) -> Result<(), ArchiveError> {
        let mut need_hash: Vec<usize> = Vec::new();
        for i in 0..infos.len() {
            if let Some(cs) = self.index.ino_index.get(&infos[i].inode).cloned() {
                if let Some(entry) = self.index.active.get(&cs) {
                    let norm = infos[i].normalized_path();
                    let matched = entry.fptrs.iter().any(|fp| {
                        fp.path == norm
                            && fp.ino == infos[i].inode
                            && fp.mtime == infos[i].mtime
                            && fp.size == infos[i].size
                    });
                    if matched {
                        infos[i].checksum = Some(cs);
                        continue;
                    }
                }
            }
            need_hash.push(i);
        }

        let paths: Vec<PathBuf> = need_hash.iter().map(|&i| infos[i].path.clone()).collect();
        let hashed = self.pipeline.run(paths, |p| hasher::hash_file(&p))?;
        for (slot, digest) in need_hash.into_iter().zip(hashed.into_iter()) {
            infos[slot].checksum = Some(digest);
        }
        Ok(())
    }

    fn sweep_active(
        &mut self,
        scanned_by_cs: &HashMap<String, Vec<FileInfo>>,
        stats: &mut BackupStats,
    ) -> Result<(), ArchiveError> {
        let active_checksums: Vec<String> = self.index.active.keys().cloned().collect();
        for cs in active_checksums {
            match scanned_by_cs.get(&cs) {
                None => {
                    if let Some(entry) = self.index.active.get_mut(&cs) {
                        let gone_paths: Vec<String> =
                            entry.fptrs.iter().map(|f| f.path.clone()).collect();
                        for path in gone_paths {
                            entry
                                .log
                                .push(ArchiveLogEvent::new(LogEventKind::Removed, Some(path)));
                        }
                    }
                    self.index.retire_to_history(&cs);
                    if self.config.hard_remove {
                        self.blob_store.remove(&cs)?;
                    }
                    stats.n_removed += 1;
                }
                Some(scanned) => {
                    let current_paths: HashSet<String> = self
                        .index
                        .active
                        .get(&cs)
                        .map(|e| e.fptrs.iter().map(|f| f.path.clone()).collect())
                        .unwrap_or_default();
                    let scanned_paths: HashSet<String> =
                        scanned.iter().map(|f| f.normalized_path()).collect();
                    if current_paths == scanned_paths {
                        continue;
                    }
                    let entry = self
                        .index
                        .active
                        .get_mut(&cs)
                        .expect("checksum known to be active");
                    for path in scanned_paths.difference(&current_paths) {
                        entry
                            .log
                            .push(ArchiveLogEvent::new(LogEventKind::Added, Some(path.clone())));
                    }
                    for path in current_paths.difference(&scanned_paths) {
                        entry.log.push(ArchiveLogEvent::new(
                            LogEventKind::Removed,
                            Some(path.clone()),
                        ));
                    }
                    entry.fptrs = scanned
                        .iter()
                        .map(|f| ArchiveFilePointer {
                            path: f.normalized_path(),
                            ino: f.inode,
                            mtime: f.mtime,
                            size: f.size,
                        })
                        .collect();
                    stats.n_path_change += 1;
                }
            }
        }
        self.index.rebuild_ino_index();
        Ok(())
    }

    fn collect_new_blobs(
        &mut self,
        scanned_by_cs: &HashMap<String, Vec<FileInfo>>,
        stats: &mut BackupStats,
    ) -> Result<Vec<(PathBuf, PathBuf, ArchiveEntry)>, ArchiveError> {
        let mut to_store = Vec::new();
        for (cs, infos) in scanned_by_cs {
            let needs_store = match self.index.active.get(cs) {
                None => true,
                Some(entry) => {
                    let ok = self.blob_store.exists_with_size(cs, entry.arch_size);
                    if !ok {
                        log::warn!("blob for {cs} missing or size mismatch, re-encrypting");
                        stats.n_errs += 1;
                    }
                    !ok
                }
            };
            if !needs_store {
                continue;
            }

            let mut entry = ArchiveEntry::from_checksum(cs.clone());
            for info in infos {
                let path = info.normalized_path();
                entry.fptrs.push(ArchiveFilePointer {
                    path: path.clone(),
                    ino: info.inode,
                    mtime: info.mtime,
                    size: info.size,
                });
                entry
                    .log
                    .push(ArchiveLogEvent::new(LogEventKind::Added, Some(path)));
            }
            stats.n_new += 1;
            let src = infos[0].path.clone();
            let dst = self.blob_store.ensure_shard(cs)?;
            to_store.push((src, dst, entry));
        }
        Ok(to_store)
    }

    fn store_new_blobs(
        &mut self,
        to_store: Vec<(PathBuf, PathBuf, ArchiveEntry)>,
    ) -> Result<(), ArchiveError> {
        let key = self.key.clone();
        let chunk_size = cipher::DEFAULT_CHUNK_SIZE;
        let jobs: Vec<(PathBuf, PathBuf)> =
            to_store.iter().map(|(s, d, _)| (s.clone(), d.clone())).collect();
        self.pipeline.run(jobs, move |(src, dst)| -> Result<(), ArchiveError> {
            let src_file = File::open(&src)?;
            let dst_file = File::create(&dst)?;
            cipher::store_file(src_file, dst_file, &key, chunk_size)?;
            Ok(())
        })?;

        for (_, dst, mut entry) in to_store {
            entry.arch_size = fs::metadata(&dst)?.len();
            self.index.put_active(entry);
        }
        Ok(())
    }

    /// Restore every active entry to `config.restore_dir`. Destination
    /// paths are the absolute source path with any drive-letter colon
    /// rewritten to `_`, joined under the restore root.
    pub fn restore(&self) -> Result<RestoreStats, ArchiveError> {
        let key = self.key.clone();
        let base = self.config.restore_dir.clone();
        let mut jobs: Vec<(PathBuf, PathBuf)> = Vec::new();
        for entry in self.index.active.values() {
            let blob_path = self.blob_store.archive_path(&entry.checksum)?;
            for fptr in &entry.fptrs {
                jobs.push((blob_path.clone(), restore_destination(&base, &fptr.path)));
            }
        }
        let n = jobs.len();
        self.pipeline.run(jobs, move |(src, dst)| -> Result<(), ArchiveError> {
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent)?;
            }
            let src_file = File::open(&src)?;
            let dst_file = File::create(&dst)?;
            cipher::restore_file(src_file, dst_file, &key)?;
            Ok(())
        })?;
        Ok(RestoreStats { n_restored: n })
    }

    /// Prune history to at most one retained entry per path per calendar
    /// year (keyed by the year of that path's most recent ADDED event).
    pub fn cleanup_soft<C: Confirm>(&mut self, confirm: &C) -> Result<CleanupStats, ArchiveError> {
        if !confirm.confirm("This will prune old history entries, keeping at most one per path per year. Continue?") {
            return Ok(CleanupStats::default());
        }

        struct Occurrence {
            checksum: String,
            path: String,
            added_ts: String,
            year: i32,
        }
        let mut occurrences: Vec<Occurrence> = Vec::new();
        for (cs, entry) in &self.index.history {
            let mut last_added: HashMap<String, String> = HashMap::new();
            for ev in &entry.log {
                match (&ev.event, &ev.path) {
                    (LogEventKind::Added, Some(p)) => {
                        last_added.insert(p.clone(), ev.timestamp.clone());
                    }
                    (LogEventKind::Removed, Some(p)) => {
                        if let Some(added_ts) = last_added.get(p) {
                            occurrences.push(Occurrence {
                                checksum: cs.clone(),
                                path: p.clone(),
                                added_ts: added_ts.clone(),
                                year: parse_year(added_ts),
                            });
                        }
                    }
                    _ => {}
                }
            }
        }

        let mut best: HashMap<(String, i32), &Occurrence> = HashMap::new();
        for occ in &occurrences {
            let key = (occ.path.clone(), occ.year);
            let replace = match best.get(&key) {
                Some(existing) => occ.added_ts > existing.added_ts,
                None => true,
            };
            if replace {
                best.insert(key, occ);
            }
        }
        let keep: HashSet<(String, String, i32)> = best
            .values()
            .map(|o| (o.checksum.clone(), o.path.clone(), o.year))
            .collect();

        let checksums: Vec<String> = self.index.history.keys().cloned().collect();
        let mut pruned = 0usize;
        for cs in checksums {
            let mut drop_entry = false;
            if let Some(entry) = self.index.history.get_mut(&cs) {
                let mut last_added: HashMap<String, String> = HashMap::new();
                let mut drop_paths: HashSet<String> = HashSet::new();
                for ev in &entry.log {
                    match (&ev.event, &ev.path) {
                        (LogEventKind::Added, Some(p)) => {
                            last_added.insert(p.clone(), ev.timestamp.clone());
                        }
                        (LogEventKind::Removed, Some(p)) => {
                            let year = last_added.get(p).map(|t| parse_year(t)).unwrap_or(0);
                            if !keep.contains(&(cs.clone(), p.clone(), year)) {
                                drop_paths.insert(p.clone());
                            }
                        }
                        _ => {}
                    }
                }
                entry.log.retain(|ev| match &ev.path {
                    Some(p) => !drop_paths.contains(p),
                    None => true,
                });
                if entry.log.is_empty() {
                    drop_entry = true;
                }
            }
            if drop_entry {
                self.blob_store.remove(&cs)?;
                self.index.history.remove(&cs);
                pruned += 1;
            }
        }

        self.index.persist(&self.config.table_dir)?;
        Ok(CleanupStats {
            entries_pruned: pruned,
        })
    }

    /// Delete every history entry and its blob. Active state is untouched.
    pub fn cleanup_hard<C: Confirm>(&mut self, confirm: &C) -> Result<CleanupStats, ArchiveError> {
        if !confirm.confirm("This will permanently delete ALL history entries and blobs. Continue?")
        {
            return Ok(CleanupStats::default());
        }
        let checksums: Vec<String> = self.index.history.keys().cloned().collect();
        for cs in &checksums {
            self.blob_store.remove(cs)?;
        }
        self.index.history.clear();
        self.index.persist(&self.config.table_dir)?;
        Ok(CleanupStats {
            entries_pruned: checksums.len(),
        })
    }
}

fn restore_destination(base: &Path, fptr_path: &str) -> PathBuf {
    let rewritten = fptr_path.replace(':', "_");
    let trimmed = rewritten.trim_start_matches('/');
    base.join(trimmed)
}

fn parse_year(rfc3339: &str) -> i32 {
    chrono::DateTime::parse_from_rfc3339(rfc3339)
        .map(|dt| dt.format("%Y").to_string().parse().unwrap_or(0))
        .unwrap_or(0)
}
