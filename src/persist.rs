use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::codec;
use crate::merge::{self, MergeSummary};
use crate::record::ContactRecord;
use crate::store::dedup_last_wins;

const DATASET_FILE: &str = "agents.csv";

/// Where a run writes its files.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn dataset(&self) -> PathBuf {
        self.root.join(DATASET_FILE)
    }

    pub fn instances_dir(&self) -> PathBuf {
        self.root.join("instances")
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.root.join("checkpoints")
    }

    fn instance(&self, stamp: i64) -> PathBuf {
        self.instances_dir().join(format!("{}.csv", stamp))
    }

    fn checkpoint(&self, stamp: i64) -> PathBuf {
        self.checkpoints_dir().join(format!("agents-{}.csv", stamp))
    }
}

/// Files written by one persist call.
#[derive(Debug)]
pub struct Written {
    pub instance: Option<PathBuf>,
    pub checkpoint: PathBuf,
    pub summary: MergeSummary,
}

pub struct Persister {
    layout: OutputLayout,
}

impl Persister {
    pub fn new(layout: OutputLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Persist a run batch: instance snapshot, then merged checkpoint, then
    /// the dataset itself.
    pub fn persist_run(&self, batch: Vec<ContactRecord>, stamp: i64) -> Result<Written> {
        let batch = admissible(batch);

        let bytes = codec::encode(&batch)?;
        let instance = write_new(|s| self.layout.instance(s), stamp, &bytes)?;
        info!("Wrote instance snapshot {} ({} agents)", instance.display(), batch.len());

        let mut written = self.merge_into_dataset(batch, stamp)?;
        written.instance = Some(instance);
        Ok(written)
    }

    /// Merge records into the dataset without writing an instance snapshot.
    pub fn merge_into_dataset(&self, batch: Vec<ContactRecord>, stamp: i64) -> Result<Written> {
        let batch = admissible(batch);
        let existing = self.load_dataset()?;
        match &existing {
            Some(rows) => info!("Found dataset with {} agents, updating", rows.len()),
            None => warn!("{} not found, initialising", self.layout.dataset().display()),
        }

        let (data, summary) = merge::merge(existing, batch);
        let bytes = codec::encode(&data)?;

        let checkpoint = write_new(|s| self.layout.checkpoint(s), stamp, &bytes)?;
        info!("Wrote checkpoint {}", checkpoint.display());

        replace_atomically(&self.layout.dataset(), &bytes)?;
        info!("Replaced {} ({} agents)", self.layout.dataset().display(), data.len());

        Ok(Written {
            instance: None,
            checkpoint,
            summary,
        })
    }

    pub fn load_dataset(&self) -> Result<Option<Vec<ContactRecord>>> {
        let path = self.layout.dataset();
        match fs::read(&path) {
            Ok(bytes) => codec::decode(&bytes)
                .with_context(|| format!("Failed to decode {}", path.display()))
                .map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }
}

fn admissible(batch: Vec<ContactRecord>) -> Vec<ContactRecord> {
    dedup_last_wins(batch.into_iter().filter(ContactRecord::has_email))
}

/// Create the file named by `name_for(stamp)` without ever replacing an
/// existing one. On a name clash the stamp is bumped until a free name turns up.
fn write_new(name_for: impl Fn(i64) -> PathBuf, mut stamp: i64, bytes: &[u8]) -> Result<PathBuf> {
    let mut path = name_for(stamp);
    let dir = path.parent().context("Snapshot path has no parent")?;
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    loop {
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(bytes)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                file.sync_all()?;
                return Ok(path);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                stamp += 1;
                path = name_for(stamp);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to create {}", path.display()))
            }
        }
    }
}

/// Write to a sibling temp file, then rename over `path`.
fn replace_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let tmp = path.with_extension("csv.tmp");
    {
        let mut file = fs::File::create(&tmp)
            .with_context(|| format!("Failed to create {}", tmp.display()))?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move {} into place", tmp.display()))?;
    Ok(())
}

/// One-shot guard around the final flush. The normal, fatal-error and
/// signal paths all go through it; only the first caller persists.
#[derive(Debug, Default)]
pub struct FlushLatch {
    fired: AtomicBool,
}

impl FlushLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `flush` if nobody has yet. Returns `None` on every later call.
    pub fn flush_once<T>(&self, flush: impl FnOnce() -> Result<T>) -> Option<Result<T>> {
        if self.fired.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(flush())
    }
}
