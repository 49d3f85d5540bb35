// Heap dump sessions on the owning node: one generation at a time, written raw,
// gzipped on a dedicated thread, then served by offset and disposed.

use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{MonitorError, MonitorResult};
use crate::runtime_probe::linux;

const RAW_EXTENSION: &str = "hprof";
const GZIP_EXTENSION: &str = "hprof.gz";

/// Produces the raw dump file.
pub trait HeapDumper: Send + Sync {
    fn dump(&self, path: &Path) -> std::io::Result<()>;
}

/// Writes the process memory map (/proc/self/smaps) with a small header.
pub struct ProcessMapDumper;

impl HeapDumper for ProcessMapDumper {
    fn dump(&self, path: &Path) -> std::io::Result<()> {
        let mut f = File::create(path)?;
        writeln!(
            f,
            "# {} {} heap dump, pid {}, {}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            std::process::id(),
            chrono::Local::now().to_rfc3339()
        )?;
        match linux::read_process_smaps() {
            Some(maps) => f.write_all(maps.as_bytes())?,
            None => writeln!(f, "# memory map not available on {}", std::env::consts::OS)?,
        }
        f.sync_all()
    }
}

type Slot = Arc<std::sync::Mutex<Option<String>>>;

/// Clears the in-progress slot when the generation thread ends, however it ends.
struct SlotRelease {
    slot: Slot,
    id: String,
}

impl Drop for SlotRelease {
    fn drop(&mut self) {
        let mut slot = self
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.as_deref() == Some(self.id.as_str()) {
            *slot = None;
        }
    }
}

pub struct HeapDumpManager {
    cache_dir: PathBuf,
    dumper: Arc<dyn HeapDumper>,
    in_progress: Slot,
}

impl HeapDumpManager {
    pub fn new(cache_dir: impl Into<PathBuf>, dumper: Arc<dyn HeapDumper>) -> std::io::Result<Self> {
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir)?;
        Ok(Self {
            cache_dir,
            dumper,
            in_progress: Arc::new(std::sync::Mutex::new(None)),
        })
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.in_progress
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Raw and gzip paths for `id`; `None` unless `id` is a UUID.
    fn paths(&self, id: &str) -> Option<(PathBuf, PathBuf)> {
        let id = Uuid::parse_str(id).ok()?.hyphenated().to_string();
        Some(self.artifact_paths(&id))
    }

    fn artifact_paths(&self, id: &str) -> (PathBuf, PathBuf) {
        (
            self.cache_dir.join(format!("{}.{}", id, RAW_EXTENSION)),
            self.cache_dir.join(format!("{}.{}", id, GZIP_EXTENSION)),
        )
    }

    /// Starts a dump and returns its id immediately. Fails while another dump is in progress.
    pub fn create_heap_dump(&self) -> MonitorResult<String> {
        let id = Uuid::new_v4().hyphenated().to_string();
        {
            let mut slot = self.lock_slot();
            if let Some(current) = slot.as_ref() {
                return Err(MonitorError::HeapDumpInProgress(current.clone()));
            }
            *slot = Some(id.clone());
        }

        let (raw, gz) = self.artifact_paths(&id);
        let dumper = self.dumper.clone();
        let release = SlotRelease {
            slot: self.in_progress.clone(),
            id: id.clone(),
        };
        let thread_id = id.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("heap-dump-{}", &id[..8]))
            .spawn(move || {
                let _release = release;
                let started = std::time::Instant::now();
                match write_dump(dumper.as_ref(), &raw, &gz) {
                    Ok(len) => tracing::info!(
                        id = %thread_id,
                        bytes = len,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "heap dump complete"
                    ),
                    Err(e) => {
                        tracing::warn!(error = %e, id = %thread_id, operation = "create_heap_dump", "heap dump failed");
                        remove_if_exists(&raw);
                        remove_if_exists(&gz);
                    }
                }
            });
        // On spawn failure the closure (and its release guard) is dropped, freeing the slot.
        spawned.map_err(MonitorError::Io)?;
        tracing::info!(id = %id, "heap dump started");
        Ok(id)
    }

    pub fn is_heap_dump_complete(&self, id: &str) -> bool {
        self.lock_slot().as_deref() != Some(id)
    }

    /// Id of the dump being generated, if any.
    pub fn in_progress(&self) -> Option<String> {
        self.lock_slot().clone()
    }

    /// Length of the compressed dump, 0 when absent.
    pub fn get_heap_dump_length(&self, id: &str) -> u64 {
        self.paths(id)
            .and_then(|(_, gz)| fs::metadata(gz).ok())
            .map(|m| m.len())
            .unwrap_or(0)
    }

    /// Up to `length` bytes from `offset`; shorter at end of file.
    pub fn get_heap_dump_content(&self, id: &str, offset: u64, length: usize) -> MonitorResult<Vec<u8>> {
        let (_, gz) = self.paths(id).ok_or_else(|| {
            MonitorError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no heap dump {}", id),
            ))
        })?;
        let mut f = File::open(gz)?;
        let remaining = f.metadata()?.len().saturating_sub(offset);
        let remaining = usize::try_from(remaining).unwrap_or(usize::MAX);
        f.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::with_capacity(length.min(remaining));
        f.take(length as u64).read_to_end(&mut buf)?;
        Ok(buf)
    }

    pub fn dispose_heap_dump(&self, id: &str) {
        if let Some((_, gz)) = self.paths(id) {
            remove_if_exists(&gz);
            tracing::debug!(id, "heap dump disposed");
        }
    }

    /// Deletes every dump artifact in the cache directory (shutdown).
    pub fn cleanup(&self) -> std::io::Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.cache_dir)? {
            let path = entry?.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            let is_dump = name.ends_with(&format!(".{}", RAW_EXTENSION))
                || name.ends_with(&format!(".{}", GZIP_EXTENSION));
            if is_dump && fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn write_dump(dumper: &dyn HeapDumper, raw: &Path, gz: &Path) -> std::io::Result<u64> {
    dumper.dump(raw)?;
    let mut reader = BufReader::new(File::open(raw)?);
    let mut encoder = GzEncoder::new(File::create(gz)?, Compression::default());
    std::io::copy(&mut reader, &mut encoder)?;
    encoder.finish()?.sync_all()?;
    fs::remove_file(raw)?;
    Ok(fs::metadata(gz)?.len())
}

fn remove_if_exists(path: &Path) {
    if let Err(e) = fs::remove_file(path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(error = %e, path = %path.display(), "failed to remove heap dump file");
    }
}
