//! Size-capped log file writer with a fixed archive depth.
//!
//! The active file is `<stem>.log`; on rollover it becomes `<stem>.1.log`,
//! pushing older archives up one slot. `keep` counts the active file, so
//! `keep = 1` means rotate-in-place with no history.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;

/// Cloneable handle given to the tracing file layer. All clones append to
/// the same file; writes are serialized through the shared mutex.
#[derive(Clone)]
pub(crate) struct RollingWriter {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    dir: PathBuf,
    stem: String,
    keep: usize,
    cap: u64,
    file: File,
    written: u64,
}

impl RollingWriter {
    pub(crate) fn new(dir: PathBuf, name: &str, keep: usize, cap: u64) -> Result<Self> {
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
        let stem = file_stem(name);
        let path = dir.join(format!("{stem}.log"));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let written = file.metadata().map(|meta| meta.len()).unwrap_or(0);
        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                dir,
                stem,
                keep: keep.max(1),
                cap,
                file,
                written,
            })),
        })
    }
}

impl Inner {
    fn active_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.stem))
    }

    fn archive_path(&self, slot: usize) -> PathBuf {
        self.dir.join(format!("{}.{slot}.log", self.stem))
    }

    /// Shift the archive chain up one slot and start a fresh active file.
    /// The rename into the last slot overwrites the oldest archive.
    fn roll(&mut self) -> io::Result<()> {
        self.file.flush()?;
        if self.keep == 1 {
            self.file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(self.active_path())?;
        } else {
            for slot in (1..self.keep).rev() {
                let from = if slot == 1 {
                    self.active_path()
                } else {
                    self.archive_path(slot - 1)
                };
                if from.exists() {
                    fs::rename(&from, self.archive_path(slot))?;
                }
            }
            self.file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.active_path())?;
        }
        self.written = 0;
        Ok(())
    }
}

impl Write for RollingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "rolling writer poisoned"))?;
        if inner.written + buf.len() as u64 > inner.cap {
            inner.roll()?;
        }
        let bytes = inner.file.write(buf)?;
        inner.written += bytes as u64;
        Ok(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "rolling writer poisoned"))?;
        inner.file.flush()
    }
}

impl<'a> MakeWriter<'a> for RollingWriter {
    type Writer = RollingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Filename stem derived from the app name; anything path-hostile becomes
/// a dash.
fn file_stem(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "app".to_string()
    } else {
        cleaned
    }
}
