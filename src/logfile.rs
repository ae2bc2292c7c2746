use log::warn;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Append-only text sink. Engine reader threads and the scheduler thread
/// write concurrently, so every append goes through the sink's own mutex.
/// Write failures are logged and otherwise ignored; persistence problems
/// must never take a game down.
#[derive(Debug)]
pub struct TextLog {
    path: PathBuf,
    show_time: bool,
    file: Mutex<File>,
}

impl TextLog {
    pub fn open(path: &Path, show_time: bool) -> std::io::Result<Arc<TextLog>> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Arc::new(TextLog {
            path: path.to_path_buf(),
            show_time,
            file: Mutex::new(file),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, line: &str) {
        let mut file = match self.file.lock() {
            Ok(f) => f,
            Err(poisoned) => poisoned.into_inner(),
        };
        let r = if self.show_time {
            let stamp = chrono::Local::now().format("%H:%M:%S");
            writeln!(file, "{stamp} {line}")
        } else {
            writeln!(file, "{line}")
        };
        if let Err(e) = r {
            warn!("cannot append to {}: {e}", self.path.display());
        }
    }

    /// Appends a pre-formatted block verbatim (PGN games bring their own
    /// layout and trailing blank line).
    pub fn append_raw(&self, text: &str) {
        let mut file = match self.file.lock() {
            Ok(f) => f,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = file.write_all(text.as_bytes()) {
            warn!("cannot append to {}: {e}", self.path.display());
        }
    }
}
