use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use log::{info, warn};

use crate::Result;

/// Handles disk I/O for one store file.
///
/// Whole-file updates use an atomic "write-then-rename" strategy: the new
/// content goes to `<path>.tmp`, is flushed and synced, and is then renamed
/// over `<path>`. A reader opening `<path>` at any moment sees either the
/// complete old content or the complete new content.
#[derive(Debug, Clone)]
pub struct Persistence {
    path: PathBuf,
    backup_dir: Option<PathBuf>,
    private: bool,
}

impl Persistence {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            backup_dir: None,
            private: false,
        }
    }

    /// Sets the directory that receives timestamped copies before destructive
    /// replacements.
    pub fn with_backup_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.backup_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Restricts the file and its backups to the owner (`0600` on Unix).
    pub fn private(mut self) -> Self {
        self.private = true;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the whole file. A missing file is `Ok(None)`, not an error.
    pub fn read(&self) -> Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Creates the file with `initial` content if it does not exist yet.
    pub fn ensure_exists(&self, initial: &[u8]) -> Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        self.replace(initial)
    }

    /// Atomically replaces the file with `contents`, creating the parent
    /// directory if needed.
    pub fn replace(&self, contents: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        replace_file(&self.path, contents)?;
        if self.private {
            restrict_permissions(&self.path);
        }
        Ok(())
    }

    /// Appends one already-encoded record in a single write, then flushes.
    /// A file whose last line lacks its terminator (hand edit, restored
    /// backup) gets one first, so the record always starts a new line.
    ///
    /// Callers must hold the same lock they use for [`replace`](Self::replace)
    /// so an append can never interleave with a rewrite.
    pub fn append(&self, record: &[u8]) -> Result<()> {
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)?;
        if ends_mid_line(&mut file)? {
            let mut line = Vec::with_capacity(record.len() + 1);
            line.push(b'\n');
            line.extend_from_slice(record);
            file.write_all(&line)?;
        } else {
            file.write_all(record)?;
        }
        file.flush()?;
        file.sync_data()?;
        if self.private {
            restrict_permissions(&self.path);
        }
        Ok(())
    }

    /// Copies the current file into the backup directory. See
    /// [`backup_before_replace`].
    pub fn backup(&self, label: &str) -> Option<PathBuf> {
        let dir = self.backup_dir.as_ref()?;
        let backup = backup_before_replace(&self.path, dir, label)?;
        if self.private {
            restrict_permissions(&backup);
        }
        Some(backup)
    }
}

fn ends_mid_line(file: &mut File) -> io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

/// Path of the temporary sibling used by [`replace_file`].
pub fn temp_path(path: &Path) -> PathBuf {
    let mut tmp: OsString = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Writes `contents` completely to `<path>.tmp` (flush, sync, close) and
/// returns the temporary path. The target file is not touched.
pub fn write_temp(path: &Path, contents: &[u8]) -> io::Result<PathBuf> {
    let tmp = temp_path(path);
    let mut file = File::create(&tmp)?;
    file.write_all(contents)?;
    file.flush()?;
    file.sync_all()?;
    Ok(tmp)
}

/// Moves a fully written temporary file over `path` in one rename.
pub fn commit_temp(tmp: &Path, path: &Path) -> io::Result<()> {
    fs::rename(tmp, path)
}

/// Atomically replaces `path` with `contents`.
///
/// If writing the temporary file fails the original is left untouched and
/// the error is returned; the temporary file may be left behind.
pub fn replace_file(path: &Path, contents: &[u8]) -> io::Result<()> {
    let tmp = write_temp(path, contents)?;
    commit_temp(&tmp, path)
}

/// Copies `path` to `<backup_dir>/<stem>_<label>_<YYYYmmdd_HHMMSS>.<ext>`.
///
/// Returns the backup path, or `None` when there was nothing to copy or the
/// copy failed. Failures are logged and never block the replacement that
/// follows.
pub fn backup_before_replace(path: &Path, backup_dir: &Path, label: &str) -> Option<PathBuf> {
    if !path.exists() {
        return None;
    }
    let target = match next_backup_path(path, backup_dir, label) {
        Ok(t) => t,
        Err(e) => {
            warn!("Could not prepare backup directory {:?}: {}", backup_dir, e);
            return None;
        }
    };
    match fs::copy(path, &target) {
        Ok(_) => {
            info!("Backed up {:?} to {:?}", path, target);
            Some(target)
        }
        Err(e) => {
            warn!("Backup of {:?} failed: {}", path, e);
            None
        }
    }
}

fn next_backup_path(path: &Path, backup_dir: &Path, label: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(backup_dir)?;
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("data");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("csv");
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let base = if label.is_empty() {
        format!("{}_{}", stem, timestamp)
    } else {
        format!("{}_{}_{}", stem, label, timestamp)
    };

    let mut candidate = backup_dir.join(format!("{}.{}", base, ext));
    let mut n = 1;
    while candidate.exists() {
        candidate = backup_dir.join(format!("{}_{}.{}", base, n, ext));
        n += 1;
    }
    Ok(candidate)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
        warn!("Could not restrict permissions on {:?}: {}", path, e);
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}
