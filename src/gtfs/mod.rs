//! Static GTFS tables: route shapes and the agency/route pickers.

pub mod agencies;
pub mod shapes;
pub mod tables;

use std::fs::File;
use std::path::{Path, PathBuf};

/// Locations of the static tables this service reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticFiles {
    pub routes: PathBuf,
    pub trips: PathBuf,
    pub shapes: PathBuf,
    /// Optional; a missing agency table only loses display names.
    pub agency: PathBuf,
}

#[cfg(test)]
impl StaticFiles {
    /// Standard GTFS file names inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        StaticFiles {
            routes: dir.join("routes.txt"),
            trips: dir.join("trips.txt"),
            shapes: dir.join("shapes.txt"),
            agency: dir.join("agency.txt"),
        }
    }
}

/// Errors opening or reading a structurally required table.
///
/// Row-level problems never surface here; they are skipped during the scan.
#[derive(Debug)]
pub enum StaticDataError {
    Missing(PathBuf),
    Io(PathBuf, String),
    Csv(PathBuf, String),
}

impl StaticDataError {
    pub(crate) fn csv(path: &Path, err: csv::Error) -> Self {
        StaticDataError::Csv(path.to_path_buf(), err.to_string())
    }

    /// File name only, safe to show to API callers.
    pub fn file_name(&self) -> String {
        let path = match self {
            StaticDataError::Missing(p) | StaticDataError::Io(p, _) | StaticDataError::Csv(p, _) => p,
        };
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string())
    }
}

impl std::fmt::Display for StaticDataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StaticDataError::Missing(path) => write!(f, "{} not found", path.display()),
            StaticDataError::Io(path, msg) => {
                write!(f, "failed to open {}: {}", path.display(), msg)
            }
            StaticDataError::Csv(path, msg) => {
                write!(f, "failed to read {}: {}", path.display(), msg)
            }
        }
    }
}

impl std::error::Error for StaticDataError {}

/// Open a table, distinguishing "not there" from other I/O failures.
pub(crate) fn open_table(path: &Path) -> Result<File, StaticDataError> {
    File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => StaticDataError::Missing(path.to_path_buf()),
        _ => StaticDataError::Io(path.to_path_buf(), e.to_string()),
    })
}
