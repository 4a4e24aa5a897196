use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::StoreResult;

/// `objects/info/alternates`.
pub fn alternates_file(objects_dir: &Path) -> PathBuf {
    objects_dir.join("info").join("alternates")
}

/// Objects directories listed in `objects/info/alternates`.
///
/// One path per line, absolute or relative to `objects_dir`. Blank lines
/// and lines starting with `#` are ignored. A missing file lists nothing.
pub fn read_alternates(objects_dir: &Path) -> StoreResult<Vec<PathBuf>> {
    let text = match fs::read_to_string(alternates_file(objects_dir)) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    Ok(parse_alternates(objects_dir, &text))
}

fn parse_alternates(objects_dir: &Path, text: &str) -> Vec<PathBuf> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            let path = Path::new(line);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                objects_dir.join(path)
            }
        })
        .collect()
}

/// Append `alternate` to the alternates file, creating it if needed.
pub fn append_alternate(objects_dir: &Path, alternate: &Path) -> StoreResult<()> {
    let file = alternates_file(objects_dir);
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = OpenOptions::new().create(true).append(true).open(file)?;
    writeln!(out, "{}", alternate.display())?;
    Ok(())
}

/// The identity a database is tracked by while walking alternates: its
/// canonical objects directory, or the path as given when it cannot be
/// resolved.
pub fn database_identity(objects_dir: &Path) -> PathBuf {
    fs::canonicalize(objects_dir).unwrap_or_else(|_| objects_dir.to_path_buf())
}
