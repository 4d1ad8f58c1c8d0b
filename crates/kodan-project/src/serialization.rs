//! Project document serialization.
//!
//! The document is pretty-printed JSON (2-space indent, fields in declaration
//! order) and is replaced atomically: the new contents are written to a
//! sibling temp file which is then renamed over the original.

use kodan_core::{KodanError, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::project::Project;

/// Serialize a project to JSON bytes.
pub fn to_json(project: &Project) -> Result<Vec<u8>> {
    let mut data = serde_json::to_vec_pretty(project)
        .map_err(|e| KodanError::Parse(format!("Failed to serialize project: {}", e)))?;
    data.push(b'\n');
    Ok(data)
}

/// Deserialize a project from JSON bytes.
pub fn from_json(data: &[u8]) -> Result<Project> {
    let raw: serde_json::Value = serde_json::from_slice(data)
        .map_err(|e| KodanError::Parse(format!("Invalid JSON: {}", e)))?;

    if !raw.is_object() {
        return Err(KodanError::Parse(
            "Project document must be a JSON object".to_string(),
        ));
    }

    serde_json::from_value(raw)
        .map_err(|e| KodanError::Parse(format!("Failed to parse project: {}", e)))
}

/// Load a project document from disk.
pub fn load_from_file(path: &Path) -> Result<Project> {
    let data = fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            KodanError::NotFound(format!("Project file not found: {}", path.display()))
        } else {
            KodanError::Io(e)
        }
    })?;
    from_json(&data)
}

/// Save a project document, replacing any existing file atomically.
pub fn save_to_file(path: &Path, project: &Project) -> Result<()> {
    let data = to_json(project)?;
    let tmp = temp_path(path);

    let write = || -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&data)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    };

    if let Err(e) = write() {
        let _ = fs::remove_file(&tmp);
        return Err(KodanError::Io(e));
    }

    debug!(path = %path.display(), bytes = data.len(), "Project saved");
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
