use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use shared::protocol::EMPTY_SNAPSHOT;
use crate::store::records::AnnouncementStore;

/// Get the output path ready before the collector starts listening.
///
/// Creates the parent directory. When no output file exists yet, writes an empty
/// snapshot and returns true: there is no prior snapshot to protect, so writes may
/// start right away. Returns false when a previous snapshot is already on disk.
pub fn prepare_output(path: impl AsRef<Path>) -> Result<bool> {
    let path = path.as_ref();

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    match std::fs::metadata(path) {
        Err(e) if e.kind() == ErrorKind::NotFound => {
            write_atomically(path, EMPTY_SNAPSHOT)?;
            tracing::info!("Initialized empty output file {}", path.display());
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Serialize every live service spec into `path`. Returns the number of entries written.
pub fn write_output_file(path: impl AsRef<Path>, store: &AnnouncementStore) -> Result<usize> {
    let path = path.as_ref();
    let services = store.flatten();

    tracing::debug!("Writing output file with {} entries", services.len());

    let bytes = serde_json::to_vec(&services)
        .context("Failed to serialize service list")?;
    write_atomically(path, &bytes)?;

    Ok(services.len())
}

/// Write into a sibling temp file, then rename it over `path` so readers
/// only ever see a complete snapshot.
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp_path = temp_path_for(path);

    std::fs::write(&tmp_path, bytes)
        .with_context(|| format!("Failed to write temp file: {}", tmp_path.display()))?;

    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e).with_context(|| format!("Failed to replace output file: {}", path.display()));
    }

    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    path.with_file_name(format!(".{}.tmp", file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shared::types::ServiceSpec;
    use crate::store::records::tests::record;

    fn read_specs(path: &Path) -> Vec<ServiceSpec> {
        serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
    }

    #[test]
    fn test_prepare_fresh_output_writes_empty_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sd").join("targets.json");

        let fresh = prepare_output(&path).unwrap();

        assert!(fresh);
        assert_eq!(std::fs::read(&path).unwrap(), b"[]");
    }

    #[test]
    fn test_prepare_keeps_existing_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.json");
        let previous = r#"[{"targets":["a:9100"],"labels":{}}]"#;
        std::fs::write(&path, previous).unwrap();

        let fresh = prepare_output(&path).unwrap();

        assert!(!fresh);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), previous);
    }

    #[test]
    fn test_write_output_flattens_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.json");
        let mut store = AnnouncementStore::new();
        store.insert(record("a", Utc::now(), &["a1:9100", "a2:9100"]));
        store.insert(record("b", Utc::now(), &["b1:9100"]));

        let written = write_output_file(&path, &store).unwrap();

        assert_eq!(written, 3);
        let mut targets: Vec<String> = read_specs(&path)
            .into_iter()
            .flat_map(|spec| spec.targets)
            .collect();
        targets.sort();
        assert_eq!(targets, vec!["a1:9100", "a2:9100", "b1:9100"]);
        assert!(!temp_path_for(&path).exists());
    }

    #[test]
    fn test_write_empty_store_overwrites_with_empty_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.json");
        std::fs::write(&path, r#"[{"targets":["gone:9100"],"labels":{}}]"#).unwrap();

        write_output_file(&path, &AnnouncementStore::new()).unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"[]");
    }

    #[test]
    fn test_write_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("targets.json");

        assert!(write_output_file(&path, &AnnouncementStore::new()).is_err());
    }
}
