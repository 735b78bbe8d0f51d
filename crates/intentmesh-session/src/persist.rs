use std::path::Path;

use intentmesh_core::{MeshError, MeshResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Write `value` as JSON next to `path`, then rename over it.
///
/// Readers either see the previous file or the complete new one.
pub(crate) async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> MeshResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| MeshError::Cache(format!("Failed to create dir: {e}")))?;
    }
    let data = serde_json::to_vec(value)?;
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, &data)
        .await
        .map_err(|e| MeshError::Cache(format!("Failed to write {}: {e}", tmp.display())))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| MeshError::Cache(format!("Failed to replace {}: {e}", path.display())))?;
    Ok(())
}

/// Read a JSON file. `Ok(None)` when it does not exist.
pub(crate) async fn read_json<T: DeserializeOwned>(path: &Path) -> MeshResult<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(MeshError::Cache(format!(
            "Failed to read {}: {e}",
            path.display()
        ))),
    }
}
