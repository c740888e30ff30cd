//! Expert Advisor deployment into an instance's Experts directory.
//!
//! The terminal picks new files up on its own reload cycle; nothing here
//! restarts the instance.

use crate::gateway::RuntimeGateway;
use crate::naming::EXPERTS_DIR;
use mt5_common::{ArtifactKind, FleetError, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Clone)]
pub struct ArtifactDeployer {
    gateway: Arc<dyn RuntimeGateway>,
}

impl ArtifactDeployer {
    pub fn new(gateway: Arc<dyn RuntimeGateway>) -> Self {
        Self { gateway }
    }

    /// Uploads a local `.ex5`/`.mq5` file under its base name.
    #[instrument(skip(self, path))]
    pub async fn upload(&self, id: &str, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                FleetError::InvalidInput(format!("'{}' has no usable file name", path.display()))
            })?;
        artifact_kind(file_name)?;

        let contents = tokio::fs::read(path).await?;
        self.upload_bytes(id, file_name, &contents).await
    }

    /// Uploads in-memory contents as `file_name`.
    #[instrument(skip(self, contents), fields(size = contents.len()))]
    pub async fn upload_bytes(&self, id: &str, file_name: &str, contents: &[u8]) -> Result<()> {
        let kind = artifact_kind(file_name)?;
        let archive = pack_artifact(file_name, contents)?;
        self.gateway.put_archive(id, EXPERTS_DIR, archive).await?;
        info!(container_id = %id, %file_name, ?kind, "Expert Advisor uploaded");
        Ok(())
    }
}

/// Accepts only bare `.ex5`/`.mq5` names.
pub fn artifact_kind(file_name: &str) -> Result<ArtifactKind> {
    if file_name.contains('/') || file_name.contains('\\') || file_name.contains("..") {
        return Err(FleetError::InvalidInput(format!(
            "'{file_name}' must be a bare file name"
        )));
    }
    ArtifactKind::from_file_name(file_name).ok_or_else(|| {
        FleetError::InvalidInput(format!(
            "'{file_name}' is not an Expert Advisor (.ex5 or .mq5)"
        ))
    })
}

/// Single-entry uncompressed tar holding `contents` as `file_name`.
pub fn pack_artifact(file_name: &str, contents: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();

    let mut archive = tar::Builder::new(Vec::new());
    archive.append_data(&mut header, file_name, contents)?;
    archive.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockContainer, MockGateway};
    use std::io::Read;

    fn entries(archive: &[u8]) -> Vec<(String, Vec<u8>)> {
        let mut archive = tar::Archive::new(std::io::Cursor::new(archive));
        archive
            .entries()
            .unwrap()
            .map(|entry| {
                let mut entry = entry.unwrap();
                let name = entry.path().unwrap().to_string_lossy().into_owned();
                let mut data = Vec::new();
                entry.read_to_end(&mut data).unwrap();
                (name, data)
            })
            .collect()
    }

    #[test]
    fn test_pack_single_entry() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(1500).collect();
        let archive = pack_artifact("Grid.ex5", &payload).unwrap();

        let entries = entries(&archive);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "Grid.ex5");
        assert_eq!(entries[0].1, payload);
    }

    #[test]
    fn test_artifact_kind_validation() {
        assert_eq!(artifact_kind("Grid.ex5").unwrap(), ArtifactKind::Compiled);
        assert_eq!(artifact_kind("Grid.mq5").unwrap(), ArtifactKind::Source);
        assert!(matches!(artifact_kind("Grid.dll"), Err(FleetError::InvalidInput(_))));
        assert!(matches!(artifact_kind("../Grid.ex5"), Err(FleetError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_upload_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Scalper.mq5");
        tokio::fs::write(&path, b"input int Lots = 1;").await.unwrap();

        let gateway = Arc::new(MockGateway::new());
        let id = gateway.add(MockContainer::running("trading_mt5_demo"));
        ArtifactDeployer::new(gateway.clone()).upload(&id, &path).await.unwrap();

        let uploads = gateway.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].container, "trading_mt5_demo");
        assert_eq!(uploads[0].path, "/config/MQL5/Experts/");
        assert_eq!(
            entries(&uploads[0].archive),
            vec![("Scalper.mq5".to_string(), b"input int Lots = 1;".to_vec())]
        );
    }

    #[tokio::test]
    async fn test_rejects_before_any_io() {
        let gateway = Arc::new(MockGateway::new());
        let id = gateway.add(MockContainer::running("trading_mt5_demo"));
        let deployer = ArtifactDeployer::new(gateway.clone());

        // the file does not exist; validation must fail first
        let err = deployer.upload(&id, "/nonexistent/notes.txt").await.unwrap_err();
        assert!(matches!(err, FleetError::InvalidInput(_)));

        let err = deployer.upload(&id, "/nonexistent/Grid.ex5").await.unwrap_err();
        assert!(matches!(err, FleetError::Io(_)));
        assert!(gateway.calls().is_empty());
    }
}
