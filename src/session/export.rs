//! Session artifact export
//!
//! Writes the patches, SysEx dumps, captured takes, calibration and report
//! of a finished session into one directory, then a manifest listing every
//! file with its SHA-256.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::audio::write_wav;
use crate::error::Result;
use crate::patch::PatchCodec;
use crate::session::report::render_report;
use crate::session::state::{OptimizationSession, SessionStatus};

/// Bit depth of exported takes
const WAV_BIT_DEPTH: u16 = 24;

/// One written file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub file_name: String,
    pub sha256: String,
    pub bytes: u64,
}

/// Contents of `<session_name>_manifest.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportManifest {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub initial_loss: Option<f64>,
    pub best_loss: Option<f64>,
    pub iterations: usize,
    pub exported_at: DateTime<Utc>,
    pub artifacts: Vec<Artifact>,
}

impl ExportManifest {
    pub fn load(path: &Path) -> Result<Self> {
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    pub fn artifact(&self, file_name: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.file_name == file_name)
    }
}

/// Hex SHA-256 of a file's contents
pub fn file_sha256(path: &Path) -> Result<String> {
    let content = fs::read(path)?;
    Ok(format!("{:x}", Sha256::digest(&content)))
}

struct Writer<'a> {
    dir: &'a Path,
    prefix: &'a str,
    artifacts: Vec<Artifact>,
}

impl Writer<'_> {
    fn path(&self, suffix: &str) -> PathBuf {
        self.dir.join(format!("{}_{}", self.prefix, suffix))
    }

    /// Hash what landed on disk and record it
    fn record(&mut self, path: &Path) -> Result<()> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let bytes = fs::metadata(path)?.len();
        let sha256 = file_sha256(path)?;
        log::debug!("Exported {} ({} bytes, sha256 {})", file_name, bytes, sha256);
        self.artifacts.push(Artifact {
            file_name,
            sha256,
            bytes,
        });
        Ok(())
    }

    fn write_bytes(&mut self, suffix: &str, content: &[u8]) -> Result<()> {
        let path = self.path(suffix);
        fs::write(&path, content)?;
        self.record(&path)
    }
}

/// Write every artifact of `session` under `dir`, prefixed with `session_name`
///
/// Takes and calibration are skipped when the session never got that far.
/// The manifest is written last and is not listed in itself.
pub fn export_session(
    session: &OptimizationSession,
    codec: &PatchCodec,
    dir: &Path,
    session_name: &str,
    patch_index: u8,
) -> Result<ExportManifest> {
    fs::create_dir_all(dir)?;
    let mut writer = Writer {
        dir,
        prefix: session_name,
        artifacts: Vec::new(),
    };

    writer.write_bytes("initial.json", session.initial_patch().to_json_pretty()?.as_bytes())?;
    writer.write_bytes("optimized.json", session.best_patch().to_json_pretty()?.as_bytes())?;
    writer.write_bytes("initial.syx", &codec.encode_bulk(session.initial_patch(), patch_index)?)?;
    writer.write_bytes("optimized.syx", &codec.encode_bulk(session.best_patch(), patch_index)?)?;

    for (suffix, take) in [
        ("initial.wav", session.initial_take()),
        ("optimized.wav", session.best_take()),
    ] {
        if let Some(take) = take {
            let path = writer.path(suffix);
            write_wav(take, &path, WAV_BIT_DEPTH)?;
            writer.record(&path)?;
        }
    }

    if let Some(profile) = session.calibration() {
        let path = writer.path("calibration.json");
        profile.save(&path)?;
        writer.record(&path)?;
    }

    writer.write_bytes("report.txt", render_report(session).as_bytes())?;

    let manifest = ExportManifest {
        session_id: session.id(),
        status: session.status().clone(),
        initial_loss: session.initial_loss(),
        best_loss: session.best_loss(),
        iterations: session.iterations(),
        exported_at: Utc::now(),
        artifacts: writer.artifacts,
    };
    let manifest_path = dir.join(format!("{}_manifest.json", session_name));
    fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)?;
    log::info!(
        "Session {} exported: {} artifacts in {}",
        session.id(),
        manifest.artifacts.len(),
        dir.display()
    );
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::{Patch, SectionId};
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn test_export_without_measurements() {
        let dir = tempdir().unwrap();
        let session = OptimizationSession::new(
            Patch::new("Clean").with_number(SectionId::Amp, "gain", 0.4),
        );
        let manifest =
            export_session(&session, &PatchCodec::new(), dir.path(), "take1", 0).unwrap();

        let names: Vec<&str> = manifest.artifacts.iter().map(|a| a.file_name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "take1_initial.json",
                "take1_optimized.json",
                "take1_initial.syx",
                "take1_optimized.syx",
                "take1_report.txt",
            ]
        );
        assert!(dir.path().join("take1_manifest.json").exists());
    }

    #[test]
    fn test_manifest_hashes_match_files() {
        let dir = tempdir().unwrap();
        let session = OptimizationSession::new(Patch::new("Clean"));
        export_session(&session, &PatchCodec::new(), dir.path(), "s", 3).unwrap();

        let manifest = ExportManifest::load(&dir.path().join("s_manifest.json")).unwrap();
        for artifact in &manifest.artifacts {
            let path = dir.path().join(&artifact.file_name);
            assert_eq!(file_sha256(&path).unwrap(), artifact.sha256);
            assert_eq!(fs::metadata(&path).unwrap().len(), artifact.bytes);
        }

        let syx = fs::read(dir.path().join("s_optimized.syx")).unwrap();
        assert_eq!(PatchCodec::new().decode(&syx).unwrap().name(), "Clean");
    }
}
