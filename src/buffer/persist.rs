use std::{
    fs,
    path::{Component, Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    types::{BufferManifest, Frame, FrameImage, SessionStatus},
};

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedFrame {
    pub seq: u64,
    pub timestamp: f64,
    pub file: String,
}

/// On-disk form of a preserved buffer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedManifest {
    pub session_id: String,
    pub device: String,
    pub started_at: f64,
    pub capture_interval_ms: u64,
    /// RFC 3339 wall-clock time of the write.
    pub saved_at: String,
    pub status: SessionStatus,
    pub screenshots: Vec<PersistedFrame>,
}

pub fn frame_file_name(frame: &Frame) -> String {
    let ext = image::guess_format(frame.image.bytes())
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("bin");
    format!("{}_{:.3}.{ext}", frame.seq, frame.timestamp)
}

/// Writes each frame as its own file under `dir`, creating it if needed.
pub fn write_frames(dir: &Path, frames: &[Frame]) -> Result<Vec<PersistedFrame>> {
    fs::create_dir_all(dir)?;
    frames
        .iter()
        .map(|frame| {
            let file = frame_file_name(frame);
            fs::write(dir.join(&file), frame.image.bytes())?;
            Ok(PersistedFrame {
                seq: frame.seq,
                timestamp: frame.timestamp,
                file,
            })
        })
        .collect()
}

pub fn write_artifacts(
    dir: &Path,
    manifest: &BufferManifest,
    frames: &[Frame],
) -> Result<PersistedManifest> {
    let screenshots = write_frames(dir, frames)?;
    let persisted = PersistedManifest {
        session_id: manifest.session_id.clone(),
        device: manifest.device_ref.clone(),
        started_at: manifest.started_at,
        capture_interval_ms: manifest.capture_interval_ms,
        saved_at: chrono::Utc::now().to_rfc3339(),
        status: manifest.status,
        screenshots,
    };
    fs::write(
        dir.join(MANIFEST_FILE),
        serde_json::to_vec_pretty(&persisted)?,
    )?;
    Ok(persisted)
}

/// Reads a directory produced by [`write_artifacts`]. Frames come back in
/// manifest order with their original sequence numbers and timestamps.
pub fn load_artifacts(dir: &Path) -> Result<(PersistedManifest, Vec<Frame>)> {
    let manifest_path = dir.join(MANIFEST_FILE);
    let raw = fs::read(&manifest_path).map_err(|err| Error::Artifact {
        path: manifest_path.clone(),
        reason: err.to_string(),
    })?;
    let manifest: PersistedManifest = serde_json::from_slice(&raw)?;

    let mut frames = Vec::with_capacity(manifest.screenshots.len());
    for entry in &manifest.screenshots {
        let path = resolve_entry(dir, &entry.file)?;
        let bytes = fs::read(&path).map_err(|err| Error::Artifact {
            path: path.clone(),
            reason: err.to_string(),
        })?;
        frames.push(Frame {
            seq: entry.seq,
            timestamp: entry.timestamp,
            image: FrameImage::from(bytes),
        });
    }
    Ok((manifest, frames))
}

fn resolve_entry(dir: &Path, file: &str) -> Result<PathBuf> {
    let relative = Path::new(file);
    let mut components = relative.components();
    let plain =
        matches!(components.next(), Some(Component::Normal(_))) && components.next().is_none();
    if !plain {
        return Err(Error::Artifact {
            path: dir.join(file),
            reason: "manifest entry must be a plain file name".into(),
        });
    }
    Ok(dir.join(relative))
}
