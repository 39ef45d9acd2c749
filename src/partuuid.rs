//! Partition identity
//!
//! The dm table references the root partition by its UUID so it survives device
//! renumbering. For filesystem images the UUID is taken from `file(1)`, which
//! prints it as `UUID=<uuid>` for ext and `uuid=<uuid>` for most other types.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Pulls the first `uuid=` value out of `file(1)` output.
pub fn extract_uuid(output: &str) -> Option<&str> {
    let lower = output.to_ascii_lowercase();
    let start = lower.find("uuid=")? + "uuid=".len();
    let rest = &output[start..];
    let end = rest
        .find(|c: char| !(c.is_ascii_hexdigit() || c == '-'))
        .unwrap_or(rest.len());
    let uuid = &rest[..end];
    (!uuid.is_empty()).then_some(uuid)
}

#[derive(Debug, Clone)]
pub struct UuidResolver {
    program: PathBuf,
}

impl UuidResolver {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Resolves the stable identifier of the partition image at `image`.
    #[tracing::instrument(skip(self))]
    pub fn resolve(&self, image: &Path) -> Result<String> {
        let output = Command::new(&self.program)
            .arg(image)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| Error::ToolFailure {
                tool: self.program.display().to_string(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(Error::ToolFailure {
                tool: self.program.display().to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let uuid = extract_uuid(&stdout)
            .ok_or_else(|| Error::StorageIdNotFound(image.display().to_string()))?;
        tracing::debug!(uuid, "Resolved partition UUID");
        Ok(uuid.to_owned())
    }
}
