//! `avbtool` wrappers
//!
//! The descriptor text, the partition capacity and the footer write all come from
//! `avbtool`. Everything here shells out; the parsing lives in [`crate::descriptor`].

use crate::descriptor::{HashtreeDescriptor, parse_hashtree_descriptor};
use crate::error::{Error, Result};
use crate::sizing::CapacityOracle;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Options for writing a hashtree footer onto an image.
#[derive(Debug, Clone)]
pub struct FooterOptions {
    pub partition_size: u64,
    pub partition_name: String,
    pub hash_algorithm: String,
}

#[derive(Debug, Clone)]
pub struct AvbTool {
    program: PathBuf,
}

impl AvbTool {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn tool_error<R: ToString>(&self, reason: R) -> Error {
        Error::ToolFailure {
            tool: self.program.display().to_string(),
            reason: reason.to_string(),
        }
    }

    /// Runs avbtool with `args` and returns its stdout.
    fn run(&self, args: &[&str]) -> Result<String> {
        tracing::debug!(program = %self.program.display(), ?args, "Running avbtool");
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| self.tool_error(e))?;

        if !output.status.success() {
            return Err(self.tool_error(format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        String::from_utf8(output.stdout).map_err(|e| self.tool_error(e))
    }

    /// Output of `avbtool info_image` for `image`.
    #[tracing::instrument(skip(self))]
    pub fn info_image(&self, image: &Path) -> Result<String> {
        self.run(&["info_image", "--image", &image.to_string_lossy()])
    }

    /// Reads and parses the hashtree descriptor of `image`.
    pub fn hashtree_descriptor(&self, image: &Path) -> Result<HashtreeDescriptor> {
        parse_hashtree_descriptor(&self.info_image(image)?)
    }

    /// Largest image that fits a partition of `partition_size` bytes once the
    /// hashtree footer is added.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn calc_max_image_size(&self, partition_size: u64) -> Result<u64> {
        let stdout = self.run(&[
            "add_hashtree_footer",
            "--calc_max_image_size",
            "--partition_size",
            &partition_size.to_string(),
        ])?;
        let value = stdout.trim();
        value
            .parse::<u64>()
            .map_err(|_| self.tool_error(format!("unexpected output {value:?}")))
    }

    /// Appends the hash tree, FEC data and footer to `image` in place.
    #[tracing::instrument(skip(self))]
    pub fn add_hashtree_footer(&self, image: &Path, options: &FooterOptions) -> Result<()> {
        self.run(&[
            "add_hashtree_footer",
            "--image",
            &image.to_string_lossy(),
            "--partition_size",
            &options.partition_size.to_string(),
            "--partition_name",
            &options.partition_name,
            "--hash_algorithm",
            &options.hash_algorithm,
        ])?;
        tracing::info!(
            image = %image.display(),
            partition_size = options.partition_size,
            "Added hashtree footer"
        );
        Ok(())
    }
}

impl CapacityOracle for AvbTool {
    fn max_payload(&mut self, partition_size: u64) -> Result<u64> {
        self.calc_max_image_size(partition_size)
    }
}
