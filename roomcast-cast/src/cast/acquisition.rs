//! Source acquisition tool
//!
//! Resolves a track identifier to compressed audio by running an external
//! downloader that writes the audio to its stdout.

use super::process::ManagedChild;
use crate::config::AcquisitionConfig;
use crate::error::{Error, Result};
use tokio::process::ChildStdout;
use tracing::info;

/// Placeholder replaced by the track identifier in argument templates
pub const TRACK_ID_PLACEHOLDER: &str = "{id}";

/// Configured downloader command
#[derive(Debug, Clone)]
pub struct AcquisitionTool {
    program: String,
    args: Vec<String>,
}

impl AcquisitionTool {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: &AcquisitionConfig) -> Self {
        Self::new(config.program.clone(), config.args.clone())
    }


    /// Argument list for one track
    pub fn args_for(&self, track_id: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace(TRACK_ID_PLACEHOLDER, track_id))
            .collect()
    }

    /// Start downloading `track_id`
    pub fn spawn(&self, track_id: &str) -> Result<AcquisitionProcess> {
        let mut child = ManagedChild::spawn("acquisition", &self.program, &self.args_for(track_id), false)?;
        let stdout = child.take_stdout().ok_or_else(|| Error::ProcessFailure {
            tool: "acquisition",
            message: "stdout not captured".to_string(),
        })?;

        info!("Acquiring {} via {}", track_id, self.program);
        Ok(AcquisitionProcess {
            track_id: track_id.to_string(),
            child,
            stdout,
        })
    }
}

/// Running download
pub struct AcquisitionProcess {
    pub track_id: String,
    pub child: ManagedChild,
    pub stdout: ChildStdout,
}
