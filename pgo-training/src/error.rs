// Error taxonomy for a training-case run.
//
// Every variant except `Other`/`Io` is a fatal category: the lifecycle aborts on the first one
// it sees and surfaces it unchanged to the caller. An empty harvest is NOT an error (see
// `harvest::HarvestOutcome::empty`).

use std::path::PathBuf;
use thiserror::Error;

use crate::lifecycle::CaseState;

#[derive(Debug, Error)]
pub enum CaseError {
    /// A required collaborator or setting is missing; no case object is usable.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Remote download or unpack failure. The temporary download is already removed.
    #[error("Failed to fetch '{url}': {source}")]
    Fetch {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    /// The unpacked archive directory could not be moved to its canonical name.
    #[error("Failed to rename '{}' to '{}': {source}", from.display(), to.display())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A management-tool invocation failed; remaining steps were not run.
    #[error("Installation step '{step}' failed: {detail}")]
    InstallationStep { step: String, detail: String },

    /// The job artifact on disk does not match what was serialized.
    #[error("Couldn't write '{}' (expected {expected} bytes, wrote {written})", path.display())]
    ArtifactWrite {
        path: PathBuf,
        expected: usize,
        written: usize,
    },

    /// A service handle failed to come up, go down, or run a statement.
    #[error("Service {service} failed to {action}: {source}")]
    Service {
        service: String,
        action: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Invalid lifecycle transition {from:?} -> {to:?}")]
    InvalidTransition { from: CaseState, to: CaseState },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CaseError {
    pub fn service(service: &str, action: &str, source: anyhow::Error) -> Self {
        CaseError::Service {
            service: service.to_string(),
            action: action.to_string(),
            source,
        }
    }
}
