//! One-shot version and capability probe of a server binary.

use server_version::{parse_version_output, ServerBuild};
use tracing::error;

use crate::error::{Result, TopologyError};
use crate::node::Launcher;

/// Run `binary --version` and interpret its output.
pub async fn probe_server(launcher: &dyn Launcher, binary: &str) -> Result<ServerBuild> {
    let output = launcher
        .capture(binary, &["--version".to_string()])
        .await
        .map_err(|e| TopologyError::ProcessStart {
            target: binary.to_string(),
            reason: format!("version probe failed: {e}"),
        })?;

    parse_version_output(&output.stdout, &output.stderr).map_err(|source| {
        error!("Unparsable version output from {binary}: {}", output.stdout.trim());
        TopologyError::VersionParse {
            binary: binary.to_string(),
            source,
        }
    })
}
