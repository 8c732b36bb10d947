//! Crash-recovery snapshot
//!
//! The engine persists its adaptive state (risk counters, confidence
//! threshold, trade history) as a JSON file at shutdown and whenever
//! the embedding binary asks for an interim save.
//! Writes go to a temp file first and are renamed into
//! place so a crash mid-write never corrupts the previous snapshot. A
//! missing or unreadable snapshot means a fresh start, never a failure.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::entities::trade::CompletedTrade;
use crate::domain::errors::EngineError;
use crate::domain::services::confidence::ConfidenceThreshold;
use crate::domain::services::risk_ledger::RiskState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub risk: RiskState,
    pub threshold: ConfidenceThreshold,
    pub history: Vec<CompletedTrade>,
    pub saved_at: DateTime<Utc>,
}

/// Atomic write: serialize to `<path>.tmp`, then rename over the target.
pub async fn save(path: &Path, snapshot: &EngineSnapshot) -> Result<(), EngineError> {
    let json = serde_json::to_string_pretty(snapshot)
        .map_err(|e| EngineError::Snapshot(format!("serialize failed: {e}")))?;

    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, json.as_bytes())
        .await
        .map_err(|e| EngineError::Snapshot(format!("write {} failed: {e}", tmp.display())))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| EngineError::Snapshot(format!("rename to {} failed: {e}", path.display())))?;

    info!(path = %path.display(), trades = snapshot.history.len(), "snapshot saved");
    Ok(())
}

/// `None` when the file is absent or unreadable; a corrupt snapshot is
/// logged and discarded rather than propagated.
pub async fn load(path: &Path) -> Option<EngineSnapshot> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no snapshot found, starting fresh");
            return None;
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "snapshot unreadable, starting fresh");
            return None;
        }
    };

    match serde_json::from_slice::<EngineSnapshot>(&bytes) {
        Ok(snapshot) => {
            info!(
                path = %path.display(),
                saved_at = %snapshot.saved_at,
                "snapshot restored"
            );
            Some(snapshot)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "snapshot corrupt, starting fresh");
            None
        }
    }
}
