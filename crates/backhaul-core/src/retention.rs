//! Count-based retention rotation.
//!
//! # Design
//! - Selection is pure: sort newest first by `created_at` and keep the first `max_count`.
//! - The sort is explicit and stable; listing order only breaks timestamp ties.
//! - Deletion attempts every victim; individual failures are recorded and logged, never fatal.

use std::future::Future;

use tracing::{info, warn};

use crate::error::{BackupError, BackupResult};
use crate::model::{Artifact, LocationId};

/// Select the artifacts that must be removed so at most `max_count` remain.
#[must_use]
pub fn rotate(artifacts: &[Artifact], max_count: usize) -> Vec<Artifact> {
    let mut ordered: Vec<&Artifact> = artifacts.iter().collect();
    ordered.sort_by(|left, right| right.created_at.cmp(&left.created_at));
    ordered.into_iter().skip(max_count).cloned().collect()
}

/// Result of applying a rotation to one location.
#[derive(Debug)]
pub struct RotationOutcome {
    /// Location that was rotated.
    pub location: LocationId,
    /// Number of artifacts observed before rotation.
    pub observed: usize,
    /// Artifacts removed successfully.
    pub deleted: Vec<Artifact>,
    /// Deletions that failed; the location exceeds its quota until the next cycle.
    pub failures: Vec<BackupError>,
}

impl RotationOutcome {
    /// Artifacts left at the location after this rotation.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.observed - self.deleted.len()
    }
}

/// Rotate a location, invoking `delete` for every selected artifact.
pub async fn prune<F, Fut>(
    location: &LocationId,
    artifacts: &[Artifact],
    max_count: usize,
    mut delete: F,
) -> RotationOutcome
where
    F: FnMut(Artifact) -> Fut,
    Fut: Future<Output = BackupResult<()>>,
{
    let victims = rotate(artifacts, max_count);
    info!(
        location = %location,
        observed = artifacts.len(),
        max_count,
        deleting = victims.len(),
        "retention rotation planned"
    );

    let mut outcome = RotationOutcome {
        location: location.clone(),
        observed: artifacts.len(),
        deleted: Vec::with_capacity(victims.len()),
        failures: Vec::new(),
    };

    for artifact in victims {
        let name = artifact.name.clone();
        match delete(artifact.clone()).await {
            Ok(()) => {
                info!(location = %location, artifact = %name, "rotated out old artifact");
                outcome.deleted.push(artifact);
            }
            Err(err) => {
                warn!(
                    location = %location,
                    artifact = %name,
                    error = %err,
                    "retention deletion failed; continuing"
                );
                outcome.failures.push(BackupError::Rotation {
                    location: location.clone(),
                    artifact: name,
                    source: Box::new(err),
                });
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ArtifactId;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    fn artifact(id: &str, epoch: i64) -> Artifact {
        Artifact {
            id: ArtifactId::new(id),
            location: LocationId::new("folder"),
            name: format!("{id}.tar.gz"),
            created_at: Utc.timestamp_opt(epoch, 0).single().unwrap_or_default(),
            size_bytes: None,
        }
    }

    fn ids(artifacts: &[Artifact]) -> Vec<&str> {
        artifacts.iter().map(|artifact| artifact.id.as_str()).collect()
    }

    #[test]
    fn deletes_oldest_beyond_limit() {
        let listed = vec![
            artifact("t1", 1),
            artifact("t2", 2),
            artifact("t3", 3),
            artifact("t4", 4),
        ];
        assert_eq!(ids(&rotate(&listed, 3)), vec!["t1"]);
    }

    #[test]
    fn sorts_explicitly_instead_of_trusting_listing_order() {
        let listed = vec![artifact("t3", 3), artifact("t1", 1), artifact("t4", 4), artifact("t2", 2)];
        assert_eq!(ids(&rotate(&listed, 2)), vec!["t2", "t1"]);
    }

    #[test]
    fn ties_keep_listing_order() {
        let listed = vec![artifact("a", 5), artifact("b", 5), artifact("c", 5)];
        assert_eq!(ids(&rotate(&listed, 1)), vec!["b", "c"]);
    }

    #[test]
    fn deletion_count_matches_overflow_for_every_size() {
        for len in 0..8_i64 {
            let listed: Vec<_> = (0..len).map(|n| artifact(&format!("a{n}"), n)).collect();
            for max in 0..6_usize {
                let victims = rotate(&listed, max);
                let len = listed.len();
                assert_eq!(victims.len(), len.saturating_sub(max));
                assert_eq!(len - victims.len(), len.min(max));
                let newest_victim = victims.iter().map(|a| a.created_at).max();
                let oldest_kept = listed
                    .iter()
                    .filter(|a| !victims.contains(a))
                    .map(|a| a.created_at)
                    .min();
                if let (Some(victim), Some(kept)) = (newest_victim, oldest_kept) {
                    assert!(victim <= kept, "only the oldest artifacts are rotated out");
                }
            }
        }
    }

    #[tokio::test]
    async fn prune_continues_after_a_failed_deletion() {
        let listed = vec![
            artifact("t1", 1),
            artifact("t2", 2),
            artifact("t3", 3),
            artifact("t4", 4),
            artifact("t5", 5),
        ];
        let attempted = Mutex::new(Vec::new());
        let outcome = prune(&LocationId::new("folder"), &listed, 2, |victim| {
            attempted
                .lock()
                .map(|mut calls| calls.push(victim.id.as_str().to_string()))
                .ok();
            async move {
                if victim.id.as_str() == "t2" {
                    Err(BackupError::http_status("drive.delete", "t2", 500))
                } else {
                    Ok(())
                }
            }
        })
        .await;

        let attempted = attempted.into_inner().unwrap_or_default();
        assert_eq!(attempted, vec!["t3", "t2", "t1"]);
        assert_eq!(ids(&outcome.deleted), vec!["t3", "t1"]);
        assert_eq!(outcome.failures.len(), 1);
        assert!(matches!(
            &outcome.failures[0],
            BackupError::Rotation { artifact, .. } if artifact == "t2.tar.gz"
        ));
        assert_eq!(outcome.remaining(), 3);
    }
}
