//! Timed status polling for a freshly created snapshot.
//!
//! # Design
//! - Suspends on the tokio timer between reads; nothing spins.
//! - Elapsed time is measured from the first read, after the initial grace delay.
//! - The timeout is checked before each read, so it never fires early.
//! - A failed reading inside the failure grace window is treated as transient.

use backhaul_config::PollingConfig;
use backhaul_core::{BackupError, BackupId, BackupJob, BackupResult, BackupStatus, OriginBackups};
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

/// Poll `id` until it completes, fails, or the budget runs out.
pub(crate) async fn wait_for_completion(
    origin: &dyn OriginBackups,
    id: &BackupId,
    policy: &PollingConfig,
) -> BackupResult<BackupJob> {
    sleep(policy.initial_delay).await;
    let started = Instant::now();
    loop {
        let elapsed = started.elapsed();
        if elapsed > policy.timeout {
            return Err(BackupError::Timeout {
                backup_id: id.clone(),
                elapsed,
            });
        }

        let job = origin.poll_status(id).await?;
        if job.is_complete() {
            debug!(backup_id = %id, elapsed_secs = elapsed.as_secs(), "backup completed");
            return Ok(job);
        }
        if job.status == BackupStatus::Failed {
            if elapsed > policy.failure_grace {
                return Err(BackupError::Failed {
                    backup_id: id.clone(),
                });
            }
            warn!(
                backup_id = %id,
                elapsed_secs = elapsed.as_secs(),
                "origin reported failure inside grace window; still polling"
            );
        } else {
            debug!(backup_id = %id, status = job.status.as_str(), "backup still running");
        }

        sleep(policy.interval).await;
    }
}
