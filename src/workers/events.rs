//! Event delivery worker.
//!
//! Wakes on the flush interval, an explicit flush signal, or shutdown.
//! Each bundle is posted with a fresh payload UUID; a transient failure is
//! retried exactly once after a short pause, reusing the same UUID so the
//! service can deduplicate.  Shutdown performs one final flush; an
//! authentication failure does not.

use super::WorkerContext;
use crate::client::ClientStatus;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

const RETRY_PAUSE: Duration = Duration::from_secs(1);

pub(crate) async fn run(ctx: WorkerContext) {
    let flush_interval = Duration::from_millis(ctx.config.events_flush_interval_ms);
    let mut final_flush = false;

    loop {
        if !final_flush {
            tokio::select! {
                biased;
                _ = ctx.runtime.shutdown.cancelled() => {}
                _ = ctx.runtime.flush.notified() => {}
                _ = tokio::time::sleep(flush_interval) => {}
            }
        }

        match ctx.lifecycle.current() {
            ClientStatus::Failed => break,
            ClientStatus::ShuttingDown => final_flush = true,
            _ => {}
        }

        if ctx.runtime.offline.load(Ordering::Relaxed) {
            if final_flush {
                break;
            }
            continue;
        }

        let Some(batch) = ctx.events.bundle_payload() else {
            if final_flush {
                break;
            }
            continue;
        };

        // The payload id must survive the retry so the re-post is
        // recognizable as the same batch.
        let payload_id = Uuid::new_v4();
        let mut delivered = false;
        for attempt in 0..2 {
            match ctx.transport.post_events(&batch, &payload_id).await {
                Ok(status) if status == 200 || status == 202 => {
                    trace!(events = batch.len(), "event batch delivered");
                    delivered = true;
                    break;
                }
                Ok(status) if status == 401 || status == 403 => {
                    error!(status, "credential rejected, event delivery failed");
                    ctx.lifecycle.fail();
                    break;
                }
                Ok(status) => {
                    debug!(status, attempt, "event delivery failed");
                }
                Err(e) => {
                    debug!(error = %e, attempt, "event delivery failed");
                }
            }
            if attempt == 0 {
                tokio::select! {
                    biased;
                    _ = ctx.runtime.shutdown.cancelled() => {}
                    _ = tokio::time::sleep(RETRY_PAUSE) => {}
                }
            }
        }

        if !delivered && ctx.lifecycle.current() != ClientStatus::Failed {
            warn!("dropping event batch after retry");
        }

        if final_flush || ctx.lifecycle.current() == ClientStatus::Failed {
            break;
        }
    }

    trace!("event worker exiting");
}
