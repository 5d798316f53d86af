//! Polling worker.
//!
//! Runs even when streaming owns updates; in that mode it only sleeps, so
//! flipping the client to polling needs no task churn.  The first
//! iteration while the client is still initializing fetches immediately.
//! Background mode stretches the interval and honours
//! `disable_background_updating`.

use super::WorkerContext;
use crate::client::ClientStatus;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{error, trace, warn};

pub(crate) async fn run(ctx: WorkerContext) {
    loop {
        let status = ctx.lifecycle.current();
        if matches!(status, ClientStatus::Failed | ClientStatus::ShuttingDown) {
            break;
        }

        let background = ctx.runtime.background.load(Ordering::Relaxed);
        let mut skip_fetch = ctx.runtime.offline.load(Ordering::Relaxed);
        let mut interval_ms = ctx.config.poll_interval_ms;
        if background {
            interval_ms = ctx.config.background_poll_interval_ms;
            skip_fetch = skip_fetch || ctx.config.disable_background_updating;
        } else {
            // Streaming owns foreground updates.
            skip_fetch = skip_fetch || ctx.config.streaming;
        }

        // Fast path: the very first poll should not wait out the interval.
        if !skip_fetch && status == ClientStatus::Initializing {
            interval_ms = 0;
        }

        if interval_ms > 0 {
            tokio::select! {
                biased;
                _ = ctx.runtime.shutdown.cancelled() => {}
                _ = ctx.runtime.kick.notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(interval_ms)) => {}
            }
        }

        if skip_fetch {
            continue;
        }
        if matches!(
            ctx.lifecycle.current(),
            ClientStatus::Failed | ClientStatus::ShuttingDown
        ) {
            continue;
        }

        match ctx.transport.fetch_flags(&ctx.user_json()).await {
            Ok(response) if response.status == 200 => {
                ctx.update.apply_put_body(&response.body);
            }
            Ok(response) if response.status == 401 || response.status == 403 => {
                error!(status = response.status, "credential rejected, polling failed");
                ctx.lifecycle.fail();
            }
            Ok(response) => {
                warn!(status = response.status, "poll failed, will retry");
            }
            Err(e) => {
                warn!(error = %e, "poll failed, will retry");
            }
        }
    }

    trace!("polling worker exiting");
}
