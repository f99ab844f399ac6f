use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::debug;

/// Rate-limit `input` to at most one item per `interval`, leading and trailing.
///
/// An item arriving a full interval after the last forward goes out at once.
/// Anything sooner replaces the pending trailing item, which goes out when the
/// interval since the last forward expires. Closing `input` flushes the pending item.
pub fn spawn_throttle<T>(
    interval: Duration,
    input: mpsc::UnboundedReceiver<T>,
    output: mpsc::Sender<T>,
) -> JoinHandle<()>
where
    T: Send + 'static,
{
    tokio::spawn(run(interval, input, output))
}

pub async fn run<T>(
    interval: Duration,
    mut input: mpsc::UnboundedReceiver<T>,
    output: mpsc::Sender<T>,
) {
    let mut last_forward: Option<Instant> = None;
    let mut pending: Option<T> = None;
    let mut coalesced: u64 = 0;

    loop {
        let trailing_at = last_forward.map_or_else(Instant::now, |at| at + interval);

        tokio::select! {
            biased;

            received = input.recv() => {
                let Some(item) = received else {
                    if let Some(item) = pending.take() {
                        let _ = output.send(item).await;
                    }
                    break;
                };

                let now = Instant::now();
                let ready = last_forward.is_none_or(|at| now.duration_since(at) >= interval);
                if ready {
                    if pending.take().is_some() {
                        coalesced += 1;
                    }
                    if output.send(item).await.is_err() {
                        break;
                    }
                    last_forward = Some(now);
                } else if pending.replace(item).is_some() {
                    coalesced += 1;
                }
            }

            () = sleep_until(trailing_at), if pending.is_some() => {
                let Some(item) = pending.take() else {
                    continue;
                };
                if output.send(item).await.is_err() {
                    break;
                }
                last_forward = Some(Instant::now());
            }
        }
    }

    debug!(coalesced, "time change throttle stopped");
}
