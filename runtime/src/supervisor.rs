//! Keeps subsystem tasks alive: failures and panics are logged with context
//! and the task is restarted after a fixed delay. No error ever propagates
//! from one subsystem into another.

use core::{future::Future, time::Duration};
use std::panic::AssertUnwindSafe;

use anyhow::Result;
use futures::FutureExt as _;
use log::{error, warn};

/// Runs `task` forever. Each completion, failure or panic is logged and
/// followed by a fresh invocation after `restart_delay`.
pub async fn run_supervised<F, Fut>(name: String, restart_delay: Duration, mut task: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    loop {
        match AssertUnwindSafe(task()).catch_unwind().await {
            Ok(Ok(())) => warn!("{name} task exited, restarting in {restart_delay:?}"),
            Ok(Err(error)) => {
                warn!("{name} task failed: {error:?}, restarting in {restart_delay:?}");
            }
            Err(payload) => {
                // Panic payloads are almost always `&str` or `String`;
                // anything else has no printable form.
                let message = payload
                    .downcast_ref::<&str>()
                    .copied()
                    .map(str::to_owned)
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic with non-string payload".to_owned());

                error!("{name} task panicked: {message}, restarting in {restart_delay:?}");
            }
        }

        tokio::time::sleep(restart_delay).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    #[tokio::test]
    async fn failing_and_panicking_task_is_restarted() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();

        let supervisor = tokio::spawn(run_supervised(
            "test".to_owned(),
            Duration::from_millis(1),
            move || {
                let counter = counter.clone();

                async move {
                    match counter.fetch_add(1, Ordering::SeqCst) {
                        0 => anyhow::bail!("first failure"),
                        1 => panic!("second failure"),
                        2 => panic!("{}", "owned".to_owned()),
                        _ => Ok(()),
                    }
                }
            },
        ));

        while attempts.load(Ordering::SeqCst) < 4 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        supervisor.abort();
    }
}
