//! Shared state machine driving every consumer's start/stop behavior.

use crate::consumer::traits::ConsumerState;
use crate::error::{RelayError, Result};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Owns the `Created -> Running -> Stopped` transitions, the shutdown
/// signal observed by the receive loop, and the loop's join handle.
///
/// Adapters embed one `Lifecycle` each; the state logic lives here so
/// all three brokers behave identically at the contract boundary.
pub struct Lifecycle {
    name: &'static str,
    state: Mutex<ConsumerState>,
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
    grace_period: Duration,
}

impl Lifecycle {
    pub fn new(name: &'static str, grace_period: Duration) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            name,
            state: Mutex::new(ConsumerState::Created),
            shutdown_tx,
            handle: Mutex::new(None),
            grace_period,
        }
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.lock()
    }

    /// Reserve the `Running` state. Only valid from `Created`; a second
    /// `start()` must fail rather than spawn a second loop.
    pub fn begin_start(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state != ConsumerState::Created {
            return Err(RelayError::AlreadyRunning(self.name.to_string()));
        }
        *state = ConsumerState::Running;
        Ok(())
    }

    /// Hand over the spawned receive loop for `stop()` to join.
    pub fn attach(&self, handle: JoinHandle<()>) {
        *self.handle.lock() = Some(handle);
    }

    /// Receiver the loop selects on; fires once `stop()` is called.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Terminal transition used by the loop itself on fatal exit
    /// (retries exhausted, stream ended).
    pub fn mark_stopped(&self) {
        *self.state.lock() = ConsumerState::Stopped;
    }

    /// Transition to `Stopped`, cancel the pending receive wait, and
    /// join the loop. A handler still running when the grace period
    /// expires is abandoned; its native ack stays pending, so the
    /// broker redelivers where it supports that.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock();
            if *state == ConsumerState::Stopped && self.handle.lock().is_none() {
                debug!(consumer = self.name, "stop on stopped consumer is a no-op");
                return;
            }
            *state = ConsumerState::Stopped;
        }
        let _ = self.shutdown_tx.send(true);

        let handle = self.handle.lock().take();
        if let Some(mut handle) = handle {
            match tokio::time::timeout(self.grace_period, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => error!(
                    consumer = self.name,
                    error = %join_err,
                    "receive loop terminated abnormally before stop"
                ),
                Err(_) => {
                    warn!(
                        consumer = self.name,
                        grace_ms = self.grace_period.as_millis() as u64,
                        "receive loop did not finish within grace period; abandoning in-flight handler"
                    );
                    handle.abort();
                }
            }
        }
    }
}
