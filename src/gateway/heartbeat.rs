//! Periodic heartbeat sender shared by the gateway and voice signaling state
//! machines.
//!
//! Both sockets need the same shape of liveness check: send a payload every
//! `interval`, track whether the peer acked it, and declare the connection
//! a zombie (forcing a close as if the peer had sent code 1006) if no ack
//! shows up within [`ZOMBIE_MULTIPLIER`] intervals. Python's implementation
//! ran this as an OS thread calling back into the event loop; the
//! equivalent here is a `tokio` task that submits its payload and zombie
//! notification over `flume` channels, so it composes with either socket's
//! own task without needing to reach into it directly.
//!
//! [`ZOMBIE_MULTIPLIER`]: crate::constants::ZOMBIE_MULTIPLIER

use crate::constants::ZOMBIE_MULTIPLIER;

use flume::Sender;
use tokio::{
    task::JoinHandle,
    time::{interval, Duration, Instant},
};

/// Handle to a running heartbeat task. Dropping this aborts the task.
pub struct HeartbeatDriver {
    task: JoinHandle<()>,
    ack_tx: Sender<()>,
}

impl HeartbeatDriver {
    /// Starts a heartbeat task.
    ///
    /// `make_payload` is called once per tick to build the outbound
    /// heartbeat message (an `op: HEARTBEAT` frame carrying either the
    /// gateway's last-seen sequence number, or the voice socket's
    /// millisecond timestamp nonce); `outbound` is the channel that message
    /// is handed to for sending; `dead` is signalled once, at most, if the
    /// connection is declared a zombie.
    pub fn start<T, F>(
        interval_period: Duration,
        mut make_payload: F,
        outbound: Sender<T>,
        dead: Sender<()>,
    ) -> Self
    where
        T: Send + 'static,
        F: FnMut() -> T + Send + 'static,
    {
        let (ack_tx, ack_rx) = flume::unbounded::<()>();
        let zombie_after = interval_period * ZOMBIE_MULTIPLIER;

        let task = tokio::spawn(async move {
            let mut ticker = interval(interval_period);
            let mut last_ack = Instant::now();

            loop {
                ticker.tick().await;

                while ack_rx.try_recv().is_ok() {
                    last_ack = Instant::now();
                }

                if last_ack.elapsed() > zombie_after {
                    let _ = dead.send_async(()).await;
                    break;
                }

                if outbound.send_async(make_payload()).await.is_err() {
                    break;
                }
            }
        });

        Self { task, ack_tx }
    }

    /// Records that the peer acknowledged the most recent heartbeat.
    pub fn ack(&self) {
        let _ = self.ack_tx.send(());
    }
}

impl Drop for HeartbeatDriver {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration as StdDuration;

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn sends_a_payload_every_tick() {
        let (out_tx, out_rx) = flume::unbounded::<u32>();
        let (dead_tx, _dead_rx) = flume::unbounded::<()>();

        let mut n = 0u32;
        let driver = HeartbeatDriver::start(
            Duration::from_millis(10),
            move || {
                n += 1;
                n
            },
            out_tx,
            dead_tx,
        );

        tokio::time::advance(StdDuration::from_millis(35)).await;
        tokio::task::yield_now().await;

        let mut seen = 0;
        while out_rx.try_recv().is_ok() {
            seen += 1;
        }
        assert!(seen >= 2, "expected multiple heartbeats, saw {seen}");
        drop(driver);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn declares_zombie_after_missed_acks() {
        let (out_tx, _out_rx) = flume::unbounded::<u32>();
        let (dead_tx, dead_rx) = flume::unbounded::<()>();

        let driver = HeartbeatDriver::start(Duration::from_millis(10), || 0u32, out_tx, dead_tx);

        // Never ack; after > 2x the interval the task should self-report dead.
        tokio::time::advance(StdDuration::from_millis(100)).await;
        tokio::task::yield_now().await;

        assert!(dead_rx.try_recv().is_ok());
        drop(driver);
    }
}
