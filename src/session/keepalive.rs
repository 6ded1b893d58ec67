//! # Keepalive Supervisor
//!
//! Writes a heartbeat to the telephony leg on a fixed interval so the switch
//! keeps the AudioSocket connection open while the pipeline is silent.
//!
//! ## Retry Policy:
//! A failed heartbeat is retried with exponential backoff, up to
//! `max_attempts` writes in total. When every attempt fails the supervisor
//! logs and exits. It does not cancel the session; the media relay notices the
//! broken connection on its next read.

use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::audio::audiosocket::{write_keepalive, TelephonyWriter};
use crate::config::KeepaliveConfig;
use crate::error::{BridgeError, BridgeResult};

#[derive(Debug, Clone)]
pub struct KeepaliveSupervisor {
    interval: Duration,
    max_attempts: u32,
    initial_backoff: Duration,
    multiplier: f64,
}

impl KeepaliveSupervisor {
    pub fn new(config: &KeepaliveConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.interval_ms.max(1)),
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            multiplier: config.multiplier,
        }
    }

    /// Tick until the token fires or a heartbeat exhausts its retries.
    pub async fn run(&self, token: CancellationToken, writer: TelephonyWriter) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Keepalive stopped by session cancellation");
                    return;
                }
                _ = ticker.tick() => {}
            }

            match self.write_with_retry(&token, &writer).await {
                Ok(()) => {}
                Err(BridgeError::Cancelled) => return,
                Err(err) => {
                    error!(
                        attempts = self.max_attempts,
                        error = %err,
                        "Keepalive attempts exhausted, stopping supervisor"
                    );
                    return;
                }
            }
        }
    }

    /// One heartbeat with bounded retries.
    ///
    /// ## Returns:
    /// - `Ok(())` once a write succeeds
    /// - `Err(Cancelled)` if the session ends while backing off
    /// - the last write error after `max_attempts` failures
    async fn write_with_retry(
        &self,
        token: &CancellationToken,
        writer: &TelephonyWriter,
    ) -> BridgeResult<()> {
        let mut delay = self.initial_backoff;
        let mut attempt = 1;

        loop {
            let err = match write_keepalive(token, writer).await {
                Ok(()) => return Ok(()),
                Err(BridgeError::Cancelled) => return Err(BridgeError::Cancelled),
                Err(err) => err,
            };

            if attempt >= self.max_attempts {
                return Err(err);
            }

            warn!(attempt, backoff_ms = delay.as_millis() as u64, error = %err, "Keepalive write failed, retrying");

            tokio::select! {
                _ = token.cancelled() => return Err(BridgeError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }

            delay = delay.mul_f64(self.multiplier);
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::audiosocket::{telephony_writer, KEEPALIVE_FRAME};
    use std::io;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};
    use tokio::io::{duplex, AsyncReadExt, AsyncWrite};
    use tokio::time::Instant;

    /// Writer whose every write fails and records when it was attempted.
    #[derive(Clone, Default)]
    struct FailingWriter {
        attempts: Arc<Mutex<Vec<Instant>>>,
    }

    impl AsyncWrite for FailingWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.attempts.lock().unwrap().push(Instant::now());
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe")))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn supervisor() -> KeepaliveSupervisor {
        KeepaliveSupervisor::new(&KeepaliveConfig {
            interval_ms: 1_000,
            max_attempts: 3,
            initial_backoff_ms: 100,
            multiplier: 2.0,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_writes_exhaust_attempts_with_backoff() {
        let failing = FailingWriter::default();
        let attempts = failing.attempts.clone();
        let token = CancellationToken::new();

        let started = Instant::now();
        supervisor().run(token.clone(), telephony_writer(failing)).await;

        let attempts = attempts.lock().unwrap();
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[0] - started, Duration::from_millis(1_000));
        assert_eq!(attempts[1] - attempts[0], Duration::from_millis(100));
        assert_eq!(attempts[2] - attempts[1], Duration::from_millis(200));
        assert!(!token.is_cancelled(), "exhaustion must not cancel the session");
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_heartbeat_each_interval() {
        let (local, mut remote) = duplex(1024);
        let token = CancellationToken::new();
        let task = tokio::spawn({
            let token = token.clone();
            async move { supervisor().run(token, telephony_writer(local)).await }
        });

        for _ in 0..2 {
            let mut buf = [0u8; 4];
            remote.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf, KEEPALIVE_FRAME);
        }

        token.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_clamped() {
        let zero = KeepaliveSupervisor::new(&KeepaliveConfig {
            interval_ms: 0,
            max_attempts: 1,
            initial_backoff_ms: 100,
            multiplier: 2.0,
        });
        assert_eq!(zero.interval, Duration::from_millis(1));

        let (local, mut remote) = duplex(1024);
        let token = CancellationToken::new();
        let task = tokio::spawn({
            let token = token.clone();
            async move { zero.run(token, telephony_writer(local)).await }
        });

        let mut buf = [0u8; 4];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, KEEPALIVE_FRAME);

        token.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_exits_on_cancellation() {
        let (local, _remote) = duplex(1024);
        let token = CancellationToken::new();
        token.cancel();

        supervisor().run(token, telephony_writer(local)).await;
    }
}
