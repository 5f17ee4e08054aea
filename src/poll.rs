use tokio::{
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{error, info, warn};

use crate::{error::Result, session::TreadmillSession, transport::Transport};

/// Drives a [`TreadmillSession`] on a fixed cadence
///
/// One tick runs to completion before the next starts. A tick that takes
/// longer than the poll interval delays the next one instead of causing a
/// burst of catch-up ticks.
pub struct PollLoop<T: Transport> {
    session: TreadmillSession<T>,
}

impl<T: Transport> PollLoop<T> {
    /// Wrap a session
    #[must_use]
    pub const fn new(session: TreadmillSession<T>) -> Self {
        Self { session }
    }

    /// Run until shutdown is requested or the session gives up
    ///
    /// The session is disconnected before returning in both cases.
    ///
    /// # Errors
    ///
    /// Returns the fatal error that stopped the session.
    pub async fn run(mut self) -> Result<()> {
        let mut ticker = interval(self.session.config().poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Poll loop started for '{}' every {}ms",
            self.session.config().device_name,
            self.session.config().poll_interval_ms
        );

        let outcome = loop {
            ticker.tick().await;

            if self.session.is_shutdown_requested().await {
                info!("Poll loop stopping on request");
                break Ok(());
            }

            if let Err(e) = self.session.tick().await {
                error!("Poll loop stopped: {}", e);
                break Err(e);
            }
        };

        if let Err(e) = self.session.close().await {
            warn!("Failed to disconnect cleanly: {}", e);
        }

        outcome
    }
}

impl<T: Transport + 'static> PollLoop<T> {
    /// Run on a new tokio task
    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        status, transport::mock::MockTransport, types::SessionConfig, types::SessionState,
        FtmsError,
    };
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_disconnects_after_tick() {
        let transport = MockTransport::new();
        let (session, controller) = TreadmillSession::new(transport.clone(), SessionConfig::default());
        let handle = PollLoop::new(session).spawn();

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(controller.state().await, SessionState::Connected);

        controller.shutdown().await;
        assert_ok!(handle.await.unwrap());

        assert_eq!(controller.state().await, SessionState::Disconnected);
        assert_eq!(transport.inspect(|s| s.disconnects), 1);
        assert!(!transport.inspect(|s| s.connected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_shutdown_reaches_device() {
        let transport = MockTransport::new();
        let (session, controller) = TreadmillSession::new(transport.clone(), SessionConfig::default());
        let handle = PollLoop::new(session).spawn();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(controller.state().await, SessionState::Connected);

        controller.stop().await;
        controller.shutdown().await;
        assert_ok!(handle.await.unwrap());

        assert_eq!(transport.written_commands(), vec![vec![0x08, 0x01]]);
        assert_eq!(transport.inspect(|s| s.disconnects), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_at_poll_interval() {
        let transport = MockTransport::new();
        transport.update(|s| s.advertised_name = "SomethingElse".to_string());
        let (session, controller) = TreadmillSession::new(transport.clone(), SessionConfig::default());
        let handle = PollLoop::new(session).spawn();

        // Ticks at 0s, 1s, 2s and 3s
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        controller.shutdown().await;
        assert_ok!(handle.await.unwrap());

        assert_eq!(transport.inspect(|s| s.scans), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_ends_loop() {
        let transport = MockTransport::new();
        transport.update(|s| s.subscribe_fails = true);
        let config = SessionConfig {
            max_consecutive_failures: 0,
            ..Default::default()
        };
        let (session, controller) = TreadmillSession::new(transport.clone(), config);

        let err = assert_err!(PollLoop::new(session).run().await);

        assert!(matches!(err, FtmsError::FailureLimitExceeded { .. }));
        assert_eq!(controller.status().await, status::error());
        assert_eq!(controller.state().await, SessionState::Disconnected);
    }
}
