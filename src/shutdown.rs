//! Process-wide shutdown: one signal subscription, one cancellation channel,
//! one deadline.

use anyhow::Result;
use futures::stream::{Stream, StreamExt};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[cfg(unix)]
use signal_hook::consts::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
#[cfg(unix)]
use signal_hook_tokio::Signals;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownState {
    Running,
    Signaled,
    Draining,
    Exiting,
}

/// Cancellation handle held by each listener and connection.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<ShutdownState>,
}

impl ShutdownSignal {
    pub fn is_draining(&self) -> bool {
        *self.rx.borrow() >= ShutdownState::Draining
    }

    /// Resolves once draining has begun. A dropped coordinator counts as draining.
    pub async fn cancelled(&mut self) {
        loop {
            let draining = *self.rx.borrow_and_update() >= ShutdownState::Draining;
            if draining || self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

pub struct ShutdownCoordinator {
    deadline: Duration,
    tx: watch::Sender<ShutdownState>,
}

impl ShutdownCoordinator {
    pub fn new(deadline: Duration) -> Self {
        let (tx, _) = watch::channel(ShutdownState::Running);
        Self { deadline, tx }
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    pub fn state(&self) -> ShutdownState {
        *self.tx.borrow()
    }

    fn advance(&self, next: ShutdownState) {
        self.tx.send_if_modified(|state| {
            if *state < next {
                *state = next;
                true
            } else {
                false
            }
        });
    }

    /// Waits for the first termination signal, cancels every subscriber at
    /// once, then waits out the deadline. Does not check whether listeners
    /// have finished.
    pub async fn run<S>(&self, mut signals: S) -> ShutdownState
    where
        S: Stream<Item = i32> + Unpin,
    {
        match signals.next().await {
            Some(signal) => info!(signal, "shutdown signal received"),
            None => warn!("signal stream closed, shutting down"),
        }
        self.advance(ShutdownState::Signaled);

        self.advance(ShutdownState::Draining);
        info!(
            deadline_ms = self.deadline.as_millis() as u64,
            "draining listeners"
        );

        let deadline = tokio::time::sleep(self.deadline);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                Some(signal) = signals.next() => {
                    debug!(signal, "already draining, ignoring signal");
                }
            }
        }

        self.advance(ShutdownState::Exiting);
        info!("shutdown deadline reached");
        ShutdownState::Exiting
    }
}

/// Termination signals, registered once at startup.
pub struct SignalSubscription {
    #[cfg(unix)]
    signals: Signals,
}

#[cfg(unix)]
pub const TERMINATION_SIGNALS: [i32; 4] = [SIGHUP, SIGINT, SIGTERM, SIGQUIT];

impl SignalSubscription {
    #[cfg(unix)]
    pub fn new() -> Result<Self> {
        use anyhow::Context;
        let signals = Signals::new(TERMINATION_SIGNALS)
            .context("Failed to register signal handlers")?;
        Ok(Self { signals })
    }

    #[cfg(not(unix))]
    pub fn new() -> Result<Self> {
        Ok(Self {})
    }

    /// Every delivered signal as a stream. The handlers stay installed for as
    /// long as the stream lives, so repeated signals never fall through to
    /// the default action.
    #[cfg(unix)]
    pub fn into_stream(self) -> impl Stream<Item = i32> + Unpin + Send {
        self.signals
    }

    #[cfg(not(unix))]
    pub fn into_stream(self) -> impl Stream<Item = i32> + Unpin + Send {
        futures::stream::unfold((), |_| async {
            tokio::signal::ctrl_c().await.ok().map(|_| (2, ()))
        })
        .boxed()
    }
}
