//! End-to-end session orchestration.
//!
//! [`SessionRunner`] drives one session through its whole lifecycle:
//!
//! ```text
//! Idle -> Connecting -> Configuring -> Subscribed -> Streaming -> Unsubscribing -> Disconnected
//! ```
//!
//! Any failure jumps straight to `Disconnected` after a best-effort
//! unsubscribe and disconnect, and the first error is returned. Progress can
//! be observed through [`SessionRunner::watch_state`].

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use myo_types::ModeConfig;
use myo_types::uuid::EMG_DATA;

use crate::error::{Error, Result};
use crate::pipeline::{ChannelStreams, PipelineOptions, PipelineStatsSnapshot, StreamingPipeline};
use crate::retry::{RetryConfig, with_retry};
use crate::session::DeviceSession;
use crate::traits::{Connector, ConsumerAction, NoSetup, SetupHook};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Configuring,
    Subscribed,
    Streaming,
    Unsubscribing,
    Disconnected,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Configuring => "configuring",
            SessionState::Subscribed => "subscribed",
            SessionState::Streaming => "streaming",
            SessionState::Unsubscribing => "unsubscribing",
            SessionState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// When streaming should end.
#[derive(Debug, Clone)]
pub enum StopCondition {
    /// Stream for a fixed wall-clock duration.
    After(Duration),
    /// Stream until the token is cancelled.
    Signal(CancellationToken),
    /// Whichever of the two comes first.
    AfterOrSignal(Duration, CancellationToken),
}

impl StopCondition {
    fn into_parts(self) -> (CancellationToken, Option<Duration>) {
        match self {
            StopCondition::After(limit) => (CancellationToken::new(), Some(limit)),
            // A child token so that our own cancellation never leaks upward.
            StopCondition::Signal(token) => (token.child_token(), None),
            StopCondition::AfterOrSignal(limit, token) => (token.child_token(), Some(limit)),
        }
    }
}

/// Settings for one run.
#[derive(Debug, Clone, Default)]
pub struct RunnerConfig {
    /// Modes written to the device before streaming.
    pub mode: ModeConfig,
    pub pipeline: PipelineOptions,
    /// Retry policy for establishing the connection. No retries by default.
    pub connect_retry: RetryConfig,
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<()> {
        self.pipeline.validate()?;
        self.connect_retry.validate()
    }
}

/// Runs sessions against devices reached through a [`Connector`].
pub struct SessionRunner<C: Connector> {
    connector: C,
    config: RunnerConfig,
    state: watch::Sender<SessionState>,
    stats: watch::Sender<PipelineStatsSnapshot>,
}

impl<C: Connector> SessionRunner<C> {
    pub fn new(connector: C, config: RunnerConfig) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        let (stats, _) = watch::channel(PipelineStatsSnapshot::default());
        Self {
            connector,
            config,
            state,
            stats,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Subscribe to lifecycle transitions.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Pipeline counters from the most recent run.
    pub fn stats(&self) -> PipelineStatsSnapshot {
        *self.stats.borrow()
    }

    fn transition(&self, next: SessionState) {
        debug!("Session state: {} -> {}", self.state(), next);
        self.state.send_replace(next);
    }

    /// Stream EMG from `address` until `stop`, calling `action` after every
    /// drain, and return everything that was received.
    ///
    /// `setup` runs once after connecting and before any command is written.
    pub async fn run<S, A>(
        &self,
        address: &str,
        setup: &mut S,
        action: &mut A,
        stop: StopCondition,
    ) -> Result<ChannelStreams>
    where
        S: SetupHook + ?Sized,
        A: ConsumerAction + ?Sized,
    {
        self.config.validate()?;
        self.transition(SessionState::Connecting);

        let connected = with_retry(&self.config.connect_retry, "connect", || {
            DeviceSession::connect(&self.connector, address)
        })
        .await;
        let session = match connected {
            Ok(session) => session,
            Err(e) => {
                warn!("Connection to {} failed: {}", address, e);
                self.transition(SessionState::Disconnected);
                return Err(e);
            }
        };

        let mut pipeline = StreamingPipeline::new(self.config.pipeline.clone());
        let streamed = self
            .stream(&session, &mut pipeline, setup, action, stop)
            .await;

        if streamed.is_ok() {
            self.transition(SessionState::Unsubscribing);
        }
        // Teardown failures never replace the session's own outcome.
        if let Err(e) = session.unsubscribe_all().await {
            warn!("Unsubscribe during teardown failed: {}", e);
        }
        if let Err(e) = session.disconnect().await {
            warn!("Disconnect during teardown failed: {}", e);
        }
        self.transition(SessionState::Disconnected);

        match streamed {
            Ok(()) => {
                // Frames delivered before notifications stopped.
                pipeline.drain_once();
                let stats = pipeline.stats();
                self.stats.send_replace(stats);
                info!(
                    frames = stats.frames_drained,
                    malformed = stats.frames_malformed,
                    group_gaps = stats.group_gaps,
                    "Session finished"
                );
                Ok(pipeline.into_streams())
            }
            Err(e) => {
                self.stats.send_replace(pipeline.stats());
                warn!("Session aborted: {}", e);
                Err(e)
            }
        }
    }

    async fn stream<S, A>(
        &self,
        session: &DeviceSession<C::Transport>,
        pipeline: &mut StreamingPipeline,
        setup: &mut S,
        action: &mut A,
        stop: StopCondition,
    ) -> Result<()>
    where
        S: SetupHook + ?Sized,
        A: ConsumerAction + ?Sized,
    {
        self.transition(SessionState::Configuring);
        setup.setup()?;
        session.configure(&self.config.mode).await?;

        session
            .subscribe(&EMG_DATA, Arc::new(pipeline.producer()))
            .await?;
        self.transition(SessionState::Subscribed);

        let (cancel, limit) = stop.into_parts();
        self.transition(SessionState::Streaming);
        match limit {
            Some(limit) => {
                tokio::select! {
                    _ = pipeline.run_consumer_loop(action, &cancel) => {}
                    _ = tokio::time::sleep(limit) => {
                        debug!("Streaming duration of {:?} elapsed", limit);
                    }
                }
            }
            None => pipeline.run_consumer_loop(action, &cancel).await,
        }
        Ok(())
    }
}

/// Run one session with no setup hook.
pub async fn run_session<C, A>(
    connector: C,
    address: &str,
    config: RunnerConfig,
    action: &mut A,
    stop: StopCondition,
) -> Result<ChannelStreams>
where
    C: Connector,
    A: ConsumerAction + ?Sized,
{
    SessionRunner::new(connector, config)
        .run(address, &mut NoSetup, action, stop)
        .await
}

/// Convert a setup failure from any error type.
pub fn setup_error(err: impl std::fmt::Display) -> Error {
    Error::Setup(err.to_string())
}
