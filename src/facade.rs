//! Background session lifecycle
//!
//! `connect()` runs for the whole session. [`launch`] moves it onto a
//! runtime task and hands back a [`SessionHandle`] the caller uses to cancel
//! it. However the task ends, `shutdown()` runs on a separately spawned task
//! so it completes even when the session task itself was aborted.

use crate::callbacks::LiveCallbacks;
use crate::config::LiveConfig;
use crate::error::{LiveError, Result};
use crate::session::GeminiLiveClient;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A running session: the client plus the task driving its connection.
pub struct SessionHandle {
    client: GeminiLiveClient,
    cancel: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl SessionHandle {
    pub fn client(&self) -> &GeminiLiveClient {
        &self.client
    }

    /// Stop the session. The task shuts the client down and then finishes.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Abort the session task outright. Shutdown still runs on a detached task.
    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the session task and return how `connect()` ended.
    pub async fn join(self) -> Result<()> {
        self.task.await.map_err(|e| LiveError::Task(e.to_string()))?
    }
}

/// Build a client over the default transport and launch it on `runtime`.
pub fn create_session<C: LiveCallbacks + 'static>(
    runtime: &Handle,
    config: LiveConfig,
    callbacks: C,
) -> Result<SessionHandle> {
    let client = GeminiLiveClient::builder(config).callbacks(callbacks).build()?;
    Ok(launch(runtime, client))
}

/// Run `client.connect()` on `runtime` and return immediately.
pub fn launch(runtime: &Handle, client: GeminiLiveClient) -> SessionHandle {
    let cancel = CancellationToken::new();
    let task = runtime.spawn(run_session(runtime.clone(), client.clone(), cancel.clone()));
    SessionHandle {
        client,
        cancel,
        task,
    }
}

async fn run_session(runtime: Handle, client: GeminiLiveClient, cancel: CancellationToken) -> Result<()> {
    let guard = ShutdownGuard {
        client: Some(client.clone()),
        runtime,
    };
    let result = tokio::select! {
        result = client.connect() => result,
        _ = cancel.cancelled() => {
            info!("Session task cancelled");
            Ok(())
        }
    };
    guard.finish().await;
    result
}

/// Runs `shutdown()` exactly once, detached from the session task.
struct ShutdownGuard {
    client: Option<GeminiLiveClient>,
    runtime: Handle,
}

impl ShutdownGuard {
    async fn finish(mut self) {
        if let Some(client) = self.client.take() {
            let shutdown = self.runtime.spawn(async move { client.shutdown().await });
            if let Err(e) = shutdown.await {
                warn!("Session shutdown task failed: {}", e);
            }
        }
    }
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            debug!("Session task dropped, shutting down in the background");
            self.runtime.spawn(async move { client.shutdown().await });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{memory, Channel, Connector, Frame};
    use crate::testing::{Event, RecordingCallbacks, SolidScreen};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    /// Connector whose `open` never completes.
    struct StalledConnector;

    #[async_trait]
    impl Connector for StalledConnector {
        async fn open(&self, _url: &str) -> Result<Channel> {
            std::future::pending().await
        }
    }

    async fn wait_until<F: Fn() -> bool>(condition: F) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn test_cancel_mid_connect_still_shuts_down() {
        let recorder = RecordingCallbacks::default();
        let client = GeminiLiveClient::builder(LiveConfig::default())
            .shared_callbacks(Arc::new(recorder.clone()))
            .connector(StalledConnector)
            .build()
            .unwrap();

        let handle = launch(&Handle::current(), client.clone());
        wait_until(|| client.phase() == crate::state::SessionPhase::Connecting).await;
        assert!(!handle.is_finished());

        handle.cancel();
        assert!(handle.join().await.is_ok());
        assert!(client.phase().is_idle());
        assert!(!client.is_connected());
        assert_eq!(recorder.count(&Event::Connected), 0);
    }

    #[tokio::test]
    async fn test_server_close_finishes_task() {
        let recorder = RecordingCallbacks::default();
        let (connector, mut peer) = memory::pair();
        let client = GeminiLiveClient::builder(LiveConfig::default())
            .shared_callbacks(Arc::new(recorder.clone()))
            .connector(connector)
            .build()
            .unwrap();

        let handle = launch(&Handle::current(), client);
        assert!(peer.recv().await.unwrap().contains("setup"));
        assert!(handle.client().is_connected());

        peer.push(Frame::Close(None));
        let client = handle.client().clone();
        assert!(handle.join().await.is_ok());
        assert!(!client.is_connected());
        assert_eq!(recorder.count(&Event::Disconnected), 1);
    }

    #[tokio::test]
    async fn test_abort_runs_shutdown_detached() {
        let recorder = RecordingCallbacks::default();
        let (connector, mut peer) = memory::pair();
        let client = GeminiLiveClient::builder(LiveConfig::default())
            .shared_callbacks(Arc::new(recorder.clone()))
            .connector(connector)
            .screen_source(SolidScreen::new(32, 32))
            .build()
            .unwrap();

        let handle = launch(&Handle::current(), client.clone());
        peer.recv().await.unwrap();
        client.start_audio_input();
        assert!(client.start_screen_capture());

        handle.abort();
        wait_until(|| client.phase().is_idle() && !client.is_screen_capture_active()).await;

        assert!(!client.is_connected());
        assert!(!client.is_user_speaking());
        assert_eq!(recorder.count(&Event::Disconnected), 1);
        assert_eq!(recorder.count(&Event::CaptureStopped), 1);
        assert!(matches!(handle.join().await, Err(LiveError::Task(_))));
    }
}
