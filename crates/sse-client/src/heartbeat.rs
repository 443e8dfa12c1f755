//! Heartbeat scheduler
//!
//! While connected, pings the server's heartbeat URL every
//! `heartbeat_interval_ms`. A fresh timer is armed after every successful
//! tick. Liveness of the connection itself is judged from the last heartbeat
//! *message* received over the stream; a successful ping does not count.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::debug;
use url::Url;

use crate::client::ServerEventsClient;
use crate::error::{ClientError, Result};
use crate::message::ConnectionInfo;

/// Heartbeat scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HeartbeatState {
    /// No heartbeat URL known, or cancelled
    Idle,
    /// Waiting for the next tick
    Armed,
    /// A tick is checking staleness or sending the ping
    Firing,
}

#[derive(Debug)]
struct Slot {
    /// Bumped on every arm/cancel so a superseded task cannot write state
    epoch: u64,
    /// Highest connection generation torn down; it may never be re-armed
    retired: u64,
    state: HeartbeatState,
    task: Option<JoinHandle<()>>,
}

#[derive(Debug, Clone)]
pub(crate) struct HeartbeatScheduler {
    slot: Arc<Mutex<Slot>>,
}

impl Default for HeartbeatScheduler {
    fn default() -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot {
                epoch: 0,
                retired: 0,
                state: HeartbeatState::Idle,
                task: None,
            })),
        }
    }
}

impl HeartbeatScheduler {
    pub fn state(&self) -> HeartbeatState {
        self.slot.lock().state
    }

    /// Cancel any running timer and, if the connection announces a heartbeat
    /// URL, arm a new one. Failures are reported for `generation`.
    ///
    /// Returns false without touching the timer when `generation` has already
    /// been retired by [`cancel`](Self::cancel).
    pub fn arm(
        &self,
        client: &ServerEventsClient,
        info: Arc<ConnectionInfo>,
        generation: u64,
    ) -> bool {
        let mut slot = self.slot.lock();
        if generation <= slot.retired {
            debug!(
                generation,
                retired = slot.retired,
                "Not arming heartbeat for a retired connection"
            );
            return false;
        }
        if let Some(task) = slot.task.take() {
            task.abort();
        }
        slot.epoch += 1;
        slot.state = HeartbeatState::Idle;

        if info.heartbeat_url.is_none() {
            return true;
        }

        let epoch = slot.epoch;
        let interval_ms = info.heartbeat_interval_ms;
        let idle_timeout_ms = info.idle_timeout_ms;
        let interval = Duration::from_millis(interval_ms);
        let scheduler = self.clone();
        let client = client.clone();

        slot.state = HeartbeatState::Armed;
        slot.task = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                scheduler.transition(epoch, HeartbeatState::Firing);

                match client.send_heartbeat(&info).await {
                    Ok(()) => scheduler.transition(epoch, HeartbeatState::Armed),
                    Err(e) => {
                        debug!(error = %e, "Error from heartbeat");
                        scheduler.transition(epoch, HeartbeatState::Idle);
                        client.handle_failure(e, generation);
                        return;
                    }
                }
            }
        }));

        debug!(interval_ms, idle_timeout_ms, "Heartbeat armed");
        true
    }

    /// Stop the timer and retire every generation up to `generation`;
    /// an in-flight tick is abandoned
    pub fn cancel(&self, generation: u64) {
        let mut slot = self.slot.lock();
        if let Some(task) = slot.task.take() {
            task.abort();
            debug!("Heartbeat cancelled");
        }
        slot.retired = slot.retired.max(generation);
        slot.epoch += 1;
        slot.state = HeartbeatState::Idle;
    }

    fn transition(&self, epoch: u64, state: HeartbeatState) {
        let mut slot = self.slot.lock();
        if slot.epoch == epoch {
            slot.state = state;
        }
    }
}

impl ServerEventsClient {
    /// Run one heartbeat tick now.
    ///
    /// Does nothing when not connected or when the server announced no
    /// heartbeat URL. Unlike scheduled ticks, a failure is returned to the
    /// caller instead of restarting the connection.
    pub async fn heartbeat(&self) -> Result<()> {
        match self.connection_info() {
            Some(info) if info.heartbeat_url.is_some() => self.send_heartbeat(&info).await,
            _ => Ok(()),
        }
    }

    /// Staleness check followed by the heartbeat GET
    pub(crate) async fn send_heartbeat(&self, info: &ConnectionInfo) -> Result<()> {
        let Some(heartbeat_url) = info.heartbeat_url.as_deref() else {
            return Ok(());
        };

        let elapsed = self.last_pulse_elapsed();
        if elapsed > Duration::from_millis(info.idle_timeout_ms) {
            return Err(ClientError::HeartbeatTimeout {
                elapsed_ms: elapsed.as_millis() as u64,
            });
        }

        let url = self.resolve_url(heartbeat_url)?;
        let mut request = self.http_client().get(url.clone()).timeout(self.request_timeout());
        if let Some(filter) = self.heartbeat_request_filter() {
            request = filter(request);
        }

        debug!("Sending heartbeat...");
        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::server_error(status, message));
        }

        debug!(%url, "Heartbeat sent");
        Ok(())
    }

    /// Server-provided URLs are normally absolute; relative ones resolve
    /// against the base URI.
    pub(crate) fn resolve_url(&self, url: &str) -> Result<Url> {
        match Url::parse(url) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let base = Url::parse(&format!("{}/", self.base_uri().trim_end_matches('/')))?;
                Ok(base.join(url.trim_start_matches('/'))?)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_IDLE_TIMEOUT_MS};

    fn info(heartbeat_url: Option<&str>, idle_timeout_ms: u64) -> ConnectionInfo {
        ConnectionInfo {
            event_id: None,
            id: Some("c1".into()),
            heartbeat_url: heartbeat_url.map(String::from),
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            idle_timeout_ms,
            unregister_url: None,
            user_id: None,
            display_name: None,
            is_authenticated: false,
            profile_url: None,
        }
    }

    fn client() -> ServerEventsClient {
        ServerEventsClient::new("http://127.0.0.1:9/app", &["home"]).unwrap()
    }

    #[tokio::test]
    async fn test_arm_without_url_stays_idle() {
        let client = client();
        let scheduler = HeartbeatScheduler::default();

        assert!(scheduler.arm(&client, Arc::new(info(None, DEFAULT_IDLE_TIMEOUT_MS)), 1));
        assert_eq!(scheduler.state(), HeartbeatState::Idle);
    }

    #[tokio::test]
    async fn test_arm_then_cancel() {
        let client = client();
        let scheduler = HeartbeatScheduler::default();

        scheduler.arm(
            &client,
            Arc::new(info(Some("http://127.0.0.1:9/hb"), DEFAULT_IDLE_TIMEOUT_MS)),
            1,
        );
        assert_eq!(scheduler.state(), HeartbeatState::Armed);

        scheduler.cancel(1);
        assert_eq!(scheduler.state(), HeartbeatState::Idle);
    }

    #[tokio::test]
    async fn test_retired_generation_is_not_rearmed() {
        let client = client();
        let scheduler = HeartbeatScheduler::default();
        let info = Arc::new(info(Some("http://127.0.0.1:9/hb"), DEFAULT_IDLE_TIMEOUT_MS));

        scheduler.cancel(3);

        assert!(!scheduler.arm(&client, info.clone(), 2));
        assert!(!scheduler.arm(&client, info.clone(), 3));
        assert_eq!(scheduler.state(), HeartbeatState::Idle);

        assert!(scheduler.arm(&client, info, 4));
        assert_eq!(scheduler.state(), HeartbeatState::Armed);
        scheduler.cancel(4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_pulse_times_out_without_request() {
        let client = client();
        client.mark_pulse();
        tokio::time::advance(Duration::from_millis(DEFAULT_IDLE_TIMEOUT_MS + 1)).await;

        // The URL is unreachable; a timeout error proves no request was sent.
        let err = client
            .send_heartbeat(&info(Some("http://127.0.0.1:9/hb"), DEFAULT_IDLE_TIMEOUT_MS))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::HeartbeatTimeout { elapsed_ms } if elapsed_ms > DEFAULT_IDLE_TIMEOUT_MS));
    }

    #[tokio::test]
    async fn test_heartbeat_noop_when_not_connected() {
        assert!(client().heartbeat().await.is_ok());
    }

    #[test]
    fn test_resolve_url() {
        let client = client();
        assert_eq!(
            client.resolve_url("http://other/hb").unwrap().as_str(),
            "http://other/hb"
        );
        assert_eq!(
            client.resolve_url("/event-heartbeat?id=1").unwrap().as_str(),
            "http://127.0.0.1:9/app/event-heartbeat?id=1"
        );
    }
}
