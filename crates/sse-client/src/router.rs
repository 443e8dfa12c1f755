//! Message dispatch
//!
//! Reserved `cmd.*` targets drive the connection lifecycle and stop there.
//! Everything else goes to the named-target handler (for other `cmd.*`
//! targets), then the op receiver, then the generic message callback.

use std::sync::Arc;

use tracing::debug;

use crate::client::ServerEventsClient;
use crate::error::Result;
use crate::message::{CommandKind, ConnectionInfo, ServerCommand, ServerEventMessage};

/// Op of lifecycle and target-handler messages
pub const COMMAND_OP: &str = "cmd";
/// Target of the message that announces a new connection
pub const CONNECT_TARGET: &str = "onConnect";

impl ServerEventsClient {
    /// Route one parsed message from connection attempt `generation`
    pub(crate) fn dispatch(&self, msg: ServerEventMessage, generation: u64) -> Result<()> {
        if !self.is_current(generation) {
            debug!(
                event_id = ?msg.event_id,
                generation,
                "Dropping event from a retired connection"
            );
            return Ok(());
        }

        if !msg.selector.is_empty() {
            if msg.op == COMMAND_OP {
                if msg.target == CONNECT_TARGET {
                    return self.process_on_connect(msg, generation);
                }
                if let Some(kind) = CommandKind::from_target(&msg.target) {
                    return self.process_command(kind, msg);
                }
                if let Some(handler) = self.handlers().get(&msg.target) {
                    handler(self, &msg);
                }
            }

            if let Some(receiver) = self.named_receivers().get(&msg.op) {
                receiver(self, &msg);
            }
        }

        debug!(
            event_id = ?msg.event_id,
            "OnMessageReceived on #{} ({})",
            self.connection_display_name(),
            self.channels().join(",")
        );
        if let Some(callback) = self.callbacks().on_message.get() {
            callback(&msg);
        }
        Ok(())
    }

    fn process_on_connect(&self, msg: ServerEventMessage, generation: u64) -> Result<()> {
        let info = Arc::new(ConnectionInfo::from_message(&msg)?);
        if !self.set_connection_info(info.clone(), generation) {
            debug!(id = ?info.id, "Ignoring onConnect of a retired connection");
            return Ok(());
        }

        debug!(
            event_id = ?info.event_id,
            id = ?info.id,
            "OnConnectReceived on #{} ({})",
            self.connection_display_name(),
            self.channels().join(",")
        );
        if let Some(callback) = self.callbacks().on_connect.get() {
            callback(&info);
        }
        Ok(())
    }

    fn process_command(&self, kind: CommandKind, msg: ServerEventMessage) -> Result<()> {
        let command = ServerCommand::from_message(kind, msg)?;

        if kind == CommandKind::Heartbeat {
            self.mark_pulse();
            debug!(event_id = ?command.message.event_id, "OnHeartbeatReceived");
            if let Some(callback) = self.callbacks().on_heartbeat.get() {
                callback(&command);
            }
        }

        debug!(
            kind = ?kind,
            event_id = ?command.message.event_id,
            "OnCommandReceived on #{}",
            self.connection_display_name()
        );
        if let Some(callback) = self.callbacks().on_command.get() {
            callback(&command);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::client::ConnectionState;
    use crate::message::RawEvent;
    use crate::selector::parse_message;

    type Log = Arc<Mutex<Vec<String>>>;

    fn recording_client() -> (ServerEventsClient, Log) {
        let client = ServerEventsClient::new("http://127.0.0.1:9", &["home"]).unwrap();
        let log: Log = Arc::new(Mutex::new(Vec::new()));

        let l = log.clone();
        client.on_message(move |m| l.lock().unwrap().push(format!("message:{}", m.selector)));
        let l = log.clone();
        client.on_command(move |c| l.lock().unwrap().push(format!("command:{:?}", c.kind)));
        let l = log.clone();
        client.on_heartbeat(move |_| l.lock().unwrap().push("heartbeat".to_string()));
        let l = log.clone();
        client.on_connect(move |i| l.lock().unwrap().push(format!("connect:{:?}", i.id)));
        let l = log.clone();
        client.handlers().register("announce", move |_, m| {
            l.lock().unwrap().push(format!("handler:{}", m.target))
        });
        let l = log.clone();
        client.named_receivers().register("chat", move |_, m| {
            l.lock().unwrap().push(format!("receiver:{}", m.op))
        });
        let l = log.clone();
        client.named_receivers().register("cmd", move |_, m| {
            l.lock().unwrap().push(format!("receiver:{}", m.op))
        });

        (client, log)
    }

    fn dispatch(client: &ServerEventsClient, data: &str) -> Result<()> {
        let msg = parse_message(RawEvent {
            event_id: Some(1),
            data: data.to_string(),
        })?;
        client.dispatch(msg, client.current_generation())
    }

    fn take(log: &Log) -> Vec<String> {
        std::mem::take(&mut *log.lock().unwrap())
    }

    #[tokio::test]
    async fn test_op_receiver_then_message() {
        let (client, log) = recording_client();

        dispatch(&client, r#"chat.join { "channel":"/chat" }"#).unwrap();
        assert_eq!(take(&log), vec!["receiver:chat", "message:chat.join"]);
    }

    #[tokio::test]
    async fn test_cmd_target_handler_is_not_exclusive() {
        let (client, log) = recording_client();

        dispatch(&client, "cmd.announce {}").unwrap();
        assert_eq!(
            take(&log),
            vec!["handler:announce", "receiver:cmd", "message:cmd.announce"]
        );
    }

    #[tokio::test]
    async fn test_unmatched_selector_reaches_message_callback() {
        let (client, log) = recording_client();

        dispatch(&client, "home@tv.watch$#player {}").unwrap();
        dispatch(&client, " {}").unwrap();
        assert_eq!(take(&log), vec!["message:tv.watch$#player", "message:"]);
    }

    #[tokio::test]
    async fn test_lifecycle_commands_short_circuit() {
        let (client, log) = recording_client();

        for target in ["onJoin", "onLeave", "onUpdate"] {
            dispatch(&client, &format!(r#"cmd.{target} {{"userId":"1"}}"#)).unwrap();
        }
        assert_eq!(
            take(&log),
            vec!["command:Join", "command:Leave", "command:Update"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_updates_pulse() {
        let (client, log) = recording_client();
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(client.last_pulse_elapsed() >= Duration::from_secs(60));

        dispatch(&client, "cmd.onHeartbeat {}").unwrap();

        assert_eq!(client.last_pulse_elapsed(), Duration::ZERO);
        assert_eq!(take(&log), vec!["heartbeat", "command:Heartbeat"]);
    }

    #[tokio::test]
    async fn test_on_connect_installs_connection_info() {
        let (client, log) = recording_client();

        dispatch(&client, r#"cmd.onConnect {"id":"sub1","displayName":"ann"}"#).unwrap();

        let info = client.connection_info().unwrap();
        assert_eq!(info.id.as_deref(), Some("sub1"));
        assert_eq!(info.heartbeat_interval_ms, 10_000);
        assert_eq!(info.idle_timeout_ms, 30_000);
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(client.connection_display_name(), "ann");
        assert_eq!(take(&log), vec![r#"connect:Some("sub1")"#]);
    }

    #[tokio::test]
    async fn test_on_connect_replaces_previous_info() {
        let (client, _log) = recording_client();

        dispatch(&client, r#"cmd.onConnect {"id":"first"}"#).unwrap();
        let first = client.connection_info().unwrap();
        dispatch(&client, r#"cmd.onConnect {"id":"second"}"#).unwrap();

        assert_eq!(first.id.as_deref(), Some("first"));
        assert_eq!(client.connection_info().unwrap().id.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_retired_generation_is_dropped() {
        let (client, log) = recording_client();
        let stale = client.current_generation();
        client.stop().await;

        let msg = parse_message(RawEvent {
            event_id: Some(1),
            data: r#"cmd.onConnect {"id":"late"}"#.to_string(),
        })
        .unwrap();
        client.dispatch(msg, stale).unwrap();

        assert!(client.connection_info().is_none());
        assert_eq!(client.heartbeat_state(), crate::HeartbeatState::Idle);
        assert!(take(&log).is_empty());
    }

    #[tokio::test]
    async fn test_bad_lifecycle_payload_is_protocol_error() {
        let (client, log) = recording_client();

        let err = dispatch(&client, "cmd.onJoin {oops").unwrap_err();
        assert!(err.is_protocol());
        assert!(take(&log).is_empty());
    }
}
