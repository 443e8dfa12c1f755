//! Selector parsing
//!
//! A frame's `data` value is `<selector> <json>` where the selector is
//! `[channel@]op.target[$cssSelector]`.

use crate::error::{ClientError, Result};
use crate::message::{RawEvent, ServerEventMessage};

/// Break a raw frame into its routing parts
pub fn parse_message(raw: RawEvent) -> Result<ServerEventMessage> {
    let (selector_part, json) = raw
        .data
        .split_once(' ')
        .ok_or_else(|| ClientError::MalformedMessage(raw.data.clone()))?;

    let (channel, selector) = match selector_part.split_once('@') {
        Some((channel, selector)) => (Some(channel.to_string()), selector),
        None => (None, selector_part),
    };

    let mut msg = ServerEventMessage {
        event_id: raw.event_id,
        channel,
        selector: selector.to_string(),
        json: json.to_string(),
        ..Default::default()
    };

    if !selector.is_empty() {
        let (op, target) = selector
            .split_once('.')
            .ok_or_else(|| ClientError::InvalidSelector(selector.to_string()))?;

        let (target, css_selector) = match target.split_once('$') {
            Some((target, css)) => (target, Some(css.to_string())),
            None => (target, None),
        };

        msg.op = op.to_string();
        msg.target = target.replace("%20", " ");
        msg.css_selector = css_selector;
    }

    msg.data = raw.data;
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn raw(data: &str) -> RawEvent {
        RawEvent {
            event_id: Some(9),
            data: data.to_string(),
        }
    }

    #[rstest]
    #[case("chan@op.target$css {}", Some("chan"), "op", "target", Some("css"))]
    #[case("op.target$css {}", None, "op", "target", Some("css"))]
    #[case("chan@op.target {}", Some("chan"), "op", "target", None)]
    #[case("op.target {}", None, "op", "target", None)]
    #[case("cmd.onConnect {}", None, "cmd", "onConnect", None)]
    #[case("tv.watch$#player.main {}", None, "tv", "watch", Some("#player.main"))]
    #[case("css.background-image$#top {}", None, "css", "background-image", Some("#top"))]
    #[case("a.b.c {}", None, "a", "b.c", None)]
    fn test_selector_parts(
        #[case] data: &str,
        #[case] channel: Option<&str>,
        #[case] op: &str,
        #[case] target: &str,
        #[case] css: Option<&str>,
    ) {
        let msg = parse_message(raw(data)).unwrap();
        assert_eq!(msg.channel.as_deref(), channel);
        assert_eq!(msg.op, op);
        assert_eq!(msg.target, target);
        assert_eq!(msg.css_selector.as_deref(), css);
        assert_eq!(msg.json, "{}");
        assert_eq!(msg.data, data);
        assert_eq!(msg.event_id, Some(9));
    }

    #[test]
    fn test_chat_join_split_on_first_dot() {
        let msg = parse_message(raw(r#"chat.join { "channel":"/chat" }"#)).unwrap();
        assert_eq!(msg.selector, "chat.join");
        assert_eq!(msg.op, "chat");
        assert_eq!(msg.target, "join");
        assert_eq!(msg.css_selector, None);
        assert_eq!(msg.json, r#"{ "channel":"/chat" }"#);
    }

    #[test]
    fn test_target_space_decoding() {
        let msg = parse_message(raw("home@chat.Hello%20World$a%20b {}")).unwrap();
        assert_eq!(msg.selector, "chat.Hello%20World$a%20b");
        assert_eq!(msg.target, "Hello World");
        assert_eq!(msg.css_selector.as_deref(), Some("a%20b"));
    }

    #[test]
    fn test_empty_selector_skips_routing() {
        let msg = parse_message(raw(" {\"x\":1}")).unwrap();
        assert_eq!(msg.selector, "");
        assert_eq!(msg.op, "");
        assert_eq!(msg.target, "");

        let msg = parse_message(raw("chan@ {}")).unwrap();
        assert_eq!(msg.channel.as_deref(), Some("chan"));
        assert_eq!(msg.selector, "");
    }

    #[test]
    fn test_missing_space_is_malformed() {
        let err = parse_message(raw("cmd.onConnect")).unwrap_err();
        assert!(matches!(err, ClientError::MalformedMessage(ref d) if d == "cmd.onConnect"));

        assert!(matches!(
            parse_message(raw("")),
            Err(ClientError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_selector_without_dot_is_invalid() {
        let err = parse_message(raw("home@onConnect {}")).unwrap_err();
        assert!(matches!(err, ClientError::InvalidSelector(ref s) if s == "onConnect"));
        assert!(err.is_protocol());
    }
}
