//! Video-style embed helpers
//!
//! The video iframe has no reliable completion callback. It does post loosely
//! typed state messages to the host page, which we inspect for the "ended"
//! state code.

use serde_json::Value;
use url::Url;

/// Origin allowed to post player state messages
pub const VIDEO_ORIGIN: &str = "https://www.youtube.com";

/// Player state code meaning "ended"
pub const STATE_ENDED: i64 = 0;

const EMBED_BASE_URL: &str = "https://www.youtube.com/embed/";

/// Returns true if `message` from `origin` says playback ended.
///
/// Accepts the message as JSON text or as JSON text wrapped in a JSON string.
/// Anything unparseable or from another origin is ignored.
pub fn is_ended_message(origin: &str, message: &str) -> bool {
    if origin != VIDEO_ORIGIN {
        return false;
    }

    let value = match serde_json::from_str::<Value>(message) {
        Ok(Value::String(inner)) => match serde_json::from_str::<Value>(&inner) {
            Ok(value) => value,
            Err(_) => return false,
        },
        Ok(value) => value,
        Err(_) => return false,
    };

    let is_state_event = matches!(
        value.get("event").and_then(Value::as_str),
        Some("onStateChange") | Some("video-progress")
    );
    if !is_state_event {
        return false;
    }

    let state = value.get("info").or_else(|| value.get("data"));
    match state {
        Some(Value::Number(code)) => code.as_i64() == Some(STATE_ENDED),
        Some(Value::Object(info)) => {
            info.get("playerState").and_then(Value::as_i64) == Some(STATE_ENDED)
        }
        _ => false,
    }
}

/// Build the embed URL for a video starting at `start_secs`
pub fn embed_url(
    video_id: &str,
    start_secs: u64,
    page_origin: &str,
) -> Result<Url, url::ParseError> {
    let base = Url::parse(EMBED_BASE_URL)?;
    let mut url = base.join(video_id)?;
    url.query_pairs_mut()
        .append_pair("autoplay", "1")
        .append_pair("controls", "0")
        .append_pair("modestbranding", "1")
        .append_pair("rel", "0")
        .append_pair("start", &start_secs.to_string())
        .append_pair("enablejsapi", "1")
        .append_pair("origin", page_origin);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_change_ended() {
        assert!(is_ended_message(VIDEO_ORIGIN, r#"{"event":"onStateChange","info":0}"#));
        assert!(is_ended_message(VIDEO_ORIGIN, r#"{"event":"onStateChange","data":0}"#));
        assert!(!is_ended_message(VIDEO_ORIGIN, r#"{"event":"onStateChange","info":1}"#));
    }

    #[test]
    fn test_progress_with_player_state() {
        let msg = r#"{"event":"video-progress","info":{"currentTime":211.9,"playerState":0}}"#;
        assert!(is_ended_message(VIDEO_ORIGIN, msg));

        let playing = r#"{"event":"video-progress","info":{"playerState":1}}"#;
        assert!(!is_ended_message(VIDEO_ORIGIN, playing));
    }

    #[test]
    fn test_string_wrapped_message() {
        let wrapped = serde_json::to_string(r#"{"event":"onStateChange","info":0}"#).unwrap();
        assert!(is_ended_message(VIDEO_ORIGIN, &wrapped));
    }

    #[test]
    fn test_ignored_messages() {
        let ended = r#"{"event":"onStateChange","info":0}"#;
        assert!(!is_ended_message("https://evil.example", ended));
        assert!(!is_ended_message(VIDEO_ORIGIN, "not json"));
        assert!(!is_ended_message(VIDEO_ORIGIN, r#"{"event":"initialDelivery","info":0}"#));
        assert!(!is_ended_message(VIDEO_ORIGIN, "0"));
    }

    #[test]
    fn test_embed_url() {
        let url = embed_url("dQw4w9WgXcQ", 42, "http://localhost:5173").unwrap();
        assert_eq!(url.path(), "/embed/dQw4w9WgXcQ");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("start".to_string(), "42".to_string())));
        assert!(pairs.contains(&("origin".to_string(), "http://localhost:5173".to_string())));
    }
}
