//! Line-oriented scanner for the intercepting proxy's trace output.
//!
//! The proxy prints each observed flow as a block of lines separated by blank
//! lines. A websocket subscription shows up as a block announcing a websocket
//! text message to the live-log host, immediately followed by a block holding
//! the `subscribe` payload.

use crate::events::WsSub;
use crate::types::JobId;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use serde_json::Value;
use tracing::trace;

pub const WS_HEADER: &str = "WebSocket text message";
pub const WS_HOST: &str = "alive.github.com";
pub const WS_ACTION: &str = "\"subscribe\":";
const CHECK_RUNS: &str = "check_runs";

// subscribe keys are a base64 blob followed by `--<signature>`
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

#[derive(Debug)]
pub struct BufferState {
    buffer: Vec<String>,
    previous_buffer: Vec<String>,
    previous_line: String,
}

impl Default for BufferState {
    fn default() -> Self {
        Self {
            buffer: Vec::new(),
            previous_buffer: Vec::new(),
            // anything non-blank, so the very first blank line is not a boundary
            previous_line: "-".into(),
        }
    }
}

impl BufferState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance by one line of trace output.
    ///
    /// Returns a subscription when this line completes a block that, together
    /// with the block before it, matches the subscribe pattern.
    pub fn process_line(&mut self, line: &str) -> Option<WsSub> {
        let line = line.trim();
        let mut found = None;
        if !line.is_empty() {
            self.buffer.push(line.to_string());
        } else if self.previous_line.is_empty() && !self.buffer.is_empty() {
            let current = self.buffer.concat();
            let previous = self.previous_buffer.concat();
            found = extract(&previous, &current);
            self.previous_buffer = std::mem::take(&mut self.buffer);
        } else {
            self.buffer.push(String::new());
        }
        self.previous_line = line.to_string();
        found
    }
}

fn extract(previous: &str, current: &str) -> Option<WsSub> {
    if !(previous.contains(WS_HEADER) && previous.contains(WS_HOST) && current.contains(WS_ACTION))
    {
        return None;
    }
    let url = &previous[previous.find(WS_HOST)?..];
    let job_id = extract_job_id(current)?;
    Some(WsSub {
        url: url.to_string(),
        subs: current.to_string(),
        job_id,
        job_name: None,
    })
}

/// Decode the check run id out of a `{"subscribe": {...}}` payload.
///
/// The subscribe object's member names are base64 blobs whose decoded text
/// starts with a small JSON object such as `{"c":"check_runs:123","t":...}`
/// followed by a signature. Some payloads carry the blob as the value itself.
pub fn extract_job_id(payload: &str) -> Option<JobId> {
    let parsed: Value = match serde_json::from_str(payload) {
        Ok(parsed) => parsed,
        Err(err) => {
            trace!("undecodable subscribe payload: {}", err);
            return None;
        }
    };
    let candidates: Vec<&str> = match parsed.get("subscribe")? {
        Value::Object(members) => members.keys().map(String::as_str).collect(),
        Value::String(blob) => vec![blob.as_str()],
        Value::Array(blobs) => blobs.iter().filter_map(Value::as_str).collect(),
        _ => return None,
    };
    candidates
        .into_iter()
        .filter_map(decode_channel)
        .find(|channel| channel.starts_with(CHECK_RUNS))
        .and_then(|channel| channel.split(':').nth(1)?.parse().ok())
}

/// The leading run of base64 data in `blob`, cut to a decodable length.
fn base64_prefix(blob: &str) -> &str {
    let end = blob
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '+' || c == '/'))
        .unwrap_or(blob.len());
    let data = &blob[..end];
    // a single leftover symbol doesn't make a byte
    if data.len() % 4 == 1 {
        &data[..data.len() - 1]
    } else {
        data
    }
}

fn decode_channel(blob: &str) -> Option<String> {
    let bytes = LENIENT.decode(base64_prefix(blob)).ok()?;
    let end = bytes.iter().position(|&b| b == b'}')?;
    let head: Value = serde_json::from_slice(&bytes[..=end]).ok()?;
    match head.get("c")? {
        Value::String(channel) => Some(channel.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose;

    const HEADER: &str = "127.0.0.1:55350 -> WebSocket text message -> alive.github.com:443/foobar";
    const SUBSCRIBE: &str =
        r#"{"subscribe":{"eyJjIjoiY2hlY2tfcnVuczozMTczNzQ5NDIwMyIsInQiOjE3MjkyNjIyMDV9":""}}"#;

    fn feed(lines: &[&str]) -> Vec<WsSub> {
        let mut state = BufferState::new();
        lines.iter().filter_map(|line| state.process_line(line)).collect()
    }

    #[test]
    fn nothing_from_nothing() {
        assert!(feed(&[]).is_empty());
        assert!(feed(&["", " "]).is_empty());
    }

    #[test]
    fn extracts_subscription() {
        let mut state = BufferState::new();
        let results: Vec<_> = [HEADER, "", "", SUBSCRIBE, "", ""]
            .iter()
            .map(|line| state.process_line(line))
            .collect();
        assert!(results[..5].iter().all(Option::is_none));
        assert_eq!(
            results[5],
            Some(WsSub {
                url: "alive.github.com:443/foobar".into(),
                subs: SUBSCRIBE.into(),
                job_id: 31737494203,
                job_name: None,
            })
        );
    }

    #[test]
    fn tolerates_interleaved_blocks() {
        let subs = feed(&[
            "127.0.0.1:1 -> GET https://github.com/",
            "",
            "",
            "<< 200 OK 12kb",
            "",
            "",
            HEADER,
            "",
            "",
            SUBSCRIBE,
            "",
            "",
            "127.0.0.1:1 -> WebSocket text message -> api.example.com:443/x",
            "",
            "",
            SUBSCRIBE,
            "",
            "",
        ]);
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].job_id, 31737494203);
    }

    #[test]
    fn no_false_positive() {
        let subs = feed(&[
            "127.0.0.1:1 -> GET https://alive.github.com/",
            "",
            "",
            r#"{"unsubscribe":{"foo":""}}"#,
            "",
            "",
            "some text",
            "",
            "",
        ]);
        assert!(subs.is_empty());
    }

    #[test]
    fn bad_payload_is_skipped() {
        let subs = feed(&[HEADER, "", "", r#"{"subscribe":{"!!notbase64":""}}"#, "", ""]);
        assert!(subs.is_empty());
        let subs = feed(&[HEADER, "", "", r#""subscribe": not json"#, "", ""]);
        assert!(subs.is_empty());
    }

    #[test]
    fn job_id_from_value_representation() {
        let payload = r#"{"subscribe":"eyJjIjoiY2hlY2tfcnVuczozMTczNzQ5NDIwMyIsInQiOjE3MjkyNjIyMDV9"}"#;
        assert_eq!(extract_job_id(payload), Some(31737494203));
    }

    const SIGNATURE: &str = "--0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    fn job_id_from_signed_key() {
        let payload = format!(
            r#"{{"subscribe":{{"eyJjIjoiY2hlY2tfcnVuczo0MiIsInQiOjE3MjkyNjIyfQ=={}":""}}}}"#,
            SIGNATURE
        );
        assert_eq!(extract_job_id(&payload), Some(42));
    }

    #[test]
    fn job_id_from_unpadded_signed_key() {
        let payload = format!(
            r#"{{"subscribe":{{"eyJjIjoiY2hlY2tfcnVuczo0MiIsInQiOjE3MjkyNjIyMDV9{}":""}}}}"#,
            SIGNATURE
        );
        assert_eq!(extract_job_id(&payload), Some(42));
    }

    #[test]
    fn base64_prefix_stops_at_the_signature() {
        assert_eq!(base64_prefix("abcd==--ff"), "abcd");
        assert_eq!(base64_prefix("abcde--ff"), "abcd");
        assert_eq!(base64_prefix("abc"), "abc");
    }

    #[test]
    fn job_id_picks_check_runs_channel() {
        let other = general_purpose::STANDARD.encode(r#"{"c":"repository:1","t":1}sig"#);
        let check = general_purpose::STANDARD.encode(r#"{"c":"check_runs:42","t":1}sig"#);
        let payload = format!(r#"{{"subscribe":{{"{}":"","{}":""}}}}"#, other, check);
        assert_eq!(extract_job_id(&payload), Some(42));
    }
}
