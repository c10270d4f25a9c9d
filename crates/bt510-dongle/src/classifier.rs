//! Classification of the dongle's unframed byte stream
//!
//! The BL65x mixes several things onto one serial stream: command response
//! lines, spontaneous event lines, advertisement reports, and JSON-RPC
//! packets relayed from the sensor over the VSP link. JSON packets have no
//! length prefix and are delimited only by balanced braces; everything else
//! is carriage-return separated text classified by prefix.

use serde_json::Value;
use tracing::debug;

use crate::protocol::{
    ADVERTISEMENT_PREFIX, DISCONNECT_PREFIX, ENCRYPT_PREFIX, NO_CARRIER_PREFIX, PASSKEY_PREFIX,
};

// ----------------------------------------------------------------------------
// Classified Messages
// ----------------------------------------------------------------------------

/// Spontaneous conditions reported by the dongle outside any command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DongleEvent {
    /// The BLE link dropped.
    NoCarrier(String),
    /// The peer asked for a passkey during pairing.
    PasskeyRequest(String),
    /// Stop sentinel for the event dispatcher. Never produced by the
    /// classifier.
    Shutdown,
}

/// One complete unit extracted from the byte stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    /// A command response line, owed to the oldest in-flight command.
    Response(String),
    /// A spontaneous event line.
    Event(DongleEvent),
    /// An advertisement report line (`AD...`).
    Advertisement(String),
    /// A complete JSON-RPC packet from the sensor.
    Json(Value),
    /// `encrypt...` lines signal pairing completion directly instead of
    /// going through the event queue.
    PairingComplete,
}

// ----------------------------------------------------------------------------
// Line Classifier
// ----------------------------------------------------------------------------

/// Reassembles and classifies the incoming byte stream.
#[derive(Debug, Default)]
pub struct LineClassifier {
    text: String,
}

impl LineClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every message completed by them.
    ///
    /// Invalid UTF-8 bytes are dropped rather than failing. Each call that
    /// reaches the line-splitting branch flushes the whole buffer at once,
    /// so a response line and an advertisement burst arriving in one read
    /// are classified together; callers must feed data incrementally as it
    /// arrives. Known limitation: a response line buffered behind an
    /// unbalanced JSON fragment stays deferred until the braces balance.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Classified> {
        let decoded: String = String::from_utf8_lossy(data)
            .chars()
            .filter(|&c| c != char::REPLACEMENT_CHARACTER)
            .collect();
        self.text.push_str(decoded.trim_matches('\n'));

        if self.text.is_empty() {
            return Vec::new();
        }

        let open_count = self.text.matches('{').count();
        let close_count = self.text.matches('}').count();

        if open_count > 0 && open_count == close_count {
            self.take_packet()
        } else if let Some(start) = self.text.find('{') {
            // Partial packet: discard any garbage before the first brace
            // and wait for the rest.
            self.text.drain(..start);
            Vec::new()
        } else if self.text.contains('}') {
            // A close brace with no open brace is a malformed tail.
            self.text.clear();
            Vec::new()
        } else {
            self.take_lines()
        }
    }

    /// Extract the balanced first-`{` .. last-`}` span as a JSON packet.
    fn take_packet(&mut self) -> Vec<Classified> {
        let mut out = Vec::new();
        match (self.text.find('{'), self.text.rfind('}')) {
            // A close brace before the open brace balances the counts
            // without forming a span; the buffer is garbage either way.
            (Some(start), Some(end)) if start < end => {
                match serde_json::from_str::<Value>(&self.text[start..=end]) {
                    Ok(value) => out.push(Classified::Json(value)),
                    Err(err) => debug!("discarding unparseable packet: {err}"),
                }
            }
            _ => debug!("discarding malformed packet buffer"),
        }
        self.text.clear();
        out
    }

    /// Split the buffer on carriage returns and classify each line.
    fn take_lines(&mut self) -> Vec<Classified> {
        let mut out = Vec::new();
        for line in self.text.split('\r') {
            let line = line.replace('\n', "");
            if line.is_empty() {
                continue;
            }
            if line.starts_with(ADVERTISEMENT_PREFIX) {
                out.push(Classified::Advertisement(line));
            } else if line.starts_with(NO_CARRIER_PREFIX) || line.starts_with(DISCONNECT_PREFIX) {
                out.push(Classified::Event(DongleEvent::NoCarrier(line)));
            } else if line.starts_with(PASSKEY_PREFIX) {
                out.push(Classified::Event(DongleEvent::PasskeyRequest(line)));
            } else if line.starts_with(ENCRYPT_PREFIX) {
                out.push(Classified::PairingComplete);
            } else {
                out.push(Classified::Response(line));
            }
        }
        self.text.clear();
        out
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_str(classifier: &mut LineClassifier, text: &str) -> Vec<Classified> {
        classifier.feed(text.as_bytes())
    }

    #[test]
    fn test_empty_feed_produces_nothing() {
        let mut classifier = LineClassifier::new();
        assert!(classifier.feed(b"").is_empty());
        assert!(classifier.feed(b"\n").is_empty());
    }

    #[test]
    fn test_response_line() {
        let mut classifier = LineClassifier::new();
        assert_eq!(
            feed_str(&mut classifier, "OK\r\n"),
            vec![Classified::Response("OK".to_string())]
        );
    }

    #[test]
    fn test_multiple_lines_in_one_feed() {
        let mut classifier = LineClassifier::new();
        let messages = feed_str(&mut classifier, "BUSY\rOK\r");
        assert_eq!(
            messages,
            vec![
                Classified::Response("BUSY".to_string()),
                Classified::Response("OK".to_string()),
            ]
        );
    }

    #[test]
    fn test_prefix_classification() {
        let mut classifier = LineClassifier::new();
        let messages = feed_str(
            &mut classifier,
            "AD 01C13A7E4118A2 -60 0201061BFF\rNOCARRIER\rpasskey?\rencrypt:0\rdisconnected\rATI\r",
        );
        assert_eq!(messages.len(), 6);
        assert!(matches!(messages[0], Classified::Advertisement(_)));
        assert!(matches!(
            messages[1],
            Classified::Event(DongleEvent::NoCarrier(_))
        ));
        assert!(matches!(
            messages[2],
            Classified::Event(DongleEvent::PasskeyRequest(_))
        ));
        assert_eq!(messages[3], Classified::PairingComplete);
        assert!(matches!(
            messages[4],
            Classified::Event(DongleEvent::NoCarrier(_))
        ));
        assert_eq!(messages[5], Classified::Response("ATI".to_string()));
    }

    #[test]
    fn test_json_packet_in_one_feed() {
        let mut classifier = LineClassifier::new();
        let messages = feed_str(&mut classifier, r#"{"jsonrpc": "2.0", "result": "ok"}"#);
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            Classified::Json(value) => assert_eq!(value["result"], "ok"),
            other => panic!("expected JSON packet, got {other:?}"),
        }
    }

    #[test]
    fn test_json_packet_across_feeds() {
        let mut classifier = LineClassifier::new();
        assert!(feed_str(&mut classifier, r#"{"jsonrpc": "2.0", "#).is_empty());
        assert!(feed_str(&mut classifier, r#""result": {"nested":"#).is_empty());
        let messages = feed_str(&mut classifier, r#" 1}}"#);
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            Classified::Json(value) => assert_eq!(value["result"]["nested"], 1),
            other => panic!("expected JSON packet, got {other:?}"),
        }
    }

    #[test]
    fn test_garbage_before_packet_is_discarded() {
        let mut classifier = LineClassifier::new();
        assert!(feed_str(&mut classifier, "noise noise {\"a\":").is_empty());
        let messages = feed_str(&mut classifier, " 1}");
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            Classified::Json(value) => assert_eq!(value["a"], 1),
            other => panic!("expected JSON packet, got {other:?}"),
        }
    }

    #[test]
    fn test_unmatched_close_brace_clears_buffer() {
        let mut classifier = LineClassifier::new();
        assert!(feed_str(&mut classifier, "tail} junk").is_empty());
        // Buffer was cleared; the next feed starts fresh.
        assert_eq!(
            feed_str(&mut classifier, "OK\r"),
            vec![Classified::Response("OK".to_string())]
        );
    }

    #[test]
    fn test_close_brace_before_open_brace_dropped() {
        let mut classifier = LineClassifier::new();
        assert!(feed_str(&mut classifier, "}x{").is_empty());
        assert_eq!(
            feed_str(&mut classifier, "OK\r"),
            vec![Classified::Response("OK".to_string())]
        );
    }

    #[test]
    fn test_unparseable_balanced_braces_dropped() {
        let mut classifier = LineClassifier::new();
        assert!(feed_str(&mut classifier, "{not json}").is_empty());
        assert_eq!(
            feed_str(&mut classifier, "OK\r"),
            vec![Classified::Response("OK".to_string())]
        );
    }

    #[test]
    fn test_invalid_utf8_ignored() {
        let mut classifier = LineClassifier::new();
        let messages = classifier.feed(b"O\xFFK\r");
        assert_eq!(messages, vec![Classified::Response("OK".to_string())]);
    }
}
