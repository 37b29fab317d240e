use serde::{Deserialize, Serialize};

use crate::sluice::RawRecord;

/// One decoded account activity event.
///
/// The engine itself never looks inside: windowing and triggering only use
/// the resolved event time carried by `ParsedRecord`. The field set matters
/// to the table sink and to nobody else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountEvent {
    pub account_id: u64,

    pub user_id: u64,

    /// Activity kind, e.g. "deposit", "withdraw", "login".
    pub action: String,

    pub amount: f64,

    /// Event time embedded in the payload, in milliseconds since the unix
    /// epoch. Optional: sources that cannot stamp their records leave it
    /// out, and the arrival time is used instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_time_ms: Option<i64>,
}

/// A well-formed record with its resolved event time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedRecord {
    pub event: AccountEvent,

    /// Event time used for window assignment. Extracted from the payload,
    /// or defaulted to the arrival time.
    pub event_time_ms: i64,
}

/// A record that failed structural decoding, kept whole for inspection
/// and replay on the dead-letter path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MalformedRecord {
    pub payload: String,

    pub reason: String,

    pub arrival_time_ms: i64,
}

/// Result of classifying one raw record: exactly one of the two cases,
/// never both, never neither. The caller dispatches the cases into the
/// two processing graphs.
#[derive(Debug, Clone)]
pub enum Classified {
    Parsed(ParsedRecord),
    Malformed(MalformedRecord),
}

/// Classify a raw record as well-formed or malformed.
///
/// Decode failures are data, not errors: they are routed to the dead-letter
/// case and never bubble up. There is no I/O here, so there are no transient
/// failures to worry about.
pub fn classify(raw: &RawRecord) -> Classified {
    match serde_json::from_str::<AccountEvent>(&raw.payload) {
        Ok(event) => {
            let event_time_ms = event.event_time_ms.unwrap_or(raw.arrival_time_ms);
            Classified::Parsed(ParsedRecord {
                event,
                event_time_ms,
            })
        }
        Err(e) => Classified::Malformed(MalformedRecord {
            payload: raw.payload.clone(),
            reason: e.to_string(),
            arrival_time_ms: raw.arrival_time_ms,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(payload: &str, arrival_time_ms: i64) -> RawRecord {
        RawRecord {
            payload: payload.to_string(),
            arrival_time_ms,
        }
    }

    #[test]
    fn test_classify_parsed_with_event_time() {
        let payload = r#"{"account_id":7,"user_id":3,"action":"deposit","amount":12.5,"event_time_ms":5000}"#;

        match classify(&raw(payload, 99_000)) {
            Classified::Parsed(rec) => {
                assert_eq!(rec.event_time_ms, 5000);
                assert_eq!(rec.event.account_id, 7);
                assert_eq!(rec.event.action, "deposit");
            }
            Classified::Malformed(m) => panic!("expected parsed, got malformed: {}", m.reason),
        }
    }

    #[test]
    fn test_classify_defaults_to_arrival_time() {
        let payload = r#"{"account_id":1,"user_id":2,"action":"login","amount":0.0}"#;

        match classify(&raw(payload, 42_000)) {
            Classified::Parsed(rec) => assert_eq!(rec.event_time_ms, 42_000),
            Classified::Malformed(m) => panic!("expected parsed, got malformed: {}", m.reason),
        }
    }

    #[test]
    fn test_classify_malformed() {
        let cases = [
            "not json at all",
            "{\"account_id\":\"oops\"}",
            r#"{"user_id":2,"action":"login","amount":0.0}"#,
            "",
        ];

        for payload in cases {
            match classify(&raw(payload, 1_000)) {
                Classified::Malformed(m) => {
                    assert_eq!(m.payload, payload);
                    assert_eq!(m.arrival_time_ms, 1_000);
                    assert!(!m.reason.is_empty());
                }
                Classified::Parsed(_) => panic!("expected malformed for payload: {}", payload),
            }
        }
    }
}
