//! Stream messages
//!
//! This module defines everything the engine emits towards subscribers:
//! - Routine updates (`{"posture": ..}`, `{"blink": ..}`) on every analysed frame
//! - Discrete alert events (`{"type": "posture_warning", ..}`) on tracker transitions
//!
//! Durations are reported in whole seconds (truncated).

use crate::error::ErgoError;
use crate::tracker::ResolveReason;
use crate::types::PostureState;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Stream a message is published on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Posture,
    Blink,
    Events,
}

impl Topic {
    pub const ALL: [Topic; 3] = [Topic::Posture, Topic::Blink, Topic::Events];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Posture => "posture",
            Topic::Blink => "blink",
            Topic::Events => "events",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = ErgoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "posture" => Ok(Topic::Posture),
            "blink" => Ok(Topic::Blink),
            "events" => Ok(Topic::Events),
            other => Err(ErgoError::ParseError(format!("unknown topic: {other}"))),
        }
    }
}

/// Routine posture update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostureUpdate {
    pub posture: PostureState,
}

/// Blink rate as reported to subscribers: a count, or `"unknown"` without a face
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlinkReading {
    Rate(u32),
    Unknown,
}

impl From<Option<u32>> for BlinkReading {
    fn from(rate: Option<u32>) -> Self {
        rate.map_or(BlinkReading::Unknown, BlinkReading::Rate)
    }
}

impl Serialize for BlinkReading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            BlinkReading::Rate(rate) => serializer.serialize_u32(*rate),
            BlinkReading::Unknown => serializer.serialize_str("unknown"),
        }
    }
}

impl<'de> Deserialize<'de> for BlinkReading {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Rate(u32),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Rate(rate) => Ok(BlinkReading::Rate(rate)),
            Raw::Text(text) if text == "unknown" => Ok(BlinkReading::Unknown),
            Raw::Text(text) => Err(serde::de::Error::custom(format!(
                "expected blink rate or \"unknown\", got {text:?}"
            ))),
        }
    }
}

/// Routine blink update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlinkUpdate {
    pub blink: BlinkReading,
}

/// Status carried by every alert event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    ProlongedBad,
    BackToGoodOrUnknown,
    ProlongedLowRate,
    BackToNormal,
    FaceNotVisible,
}

/// Discrete warning/resolved events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertEvent {
    PostureWarning {
        status: AlertStatus,
        bad_duration_sec: u64,
    },
    PostureResolved {
        status: AlertStatus,
    },
    BlinkWarning {
        status: AlertStatus,
        blink_rate_per_min: u32,
        low_duration_sec: u64,
    },
    BlinkResolved {
        status: AlertStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        blink_rate_per_min: Option<u32>,
    },
}

impl AlertEvent {
    pub fn posture_warning(elapsed_seconds: f64) -> Self {
        AlertEvent::PostureWarning {
            status: AlertStatus::ProlongedBad,
            bad_duration_sec: whole_seconds(elapsed_seconds),
        }
    }

    /// Posture recovered. Both clearing and losing the pose report the same status.
    pub fn posture_resolved() -> Self {
        AlertEvent::PostureResolved {
            status: AlertStatus::BackToGoodOrUnknown,
        }
    }

    pub fn blink_warning(rate: u32, elapsed_seconds: f64) -> Self {
        AlertEvent::BlinkWarning {
            status: AlertStatus::ProlongedLowRate,
            blink_rate_per_min: rate,
            low_duration_sec: whole_seconds(elapsed_seconds),
        }
    }

    /// Blink rate recovered, or the face went out of view
    pub fn blink_resolved(reason: ResolveReason, rate: Option<u32>) -> Self {
        let status = match reason {
            ResolveReason::Cleared => AlertStatus::BackToNormal,
            ResolveReason::SignalUnavailable => AlertStatus::FaceNotVisible,
        };
        AlertEvent::BlinkResolved {
            status,
            blink_rate_per_min: rate,
        }
    }

    /// Value of the `type` field
    pub fn kind(&self) -> &'static str {
        match self {
            AlertEvent::PostureWarning { .. } => "posture_warning",
            AlertEvent::PostureResolved { .. } => "posture_resolved",
            AlertEvent::BlinkWarning { .. } => "blink_warning",
            AlertEvent::BlinkResolved { .. } => "blink_resolved",
        }
    }

    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            AlertEvent::PostureWarning { .. } | AlertEvent::BlinkWarning { .. }
        )
    }
}

fn whole_seconds(seconds: f64) -> u64 {
    if seconds.is_finite() && seconds > 0.0 {
        seconds.trunc() as u64
    } else {
        0
    }
}

/// Any message published to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamMessage {
    Posture(PostureUpdate),
    Blink(BlinkUpdate),
    Event(AlertEvent),
}

impl StreamMessage {
    pub fn posture(state: PostureState) -> Self {
        StreamMessage::Posture(PostureUpdate { posture: state })
    }

    pub fn blink(rate: Option<u32>) -> Self {
        StreamMessage::Blink(BlinkUpdate {
            blink: rate.into(),
        })
    }

    /// Topic this message is published on
    pub fn topic(&self) -> Topic {
        match self {
            StreamMessage::Posture(_) => Topic::Posture,
            StreamMessage::Blink(_) => Topic::Blink,
            StreamMessage::Event(_) => Topic::Events,
        }
    }

    /// Compact single-line JSON
    pub fn to_json(&self) -> Result<String, ErgoError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<AlertEvent> for StreamMessage {
    fn from(event: AlertEvent) -> Self {
        StreamMessage::Event(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    fn to_value(message: StreamMessage) -> Value {
        serde_json::to_value(message).unwrap()
    }

    #[test]
    fn test_routine_updates() {
        assert_eq!(
            to_value(StreamMessage::posture(PostureState::Bad)),
            json!({"posture": "bad"})
        );
        assert_eq!(
            to_value(StreamMessage::posture(PostureState::Unknown)),
            json!({"posture": "unknown"})
        );
        assert_eq!(to_value(StreamMessage::blink(Some(12))), json!({"blink": 12}));
        assert_eq!(to_value(StreamMessage::blink(None)), json!({"blink": "unknown"}));
    }

    #[test]
    fn test_posture_events() {
        assert_eq!(
            to_value(AlertEvent::posture_warning(2.9).into()),
            json!({"type": "posture_warning", "status": "prolonged_bad", "bad_duration_sec": 2})
        );
        assert_eq!(
            to_value(AlertEvent::posture_resolved().into()),
            json!({"type": "posture_resolved", "status": "back_to_good_or_unknown"})
        );
    }

    #[test]
    fn test_blink_events() {
        assert_eq!(
            to_value(AlertEvent::blink_warning(5, 61.2).into()),
            json!({
                "type": "blink_warning",
                "status": "prolonged_low_rate",
                "blink_rate_per_min": 5,
                "low_duration_sec": 61
            })
        );
        assert_eq!(
            to_value(AlertEvent::blink_resolved(ResolveReason::Cleared, Some(9)).into()),
            json!({"type": "blink_resolved", "status": "back_to_normal", "blink_rate_per_min": 9})
        );
        assert_eq!(
            to_value(AlertEvent::blink_resolved(ResolveReason::SignalUnavailable, None).into()),
            json!({"type": "blink_resolved", "status": "face_not_visible"})
        );
    }

    #[test]
    fn test_topics() {
        assert_eq!(StreamMessage::posture(PostureState::Good).topic(), Topic::Posture);
        assert_eq!(StreamMessage::blink(Some(1)).topic(), Topic::Blink);
        assert_eq!(
            StreamMessage::from(AlertEvent::posture_resolved()).topic(),
            Topic::Events
        );
        assert_eq!("Blink".parse::<Topic>().unwrap(), Topic::Blink);
        assert!("camera".parse::<Topic>().is_err());
    }

    #[test]
    fn test_parse_messages_back() {
        let lines = [
            r#"{"posture":"good"}"#,
            r#"{"blink":"unknown"}"#,
            r#"{"blink":14}"#,
            r#"{"type":"blink_resolved","status":"face_not_visible"}"#,
        ];
        let parsed: Vec<StreamMessage> = lines
            .iter()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(parsed[0], StreamMessage::posture(PostureState::Good));
        assert_eq!(parsed[1], StreamMessage::blink(None));
        assert_eq!(parsed[2], StreamMessage::blink(Some(14)));
        assert_eq!(
            parsed[3],
            AlertEvent::blink_resolved(ResolveReason::SignalUnavailable, None).into()
        );
    }

    #[test]
    fn test_negative_duration_clamps_to_zero() {
        assert_eq!(
            AlertEvent::posture_warning(-1.0),
            AlertEvent::PostureWarning {
                status: AlertStatus::ProlongedBad,
                bad_duration_sec: 0
            }
        );
    }
}
