use ledstrip_proto::{Brightness, LedStrip};
use serde::Serialize;
use uuid::Uuid;

/// Why a session ended without reporting `finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Requested,
    Preempted,
    Exited,
}

/// How a session ended, as seen by `await_finished` callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEnd {
    Finished,
    Stopped,
    Preempted,
    Exited,
}

/// Everything observers of the strip are told about, in order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StripEvent {
    LedStripChanged {
        #[serde(rename = "ledStrip")]
        led_strip: LedStrip,
    },
    BrightnessChanged {
        brightness: Brightness,
    },
    AnimationStarted {
        #[serde(rename = "sessionId")]
        session_id: Uuid,
        #[serde(rename = "ledStrip")]
        led_strip: LedStrip,
    },
    AnimationStopped {
        #[serde(rename = "sessionId")]
        session_id: Uuid,
        reason: StopReason,
    },
    AnimationFinished {
        #[serde(rename = "sessionId")]
        session_id: Uuid,
        #[serde(rename = "ledStrip")]
        led_strip: LedStrip,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl StripEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StripEvent::LedStripChanged { .. } => "led_strip_changed",
            StripEvent::BrightnessChanged { .. } => "brightness_changed",
            StripEvent::AnimationStarted { .. } => "animation_started",
            StripEvent::AnimationStopped { .. } => "animation_stopped",
            StripEvent::AnimationFinished { .. } => "animation_finished",
        }
    }

    /// Payload for the SSE `data:` line.
    pub fn data_json(&self) -> Option<String> {
        serde_json::to_value(self)
            .ok()
            .and_then(|mut value| value.get_mut("data").map(serde_json::Value::take))
            .and_then(|data| serde_json::to_string(&data).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledstrip_proto::LedColor;
    use serde_json::json;

    #[test]
    fn events_serialize_with_camel_case_payloads() {
        let event = StripEvent::AnimationStopped {
            session_id: Uuid::nil(),
            reason: StopReason::Preempted,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "animation_stopped",
                "data": {
                    "sessionId": "00000000-0000-0000-0000-000000000000",
                    "reason": "preempted"
                }
            })
        );
        assert_eq!(event.name(), "animation_stopped");
    }

    #[test]
    fn sse_data_is_the_inner_payload() {
        let event = StripEvent::LedStripChanged {
            led_strip: LedStrip::filled(1, LedColor::new(1, 2, 3)),
        };
        let data: serde_json::Value =
            serde_json::from_str(&event.data_json().unwrap()).unwrap();
        assert_eq!(data, json!({ "ledStrip": [{ "red": 1, "green": 2, "blue": 3 }] }));

        let event = StripEvent::BrightnessChanged {
            brightness: Brightness::Auto,
        };
        assert_eq!(event.data_json().as_deref(), Some(r#"{"brightness":"auto"}"#));
    }
}
