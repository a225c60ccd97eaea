use serde::{Deserialize, Serialize};

use crate::{Brightness, LedStrip};

/// Messages the server sends into a running animator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum ParentMessage {
    SetBrightness { brightness: Brightness },
    GetLedStrip,
}

/// Messages an animator reports back to the server.
///
/// `LedStrip` is the reply to [`ParentMessage::GetLedStrip`]; exactly one is
/// sent per request, in the order the requests were received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum ChildMessage {
    LedStripChanged {
        led_strip: LedStrip,
    },
    LedStrip {
        led_strip: LedStrip,
    },
    Finished {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl ChildMessage {
    pub fn is_finished(&self) -> bool {
        matches!(self, ChildMessage::Finished { .. })
    }
}
