use serde::{Deserialize, Serialize};

/// What the channel carrying a session can render.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportProfile {
    pub name: String,
    #[serde(default)]
    pub supports_audio: bool,
    #[serde(default)]
    pub supports_rich_formatting: bool,
}

impl TransportProfile {
    pub fn voice() -> Self {
        Self {
            name: "voice".to_string(),
            supports_audio: true,
            supports_rich_formatting: false,
        }
    }

    pub fn sms() -> Self {
        Self {
            name: "sms".to_string(),
            supports_audio: false,
            supports_rich_formatting: false,
        }
    }

    pub fn web_chat() -> Self {
        Self {
            name: "web_chat".to_string(),
            supports_audio: false,
            supports_rich_formatting: true,
        }
    }
}

impl Default for TransportProfile {
    fn default() -> Self {
        Self::web_chat()
    }
}
