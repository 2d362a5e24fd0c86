use serde::{Deserialize, Serialize};

/// Per-organization persona, workflow text and practice facts. Loaded at
/// session start; every field has a default so partial JSON is accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TenantConfig {
    #[serde(default)]
    pub identity: Identity,
    #[serde(default = "default_tone")]
    pub tone: String,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub practice: PracticeInfo,
    #[serde(default)]
    pub workflow_instructions: String,
    #[serde(default)]
    pub custom_instructions: String,
}

fn default_tone() -> String {
    "professional".to_string()
}

fn default_true() -> bool {
    true
}

fn default_practice_name() -> String {
    "the dental office".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Identity {
    #[serde(default = "default_true")]
    pub disclose_ai: bool,
    #[serde(default)]
    pub agent_name: String,
    #[serde(default = "default_practice_name")]
    pub practice_name: String,
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            disclose_ai: true,
            agent_name: String::new(),
            practice_name: default_practice_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Capabilities {
    #[serde(default = "default_true")]
    pub can_book: bool,
    #[serde(default = "default_true")]
    pub can_cancel: bool,
    #[serde(default = "default_true")]
    pub can_reschedule: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            can_book: true,
            can_cancel: true,
            can_reschedule: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PracticeInfo {
    #[serde(default)]
    pub business_hours: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub phone: String,
    /// Receives booking notifications by SMS. Never shown to callers.
    #[serde(default)]
    pub owner_phone: String,
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            identity: Identity::default(),
            tone: default_tone(),
            capabilities: Capabilities::default(),
            practice: PracticeInfo::default(),
            workflow_instructions: String::new(),
            custom_instructions: String::new(),
        }
    }
}

impl TenantConfig {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_prompt(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!(
            "You answer calls and messages for {}.",
            self.identity.practice_name
        ));
        if !self.identity.agent_name.is_empty() {
            lines.push(format!("Your name is {}.", self.identity.agent_name));
        }
        if !self.identity.disclose_ai {
            lines.push(
                "Do not volunteer that you are an AI; speak as the front desk of the practice."
                    .to_string(),
            );
        }

        match self.tone.as_str() {
            "friendly" => lines.push(
                "Use a warm, friendly tone. Be personable and approachable.".to_string(),
            ),
            "casual" => lines.push("Use a casual, relaxed tone.".to_string()),
            _ => {}
        }

        let mut disabled = Vec::new();
        if !self.capabilities.can_book {
            disabled.push("booking new appointments");
        }
        if !self.capabilities.can_cancel {
            disabled.push("cancelling appointments");
        }
        if !self.capabilities.can_reschedule {
            disabled.push("rescheduling appointments");
        }
        if !disabled.is_empty() {
            lines.push(format!(
                "You are NOT able to help with: {}. Ask the caller to contact the office directly.",
                disabled.join(", ")
            ));
        }

        if !self.practice.business_hours.is_empty() {
            lines.push(format!("Office hours: {}", self.practice.business_hours));
        }
        if !self.practice.address.is_empty() {
            lines.push(format!("Address: {}", self.practice.address));
        }
        if !self.workflow_instructions.is_empty() {
            lines.push(self.workflow_instructions.clone());
        }
        if !self.custom_instructions.is_empty() {
            lines.push(self.custom_instructions.clone());
        }

        format!("\nPractice and persona:\n{}", lines.join("\n"))
    }

    pub fn greeting(&self) -> String {
        let practice = &self.identity.practice_name;
        if self.identity.agent_name.is_empty() {
            format!("Thanks for contacting {practice}. How can I help you today?")
        } else {
            format!(
                "Thanks for contacting {practice}, this is {}. How can I help you today?",
                self.identity.agent_name
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_partial() {
        let cfg = TenantConfig::from_json(r#"{"tone":"friendly","practice":{"address":"1 Main St"}}"#)
            .unwrap();
        assert_eq!(cfg.tone, "friendly");
        assert_eq!(cfg.practice.address, "1 Main St");
        assert!(cfg.capabilities.can_book);
        assert_eq!(cfg.identity.practice_name, "the dental office");
        assert!(cfg.practice.owner_phone.is_empty());
    }

    #[test]
    fn test_prompt_lists_disabled_capabilities() {
        let cfg = TenantConfig::from_json(
            r#"{"identity":{"agent_name":"Sophie","practice_name":"Bright Smiles"},"capabilities":{"can_cancel":false}}"#,
        )
        .unwrap();
        let prompt = cfg.to_prompt();
        assert!(prompt.contains("Bright Smiles"));
        assert!(prompt.contains("Your name is Sophie."));
        assert!(prompt.contains("NOT able to help with: cancelling appointments"));
        assert!(!prompt.contains("booking new appointments"));
    }

    #[test]
    fn test_greeting_uses_agent_name() {
        let mut cfg = TenantConfig::default();
        assert!(cfg.greeting().contains("the dental office"));
        cfg.identity.agent_name = "Sam".to_string();
        assert!(cfg.greeting().contains("this is Sam"));
    }
}
