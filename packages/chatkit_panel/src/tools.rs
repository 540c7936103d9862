//! Client tools the assistant may invoke on the page.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorScheme {
    Light,
    Dark,
}

impl ColorScheme {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "light" => Some(Self::Light),
            "dark" => Some(Self::Dark),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientTool {
    SwitchTheme(ColorScheme),
    RecordFact { fact_id: String, fact_text: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    #[error("unknown client tool: {0}")]
    Unknown(String),

    #[error("unsupported theme: {0}")]
    InvalidTheme(String),
}

impl ClientTool {
    pub fn parse(name: &str, params: &Value) -> Result<Self, ToolError> {
        match name {
            "switch_theme" => {
                let requested = params.get("theme").and_then(Value::as_str);
                requested
                    .and_then(ColorScheme::parse)
                    .map(Self::SwitchTheme)
                    .ok_or_else(|| {
                        ToolError::InvalidTheme(
                            params.get("theme").map(Value::to_string).unwrap_or_default(),
                        )
                    })
            }
            "record_fact" => Ok(Self::RecordFact {
                fact_id: param_text(params, "fact_id"),
                fact_text: param_text(params, "fact_text"),
            }),
            other => Err(ToolError::Unknown(other.to_string())),
        }
    }
}

/// Stringify a loosely typed parameter; absent or null reads as empty.
fn param_text(params: &Value, key: &str) -> String {
    match params.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Answer handed back to the widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ToolResult {
    pub success: bool,
}

impl ToolResult {
    pub const OK: Self = Self { success: true };
    pub const REJECTED: Self = Self { success: false };
}

/// Side effect the host performs for an accepted fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum FactAction {
    Save { fact_id: String, fact_text: String },
}

/// Collapse every whitespace run to one space and trim the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Fact ids already forwarded in the current thread.
#[derive(Debug, Default)]
pub struct FactLedger {
    seen: HashSet<String>,
}

impl FactLedger {
    /// True the first time `fact_id` is offered.
    pub fn admit(&mut self, fact_id: &str) -> bool {
        self.seen.insert(fact_id.to_string())
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn switch_theme_accepts_light_and_dark() {
        assert_eq!(
            ClientTool::parse("switch_theme", &json!({"theme": "dark"})),
            Ok(ClientTool::SwitchTheme(ColorScheme::Dark))
        );
        assert_eq!(
            ClientTool::parse("switch_theme", &json!({"theme": "light"})),
            Ok(ClientTool::SwitchTheme(ColorScheme::Light))
        );
    }

    #[test]
    fn switch_theme_rejects_anything_else() {
        for params in [json!({"theme": "sepia"}), json!({"theme": 1}), json!({})] {
            assert!(matches!(
                ClientTool::parse("switch_theme", &params),
                Err(ToolError::InvalidTheme(_))
            ));
        }
    }

    #[test]
    fn unknown_tool_is_rejected() {
        assert_eq!(
            ClientTool::parse("open_door", &json!({})),
            Err(ToolError::Unknown("open_door".into()))
        );
    }

    #[test]
    fn record_fact_stringifies_params() {
        assert_eq!(
            ClientTool::parse("record_fact", &json!({"fact_id": 42, "fact_text": null})),
            Ok(ClientTool::RecordFact {
                fact_id: "42".into(),
                fact_text: String::new(),
            })
        );
    }

    #[test]
    fn normalize_collapses_runs() {
        assert_eq!(normalize_whitespace("  likes \n\t tea  "), "likes tea");
        assert_eq!(normalize_whitespace("   "), "");
    }

    #[test]
    fn ledger_admits_once_until_cleared() {
        let mut ledger = FactLedger::default();
        assert!(ledger.admit("f1"));
        assert!(!ledger.admit("f1"));
        ledger.clear();
        assert!(ledger.admit("f1"));
    }

    #[test]
    fn fact_action_wire_shape() {
        let action = FactAction::Save {
            fact_id: "f1".into(),
            fact_text: "likes tea".into(),
        };
        assert_eq!(
            serde_json::to_value(action).unwrap(),
            json!({"type": "save", "factId": "f1", "factText": "likes tea"})
        );
    }
}
