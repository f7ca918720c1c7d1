use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Final result of one conversational query, as reported by the agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    #[serde(default)]
    pub query_text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,

    /// Structured parameters extracted for the matched intent.
    #[serde(default)]
    pub parameters: Map<String, Value>,

    #[serde(default)]
    pub fulfillment_text: String,
}

/// Intent matched by the agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub display_name: String,

    /// Set when the agent wants the interaction to end after this turn.
    #[serde(default)]
    pub end_interaction: bool,
}

/// Compact projection of a final query result handed to call control.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionSummary {
    pub intent: IntentRef,
    pub parameters: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentRef {
    pub name: String,
    pub display_name: String,
}

impl QueryResult {
    pub fn ends_interaction(&self) -> bool {
        self.intent.as_ref().is_some_and(|i| i.end_interaction)
    }

    pub fn summary(&self) -> InteractionSummary {
        let intent = self
            .intent
            .as_ref()
            .map(|i| IntentRef {
                name: i.name.clone(),
                display_name: i.display_name.clone(),
            })
            .unwrap_or_default();
        InteractionSummary {
            intent,
            parameters: self.parameters.clone(),
        }
    }
}
