use serde_json::Value;

use crate::OpaqueMessage;

/// A request to be sent to the model provider.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ModelRequest {
    /// The input messages, oldest first.
    pub messages: Vec<ModelMessage>,
    /// Tools that are available to the model.
    pub tools: Vec<ModelTool>,
}

impl ModelRequest {
    /// Returns how many assistant turns are already in the history.
    pub fn assistant_turns(&self) -> usize {
        self.messages
            .iter()
            .filter(|msg| {
                matches!(msg, ModelMessage::Assistant(_) | ModelMessage::Opaque(_))
            })
            .count()
    }
}

/// A complete message.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ModelMessage {
    /// The system instructions.
    System(String),
    /// A user input text.
    User(String),
    /// An assistant text.
    Assistant(String),
    /// A tool call result.
    Tool(ToolCallResult),
    /// An opaque message (usually the history message from the model)
    Opaque(OpaqueMessage),
}

/// The result of calling a tool.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ToolCallResult {
    /// The identifier of the tool call request this result answers.
    pub id: String,
    /// The result of the tool call.
    pub content: String,
}

/// Describes a tool that can be used by the model.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModelTool {
    /// Name of the tool.
    pub name: String,
    /// Description of the tool.
    pub description: String,
    /// Parameters definition of the tool, as a
    /// [JSON schema](https://json-schema.org/).
    pub parameters: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assistant_turns() {
        let req = ModelRequest {
            messages: vec![
                ModelMessage::System("You are a researcher.".to_owned()),
                ModelMessage::User("Plate tectonics".to_owned()),
                ModelMessage::Opaque(OpaqueMessage::new("a", ())),
                ModelMessage::Tool(ToolCallResult {
                    id: "call_0".to_owned(),
                    content: "results".to_owned(),
                }),
                ModelMessage::Assistant("Summary".to_owned()),
            ],
            tools: vec![],
        };
        assert_eq!(req.assistant_turns(), 2);
        assert_eq!(ModelRequest::default().assistant_turns(), 0);
    }
}
