//! Conversation-related types.

use deck_agent_model::ModelMessage;

use crate::TranscriptSource;

/// The history of one agent, oldest item first.
#[derive(Clone, Default, Debug)]
pub struct Conversation {
    pub(crate) items: Vec<Item>,
}

impl Conversation {
    /// Returns all items.
    #[inline]
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Returns the number of items.
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if nothing happened yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Renders the conversation as plain text, one block per item.
    pub fn to_transcript(&self) -> String {
        let mut out = String::new();
        for item in &self.items {
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            let label = match item.source {
                TranscriptSource::User => "user",
                TranscriptSource::Assistant => "assistant",
                TranscriptSource::Tool => "tool",
            };
            out.push_str(&format!("[{label}] {}", item.transcript));
        }
        out
    }

    pub(crate) fn push(
        &mut self,
        msg: ModelMessage,
        transcript: String,
        source: TranscriptSource,
    ) {
        self.items.push(Item {
            msg,
            transcript,
            source,
        });
    }
}

/// An item in the conversation.
#[derive(Clone, Debug)]
pub struct Item {
    pub(crate) msg: ModelMessage,
    pub(crate) transcript: String,
    pub(crate) source: TranscriptSource,
}

impl Item {
    /// Returns the transcript of this item.
    ///
    /// The transcript is a string representation of the message item,
    /// which can be exported later. But transcript alone is not enough
    /// to reconstruct the message item.
    #[inline]
    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    /// Returns who produced this item.
    #[inline]
    pub fn source(&self) -> TranscriptSource {
        self.source
    }
}
