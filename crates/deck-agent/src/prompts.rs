//! Instruction prompts of the DeckAgent roles.

/// Instruction of the research agent.
pub const RESEARCH_AGENT_INSTRUCTION: &str =
    include_str!("./prompts/research_agent.md");

/// Instruction of the presentation agent.
pub const PRESENTATION_AGENT_INSTRUCTION: &str =
    include_str!("./prompts/presentation_agent.md");

/// Instruction of the coordinator.
pub const COORDINATOR_INSTRUCTION: &str =
    include_str!("./prompts/coordinator.md");

/// The sentence the coordinator ends a finished run with.
pub const COMPLETION_MESSAGE: &str = "I have completed my research and \
    generated a presentation. You can view all slides on the right side.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinator_quotes_completion_message() {
        assert!(COORDINATOR_INSTRUCTION.contains(COMPLETION_MESSAGE));
    }

    #[test]
    fn test_prompts_name_their_tools() {
        assert!(PRESENTATION_AGENT_INSTRUCTION.contains("<Slides>"));
        assert!(PRESENTATION_AGENT_INSTRUCTION.contains("</Slides>"));
        assert!(RESEARCH_AGENT_INSTRUCTION.contains("`exit_loop`"));
        assert!(COORDINATOR_INSTRUCTION.contains("`research_loop`"));
        assert!(COORDINATOR_INSTRUCTION.contains("`presentation_agent`"));
    }
}
