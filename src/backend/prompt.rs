//! Prompt construction from templates

use super::ChatMessage;
use crate::registry::PromptTemplates;

/// Only this many trailing messages contribute to the conversation history
pub const HISTORY_WINDOW: usize = 15;

/// Substitute `{name}` placeholders in a single left-to-right pass.
///
/// Substituted values are never re-scanned, so message content containing
/// braces is emitted verbatim. Unknown placeholders are left untouched.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        let substituted = after.find('}').and_then(|close| {
            let name = &after[..close];
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value, close))
        });

        match substituted {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

/// Build a prompt from a conversation.
///
/// The first system message becomes the system prompt; the user and assistant
/// turns among the last [`HISTORY_WINDOW`] messages form the history.
pub fn build_prompt(templates: &PromptTemplates, messages: &[ChatMessage]) -> String {
    let system_prompt = messages
        .iter()
        .find(|m| m.role == "system")
        .map(|m| m.content.as_str())
        .unwrap_or("");

    let system = render(&templates.system_message, &[("system_prompt", system_prompt)]);

    let window_start = messages.len().saturating_sub(HISTORY_WINDOW);
    let history = messages[window_start..]
        .iter()
        .filter(|m| m.role == "user" || m.role == "assistant")
        .map(|m| {
            render(
                &templates.conversation_message,
                &[("role", &m.role), ("content", &m.content)],
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    render(
        &templates.prompt,
        &[("system_prompt", &system), ("conversation_history", &history)],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_known_placeholders() {
        assert_eq!(
            render("{role}: {content}", &[("role", "user"), ("content", "hi")]),
            "user: hi"
        );
    }

    #[test]
    fn test_render_keeps_unknown_placeholders() {
        assert_eq!(render("{a} {b} {", &[("a", "x")]), "x {b} {");
    }

    #[test]
    fn test_render_does_not_rescan_values() {
        assert_eq!(
            render("{role}: {content}", &[("role", "{content}"), ("content", "c")]),
            "{content}: c"
        );
    }

    #[test]
    fn test_build_prompt_with_defaults() {
        let messages = vec![
            ChatMessage::new("system", "Be brief."),
            ChatMessage::new("user", "Hello"),
            ChatMessage::new("assistant", "Hi"),
            ChatMessage::new("tool", "ignored"),
            ChatMessage::new("user", "Bye"),
        ];

        let prompt = build_prompt(&PromptTemplates::default(), &messages);
        assert_eq!(
            prompt,
            "System: Be brief.\n\nuser: Hello\nassistant: Hi\nuser: Bye"
        );
    }

    #[test]
    fn test_build_prompt_without_system_message() {
        let templates = PromptTemplates {
            prompt: "<s>{system_prompt}</s>{conversation_history}".to_string(),
            system_message: "{system_prompt}".to_string(),
            conversation_message: "[{role}] {content}".to_string(),
        };
        let prompt = build_prompt(&templates, &[ChatMessage::new("user", "x")]);
        assert_eq!(prompt, "<s></s>[user] x");
    }

    #[test]
    fn test_history_window() {
        let messages: Vec<ChatMessage> = (0..20)
            .map(|i| ChatMessage::new("user", format!("m{}", i)))
            .collect();

        let prompt = build_prompt(&PromptTemplates::default(), &messages);
        assert!(!prompt.contains("user: m4\n"));
        assert!(prompt.contains("user: m5\n"));
        assert!(prompt.ends_with("user: m19"));
        assert_eq!(prompt.matches("user: ").count(), HISTORY_WINDOW);
    }

    #[test]
    fn test_system_message_outside_window_still_used() {
        let mut messages = vec![ChatMessage::new("system", "sys")];
        messages.extend((0..20).map(|i| ChatMessage::new("user", format!("m{}", i))));

        let prompt = build_prompt(&PromptTemplates::default(), &messages);
        assert!(prompt.starts_with("System: sys\n\n"));
    }
}
