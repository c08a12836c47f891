use std::fmt::Write;

use super::quality::ExemplarSet;
use crate::llm::{ChatMessage, ChatRequest};

pub const SYSTEM_PROMPT: &str = "You are an expert mental health therapist. Your role is to \
provide thoughtful, empathetic, and clinically sound responses to patients based on similar \
examples of high-quality therapeutic interactions.";

/// Fixed response when the search found nothing to learn from.
pub const NO_EXAMPLES_NOTICE: &str = "I apologize, but I couldn't find any similar examples to \
help generate a response. Please provide more context or try different keywords.";

/// Fixed response when candidates were found but none carried exemplars.
pub const NO_EXEMPLARS_NOTICE: &str = "I found similar examples but none had quality-graded \
responses available. Please try different keywords or provide more context.";

/// Builds the user prompt: exemplar blocks, keyword context, then the
/// caller's situation and closing instructions.
pub fn build_user_prompt(user_query: &str, keywords: &[String], exemplars: &[ExemplarSet]) -> String {
    let mut prompt = String::from(
        "You are tasked with providing a high-quality therapeutic response based on similar \
patient interactions.\n\nBelow are examples of similar patient situations and the responses \
that therapists provided:\n\n",
    );

    for (i, set) in exemplars.iter().enumerate() {
        let _ = writeln!(prompt, "--- Example {} ---", i + 1);
        let _ = writeln!(prompt, "Patient Situation: {}", set.prompt);
        let _ = writeln!(prompt, "{} Therapist Responses:", set.tier.label());
        for (j, response) in set.responses.iter().enumerate() {
            let _ = writeln!(prompt, "{}. {}", j + 1, response);
        }
    }

    let focus: Vec<&str> = keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .collect();
    if !focus.is_empty() {
        let _ = writeln!(prompt, "\nFocus areas: {}", focus.join(", "));
    }

    let _ = write!(
        prompt,
        "--- Current Situation ---\n{}\n\n\
Based on the examples above, please provide a thoughtful, empathetic, and clinically appropriate \
response. Consider:\n\
1. The therapeutic techniques demonstrated in the examples\n\
2. The tone and approach used in the responses\n\
3. The specific context and needs presented in the current situation\n\
4. Professional boundaries and best practices\n\n\
Your synthesized response:",
        user_query
    );

    prompt
}

pub fn build_chat_request(
    user_query: &str,
    keywords: &[String],
    exemplars: &[ExemplarSet],
    temperature: Option<f64>,
    max_tokens: Option<u32>,
) -> ChatRequest {
    ChatRequest::new(vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(build_user_prompt(user_query, keywords, exemplars)),
    ])
    .with_sampling(temperature, max_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::QualityTier;

    fn exemplar(prompt: &str, tier: QualityTier, responses: &[&str]) -> ExemplarSet {
        ExemplarSet {
            prompt: prompt.into(),
            tier,
            responses: responses.iter().map(|r| r.to_string()).collect(),
            similarity_score: 0.9,
        }
    }

    #[test]
    fn prompt_lists_examples_in_order() {
        let prompt = build_user_prompt(
            "I can't sleep",
            &["Sleep & Fatigue".into()],
            &[
                exemplar("Insomnia for weeks", QualityTier::High, &["Try a routine", "Tell me more"]),
                exemplar("Restless nights", QualityTier::Medium, &["Relax"]),
            ],
        );

        let first = prompt.find("--- Example 1 ---").unwrap();
        let second = prompt.find("--- Example 2 ---").unwrap();
        let current = prompt.find("--- Current Situation ---\nI can't sleep").unwrap();
        assert!(first < second && second < current);
        assert!(prompt.contains("High-Quality Therapist Responses:\n1. Try a routine\n2. Tell me more\n"));
        assert!(prompt.contains("Medium-Quality Therapist Responses:\n1. Relax\n"));
        assert!(prompt.contains("Focus areas: Sleep & Fatigue"));
        assert!(prompt.ends_with("Your synthesized response:"));
    }

    #[test]
    fn no_focus_line_without_keywords() {
        let prompt = build_user_prompt("hi", &[" ".into()], &[]);
        assert!(!prompt.contains("Focus areas"));
    }

    #[test]
    fn chat_request_has_system_and_user_messages() {
        let request = build_chat_request("hi", &[], &[], Some(0.7), Some(1000));
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, "system");
        assert_eq!(request.messages[0].content, SYSTEM_PROMPT);
        assert_eq!(request.messages[1].role, "user");
        assert_eq!(request.temperature, Some(0.7));
        assert_eq!(request.max_tokens, Some(1000));
    }
}
