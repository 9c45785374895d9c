//! Prompt text sent to the generation service.
//!
//! Kept in one place so the wording can be tested without a provider.

use crate::config::Language;

/// Prompt used when the user does not type one.
pub const DEFAULT_PROMPT: &str = "Explain what's in this document";

/// Answer shown when the model returns no text.
pub const NO_RESPONSE: &str = "Sorry, I couldn't generate a response.";

/// Wrap `prompt` with an instruction to answer in `language`.
///
/// English prompts are returned unchanged.
pub fn with_language(prompt: &str, language: Language) -> String {
    if language == Language::English {
        return prompt.to_string();
    }
    let name = language.name();
    format!(
        "IMPORTANT: You must respond ENTIRELY in {name} language.\n\
         All explanations, descriptions, and text must be written in {name}.\n\n\
         User's question: {prompt}"
    )
}

/// Build a follow-up question grounded in an earlier explanation.
pub fn follow_up(original_content: &str, question: &str) -> String {
    grounded("this explanation", original_content, question)
}

/// Build a question about a saved note.
pub fn follow_up_on_note(note_content: &str, question: &str) -> String {
    grounded("this saved note", note_content, question)
}

fn grounded(what: &str, content: &str, question: &str) -> String {
    format!(
        "Based on {what}:\n\n{content}\n\n\
         Answer this follow-up question briefly and clearly:\n{question}\n\n\
         Keep the answer concise and directly related to the content above."
    )
}

/// Note title derived from the prompt: first line, at most 60 characters.
pub fn note_title(prompt: &str) -> String {
    let first = prompt.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or(DEFAULT_PROMPT);
    let mut title: String = first.chars().take(60).collect();
    if first.chars().count() > 60 {
        title.push('…');
    }
    title
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn english_prompt_is_untouched() {
        assert_eq!(with_language("What is osmosis?", Language::English), "What is osmosis?");
    }

    #[test]
    fn other_languages_are_enforced() {
        let p = with_language("What is osmosis?", Language::Hindi);
        assert!(p.starts_with("IMPORTANT: You must respond ENTIRELY in Hindi language."));
        assert!(p.contains("must be written in Hindi."));
        assert!(p.ends_with("User's question: What is osmosis?"));
    }

    #[test]
    fn follow_up_embeds_both_parts() {
        let p = follow_up("Cells divide by mitosis.", "What is meiosis?");
        assert!(p.starts_with("Based on this explanation:\n\nCells divide by mitosis."));
        assert!(p.contains("briefly and clearly:\nWhat is meiosis?"));
    }

    #[test]
    fn note_question_names_the_note() {
        let p = follow_up_on_note("Osmosis moves water.", "Why?");
        assert_eq!(
            p,
            "Based on this saved note:\n\nOsmosis moves water.\n\n\
             Answer this follow-up question briefly and clearly:\nWhy?\n\n\
             Keep the answer concise and directly related to the content above."
        );
    }

    #[test]
    fn note_titles_are_short() {
        assert_eq!(note_title("\n  Photosynthesis basics \nmore"), "Photosynthesis basics");
        assert_eq!(note_title(""), DEFAULT_PROMPT);
        let long = "x".repeat(80);
        assert_eq!(note_title(&long).chars().count(), 61);
    }
}
