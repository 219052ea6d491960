//! Deterministic canned text used when a live call fails or in mock mode

use crate::types::{ProviderId, Round};

/// Simulated answer for one step. Pure: the same inputs always give the same text.
pub fn fallback_text(prompt: &str, round: Round, provider: ProviderId) -> String {
    let name = provider.display_name();
    let n = round.number();
    match (round, provider) {
        (Round::Initial, ProviderId::Gpt) => format!(
            "{name} Round {n}: This is a simulated response to \"{prompt}\". The live model is \
             currently unavailable, so this placeholder shows how the boardroom works. With a \
             working connection this answer would come from OpenAI's GPT-4."
        ),
        (Round::Initial, ProviderId::Claude) => format!(
            "{name} Round {n}: Here is a simulated response to \"{prompt}\". The live model is \
             currently unavailable, so this placeholder stands in for Anthropic's Claude."
        ),
        (Round::Initial, ProviderId::Gemini) => format!(
            "{name} Round {n}: This is a simulated response to \"{prompt}\". The live model is \
             currently unavailable, so this placeholder stands in for Google's Gemini."
        ),
        (Round::Refinement, ProviderId::Gpt) => format!(
            "{name} Round {n}: After reviewing what Claude and Gemini said about \"{prompt}\", \
             I would refine my earlier answer. This is a simulated response; a live model would \
             fold their insights into a sharper reply."
        ),
        (Round::Refinement, ProviderId::Claude) => format!(
            "{name} Round {n}: Building on what GPT-4 and Gemini shared about \"{prompt}\", let me \
             refine my thoughts. This is a simulated response; a live model would add insights \
             that complement the others."
        ),
        (Round::Refinement, ProviderId::Gemini) => format!(
            "{name} Round {n} Final Answer: Here is a synthesis of the discussion on \"{prompt}\". \
             This is a simulated response; a live model would combine all three perspectives \
             into one comprehensive answer."
        ),
    }
}

/// Cumulative prefixes of `text` at word boundaries.
///
/// The last element is always `text` itself (an empty input yields one empty
/// prefix).
pub fn word_increments(text: &str) -> Vec<String> {
    let mut prefixes = Vec::new();
    let mut current = String::with_capacity(text.len());
    for (i, word) in text.split(' ').enumerate() {
        if i > 0 {
            current.push(' ');
        }
        current.push_str(word);
        prefixes.push(current.clone());
    }
    prefixes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_template_names_prompt_round_and_provider() {
        for round in [Round::Initial, Round::Refinement] {
            for provider in ProviderId::ALL {
                let text = fallback_text("What day is it?", round, provider);
                assert!(text.contains("\"What day is it?\""), "{text}");
                assert!(text.contains(provider.display_name()));
                assert!(text.contains(&format!("Round {}", round.number())));
                assert!(text.contains("simulated"));
            }
        }
    }

    #[test]
    fn test_fallback_is_deterministic() {
        let a = fallback_text("x", Round::Refinement, ProviderId::Gemini);
        let b = fallback_text("x", Round::Refinement, ProviderId::Gemini);
        assert_eq!(a, b);
    }

    #[test]
    fn test_word_increments() {
        assert_eq!(word_increments("a bb c"), ["a", "a bb", "a bb c"]);
        assert_eq!(word_increments(""), [""]);
        let text = fallback_text("hi", Round::Initial, ProviderId::Gpt);
        let steps = word_increments(&text);
        assert_eq!(steps.last(), Some(&text));
        assert!(steps.windows(2).all(|w| w[0].len() < w[1].len()));
    }
}
