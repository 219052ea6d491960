//! Role framing and round-2 prompt construction

use crate::types::{ProviderId, Round, RoundContext};

const GPT_ROUND1: &str = "You are GPT-4, an advanced AI assistant. Analyze the user's question and \
provide a thoughtful, direct response. Be clear, concise, and accurate. If asked about facts like \
dates, time, or specific information, provide the factual answer without strategic analysis.";

const GPT_ROUND2: &str = "You are GPT-4, an advanced AI assistant. You've already provided an \
initial response to the user's question. Now, you've seen responses from Claude and Gemini on the \
same topic. Refine your original answer by incorporating valuable insights from their \
perspectives. Be direct and factual, especially for questions about dates, time, or specific \
information.";

const CLAUDE_ROUND1: &str = "You are Claude, an AI assistant by Anthropic. Analyze the user's \
question and provide a direct, factual response. Be clear, concise, and accurate. If asked about \
facts like dates, time, or specific information, provide the factual answer without unnecessary \
analysis.";

const CLAUDE_ROUND2: &str = "You are Claude, an AI assistant by Anthropic. You've already \
provided an initial response to the user's question. Now, you've seen responses from GPT-4 and \
Gemini on the same topic. Refine your original answer by incorporating valuable insights from \
their perspectives while maintaining your unique viewpoint. Be direct and factual, especially for \
questions about dates, time, or specific information.";

const GEMINI_ROUND1: &str = "You are Gemini, Google's advanced AI model. Analyze the user's \
question and provide a direct, factual response. Be clear, concise, and accurate. If asked about \
facts like dates, time, or specific information, provide the factual answer without unnecessary \
analysis.";

const GEMINI_ROUND2: &str = "You are Gemini, Google's advanced AI model. You've already provided \
an initial response to the user's question. Now, you've seen responses from GPT-4 and Claude on \
the same topic. Your task is to synthesize all three perspectives (including your own) into a \
comprehensive final response. Be direct and factual, especially for questions about dates, time, \
or specific information.";

const MISSING: &str = "(no response)";

/// Static role framing for one provider in one round
pub fn system_prompt(provider: ProviderId, round: Round) -> &'static str {
    match (provider, round) {
        (ProviderId::Gpt, Round::Initial) => GPT_ROUND1,
        (ProviderId::Gpt, Round::Refinement) => GPT_ROUND2,
        (ProviderId::Claude, Round::Initial) => CLAUDE_ROUND1,
        (ProviderId::Claude, Round::Refinement) => CLAUDE_ROUND2,
        (ProviderId::Gemini, Round::Initial) => GEMINI_ROUND1,
        (ProviderId::Gemini, Round::Refinement) => GEMINI_ROUND2,
    }
}

/// User prompt for `provider` in `round`.
///
/// Round 1 is the verbatim question. Round 2 appends the other two
/// providers' round-1 answers; gemini, which speaks last, also sees the
/// refined answers of gpt and claude.
pub fn user_prompt(provider: ProviderId, round: Round, ctx: &RoundContext) -> String {
    if round == Round::Initial {
        return ctx.prompt.clone();
    }

    let mut out = format!("Original question: {}\n\n", ctx.prompt);

    if let Some(own) = ctx.initial.get(&provider) {
        out.push_str(&format!("Your round 1 answer:\n{}\n\n", own));
    }

    out.push_str("Round 1 perspectives:\n");
    for other in provider.others() {
        let text = ctx.initial.get(&other).map_or(MISSING, String::as_str);
        out.push_str(&format!("\n{}:\n{}\n", other.display_name(), text));
    }

    if provider == ProviderId::Gemini {
        out.push_str("\nRound 2 refinements:\n");
        for other in provider.others() {
            let text = ctx.refined.get(&other).map_or(MISSING, String::as_str);
            out.push_str(&format!("\n{}:\n{}\n", other.display_name(), text));
        }
        out.push_str("\nSynthesize these perspectives into one final answer.");
    } else {
        out.push_str("\nRefine your answer given these perspectives.");
    }

    out
}
