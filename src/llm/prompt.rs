//! Prompt templates for voters and the research step.

use chrono::{DateTime, Utc};

use crate::types::Market;

/// Shown in place of research when none is available.
const NO_RESEARCH: &str =
    "No recent research available. Use your best judgment from training data.";

/// System instruction shared by every voter.
pub fn system_prompt(now: DateTime<Utc>) -> String {
    format!(
        "You are an aggressive prediction market trader. You MUST take a position on every market.\n\
         Today's date: {}\n\n\
         ## CRITICAL RULES\n\
         1. You MUST answer YES or NO. Always pick a side.\n\
         2. NO_TRADE is ONLY allowed when the market is completely unknowable.\n\
         3. If you have ANY lean at all, even 51/49, you MUST commit to YES or NO.\n\
         4. Your job is to PREDICT, not to hedge.\n\n\
         ## How to analyze\n\
         1. Read the web research carefully. It contains current real-world information.\n\
         2. Estimate the TRUE probability of YES happening based on all evidence.\n\
         3. Set your confidence to YOUR estimated probability (0.0 to 1.0).\n\
         4. The system handles edge and EV math separately.\n\
         5. Pick YES if your probability > 0.5, pick NO if it is < 0.5.\n\n\
         You MUST respond with valid JSON only, no markdown, no explanation outside JSON.",
        now.format("%Y-%m-%d")
    )
}

/// Human-readable time left until `end`.
pub fn time_remaining(end: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(end) = end else {
        return "Unknown".to_string();
    };
    let delta = end - now;
    if delta.num_days() > 0 {
        format!("{} days", delta.num_days())
    } else if delta.num_seconds() > 0 {
        format!("{} hours", delta.num_hours())
    } else {
        "Expired".to_string()
    }
}

fn pct(price: Option<f64>) -> String {
    price
        .map(|p| format!("{:.2}%", p * 100.0))
        .unwrap_or_else(|| "N/A".to_string())
}

/// Build the user prompt for one market. Shared by every voter in a run.
pub fn build_prediction_prompt(market: &Market, research: &str, now: DateTime<Utc>) -> String {
    let mut prompt = String::with_capacity(2000);

    prompt.push_str("## Market\n");
    prompt.push_str(&format!("**Question:** {}\n", market.question));
    prompt.push_str(&format!(
        "**Description:** {}\n\n",
        market.description.as_deref().unwrap_or("")
    ));

    prompt.push_str("## Current Prices\n");
    prompt.push_str(&format!(
        "- YES: {} | NO: {}\n",
        pct(market.yes_price()),
        pct(market.no_price())
    ));
    prompt.push_str(&format!(
        "- Volume: ${:.0} | Liquidity: ${:.0}\n",
        market.volume, market.liquidity
    ));
    let ends = market
        .end_date
        .map(|d| d.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "unknown".to_string());
    prompt.push_str(&format!(
        "- Time remaining: {} (ends {ends})\n\n",
        time_remaining(market.end_date, now)
    ));

    prompt.push_str("## Web Research (current real-world info)\n");
    if research.trim().is_empty() {
        prompt.push_str(NO_RESEARCH);
    } else {
        prompt.push_str(research.trim());
    }

    prompt.push_str(
        "\n\n## Your task\n\
         Based on ALL the evidence above, what is the TRUE probability that this resolves YES?\n\
         - If your probability > 50%, predict YES with confidence = your probability\n\
         - If your probability < 50%, predict NO with confidence = (1 - your probability)\n\
         - DO NOT default to NO_TRADE. You must pick a side.\n\n\
         Respond ONLY with valid JSON:\n\
         {\"prediction\": \"YES\" | \"NO\", \"confidence\": <0.0-1.0>, \"reasoning\": \"<brief analysis citing specific evidence>\"}",
    );

    prompt
}

/// Build the research request for one market.
pub fn build_research_prompt(market: &Market) -> String {
    let context = market
        .description
        .as_deref()
        .filter(|d| !d.trim().is_empty())
        .unwrap_or("No additional context.");
    format!(
        "Research the latest news and developments about the following question. \
         Focus on facts, recent events, expert opinions, polling data, and any \
         information relevant to predicting the outcome.\n\n\
         Question: {}\n\n\
         Context: {context}\n\n\
         Provide a concise factual summary of the most relevant findings. \
         Include dates and sources where possible.",
        market.question
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
