//! Reasoning-effort ↔ thinking-budget mapping.

use serde_json::{Value, json};

/// OpenAI `reasoning_effort` → thinking budget in tokens. `auto` maps to
/// the provider's dynamic budget (-1).
pub fn effort_to_budget(effort: &str) -> Option<i64> {
    match effort {
        "none" => Some(0),
        "minimal" => Some(512),
        "low" => Some(1024),
        "medium" => Some(8192),
        "high" => Some(24576),
        "xhigh" => Some(32768),
        "auto" => Some(-1),
        _ => None,
    }
}

/// Inverse of [`effort_to_budget`]: bucket a token budget back to the
/// nearest effort level.
pub fn budget_to_effort(budget: i64) -> &'static str {
    match budget {
        b if b < 0 => "auto",
        0 => "none",
        1..=512 => "minimal",
        513..=1024 => "low",
        1025..=8192 => "medium",
        8193..=24576 => "high",
        _ => "xhigh",
    }
}

/// True for the Gemini-3 family, which takes a discrete `thinkingLevel`
/// instead of a token budget.
pub fn is_gemini3(model: &str) -> bool {
    model.starts_with("gemini-3")
}

/// Map an effort level to a Gemini-3 `thinkingLevel`, clamped to the
/// levels the sub-family accepts. The pro sub-family only exposes
/// low/high.
pub fn gemini3_thinking_level(model: &str, effort: &str) -> &'static str {
    let level = match effort {
        "none" | "minimal" => "minimal",
        "low" => "low",
        "medium" => "medium",
        _ => "high",
    };
    if model.starts_with("gemini-3-pro") {
        match level {
            "minimal" | "low" => "low",
            _ => "high",
        }
    } else {
        level
    }
}

/// Write the thinking settings into a Gemini `generationConfig`:
/// `thinkingLevel` for Gemini-3, `thinkingBudget` otherwise.
pub fn apply_gemini_thinking(generation_config: &mut Value, model: &str, effort: &str) {
    let Some(obj) = generation_config.as_object_mut() else {
        return;
    };
    if is_gemini3(model) {
        obj.insert(
            "thinkingConfig".into(),
            json!({"thinkingLevel": gemini3_thinking_level(model, effort)}),
        );
    } else if let Some(budget) = effort_to_budget(effort) {
        obj.insert("thinkingConfig".into(), json!({"thinkingBudget": budget}));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effort_table() {
        assert_eq!(effort_to_budget("none"), Some(0));
        assert_eq!(effort_to_budget("minimal"), Some(512));
        assert_eq!(effort_to_budget("low"), Some(1024));
        assert_eq!(effort_to_budget("medium"), Some(8192));
        assert_eq!(effort_to_budget("high"), Some(24576));
        assert_eq!(effort_to_budget("xhigh"), Some(32768));
        assert_eq!(effort_to_budget("auto"), Some(-1));
        assert_eq!(effort_to_budget("huge"), None);
    }

    #[test]
    fn test_budget_round_trip() {
        for effort in ["none", "minimal", "low", "medium", "high", "xhigh", "auto"] {
            let budget = effort_to_budget(effort).unwrap();
            assert_eq!(budget_to_effort(budget), effort);
        }
    }

    #[test]
    fn test_gemini3_levels() {
        assert_eq!(gemini3_thinking_level("gemini-3-flash", "minimal"), "minimal");
        assert_eq!(gemini3_thinking_level("gemini-3-flash", "medium"), "medium");
        // pro sub-family only accepts low/high
        assert_eq!(gemini3_thinking_level("gemini-3-pro", "minimal"), "low");
        assert_eq!(gemini3_thinking_level("gemini-3-pro", "medium"), "high");
        assert_eq!(gemini3_thinking_level("gemini-3-pro", "xhigh"), "high");
    }

    #[test]
    fn test_apply_gemini_thinking() {
        let mut cfg = json!({});
        apply_gemini_thinking(&mut cfg, "gemini-3-pro-preview", "medium");
        assert_eq!(cfg["thinkingConfig"]["thinkingLevel"], "high");

        let mut cfg = json!({});
        apply_gemini_thinking(&mut cfg, "gemini-2.5-flash", "medium");
        assert_eq!(cfg["thinkingConfig"]["thinkingBudget"], 8192);
    }
}
