//! Model extraction and mapping.
//!
//! The model comes from the URL path for Gemini calls and from the body
//! for everything else. Mapping rules are tenant-scoped: exact patterns
//! win over globs, and a rule target may pin a reasoning-effort level
//! with a `:effort` suffix.

use conduit_core::context::ProxyConfig;
use conduit_core::error::ProxyError;
use conduit_core::glob::glob_match;
use serde_json::Value;

const EFFORT_LEVELS: &[&str] = &["none", "minimal", "low", "medium", "high", "xhigh", "auto"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedModel {
    pub original: String,
    pub upstream: String,
    /// Effort pinned by the mapping rule, if any.
    pub effort: Option<String>,
}

/// Extract the model from the body's `model` field.
pub fn model_from_body(body: &Value) -> Result<String, ProxyError> {
    body.get("model")
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .ok_or_else(|| ProxyError::BadRequest("missing model field".into()))
}

/// Split a Gemini path segment `{model}:{action}` into its parts.
pub fn split_gemini_segment(segment: &str) -> Result<(String, String), ProxyError> {
    match segment.split_once(':') {
        Some((model, action)) if !model.is_empty() && !action.is_empty() => {
            Ok((model.to_string(), action.to_string()))
        }
        _ => Err(ProxyError::BadRequest(format!(
            "malformed model path segment: {segment}"
        ))),
    }
}

/// Apply the tenant's mapping rules to a requested model name.
pub fn apply_mapping(config: &ProxyConfig, model: &str) -> MappedModel {
    for rule in &config.model_mappings {
        if glob_match(&rule.pattern, model) {
            let (target, effort) = split_effort_suffix(&rule.target);
            return MappedModel {
                original: model.to_string(),
                upstream: target.to_string(),
                effort: effort.map(str::to_string),
            };
        }
    }
    MappedModel {
        original: model.to_string(),
        upstream: model.to_string(),
        effort: None,
    }
}

/// `o3:high` → (`o3`, Some("high")). Unknown suffixes stay part of the
/// model name.
fn split_effort_suffix(target: &str) -> (&str, Option<&str>) {
    if let Some((model, suffix)) = target.rsplit_once(':')
        && EFFORT_LEVELS.contains(&suffix)
    {
        return (model, Some(suffix));
    }
    (target, None)
}

/// Rewrite the body's `model` field to the upstream name.
pub fn rewrite_body_model(body: &mut Value, upstream_model: &str) {
    if let Some(obj) = body.as_object_mut()
        && obj.contains_key("model")
    {
        obj.insert("model".into(), Value::String(upstream_model.to_string()));
    }
}

/// Reasoning effort as stated in the request body (OpenAI dialects).
pub fn effort_from_body(body: &Value) -> Option<String> {
    body.get("reasoning_effort")
        .and_then(|e| e.as_str())
        .map(str::to_string)
        .or_else(|| {
            body.get("reasoning")
                .and_then(|r| r.get("effort"))
                .and_then(|e| e.as_str())
                .map(str::to_string)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::context::ModelMappingRule;
    use serde_json::json;

    fn config(rules: &[(&str, &str)]) -> ProxyConfig {
        ProxyConfig {
            tenant_id: 1,
            api_key_id: 1,
            upstream_url: None,
            upstream_api_key: None,
            model_mappings: rules
                .iter()
                .map(|(p, t)| ModelMappingRule {
                    pattern: p.to_string(),
                    target: t.to_string(),
                })
                .collect(),
            native_mode: false,
            web_search_mode: false,
        }
    }

    #[test]
    fn test_exact_mapping() {
        let cfg = config(&[("gpt-4o", "gpt-4o-mini")]);
        let m = apply_mapping(&cfg, "gpt-4o");
        assert_eq!(m.upstream, "gpt-4o-mini");
        assert_eq!(m.original, "gpt-4o");
        assert!(m.effort.is_none());
    }

    #[test]
    fn test_glob_mapping_with_effort() {
        let cfg = config(&[("claude-*", "o3:high")]);
        let m = apply_mapping(&cfg, "claude-sonnet-4");
        assert_eq!(m.upstream, "o3");
        assert_eq!(m.effort.as_deref(), Some("high"));
    }

    #[test]
    fn test_unmapped_passthrough() {
        let cfg = config(&[("gpt-*", "x")]);
        let m = apply_mapping(&cfg, "claude-sonnet");
        assert_eq!(m.upstream, "claude-sonnet");
    }

    #[test]
    fn test_effort_suffix_only_for_known_levels() {
        // A colon that is not an effort suffix stays in the name.
        let cfg = config(&[("m", "ft:gpt-4o:org")]);
        let m = apply_mapping(&cfg, "m");
        assert_eq!(m.upstream, "ft:gpt-4o:org");
        assert!(m.effort.is_none());
    }

    #[test]
    fn test_split_gemini_segment() {
        let (model, action) =
            split_gemini_segment("gemini-2.0-flash:streamGenerateContent").unwrap();
        assert_eq!(model, "gemini-2.0-flash");
        assert_eq!(action, "streamGenerateContent");
        assert!(split_gemini_segment("no-action").is_err());
    }

    #[test]
    fn test_body_helpers() {
        let mut body = json!({"model": "a", "reasoning_effort": "low"});
        assert_eq!(model_from_body(&body).unwrap(), "a");
        assert_eq!(effort_from_body(&body).as_deref(), Some("low"));
        rewrite_body_model(&mut body, "b");
        assert_eq!(body["model"], "b");

        assert!(model_from_body(&json!({})).is_err());
    }
}
