/// Wildcard matching for model patterns. `*` matches zero or more
/// characters; everything else is literal.
///
/// Used by channel model lists (`claude-*`) and model-mapping rules.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == text;
    }

    let segments: Vec<&str> = pattern.split('*').collect();
    let mut rest = text;

    // First segment is anchored at the start, last at the end.
    let first = segments[0];
    if !rest.starts_with(first) {
        return false;
    }
    rest = &rest[first.len()..];

    let last = segments[segments.len() - 1];
    if !rest.ends_with(last) {
        return false;
    }
    let middle_end = rest.len() - last.len();
    rest = &rest[..middle_end];

    // Middle segments match greedily left to right.
    for seg in &segments[1..segments.len() - 1] {
        if seg.is_empty() {
            continue;
        }
        match rest.find(seg) {
            Some(pos) => rest = &rest[pos + seg.len()..],
            None => return false,
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal() {
        assert!(glob_match("claude-sonnet", "claude-sonnet"));
        assert!(!glob_match("claude-sonnet", "claude-opus"));
        assert!(!glob_match("claude", "claude-sonnet"));
    }

    #[test]
    fn test_prefix_and_suffix() {
        assert!(glob_match("claude-*", "claude-sonnet-4"));
        assert!(glob_match("*-latest", "gemini-2.5-pro-latest"));
        assert!(!glob_match("gpt-*", "claude-sonnet"));
    }

    #[test]
    fn test_infix() {
        assert!(glob_match("*flash*", "gemini-2.0-flash-exp"));
        assert!(glob_match("gemini-*-pro", "gemini-2.5-pro"));
        assert!(!glob_match("gemini-*-pro", "gemini-2.5-flash"));
    }

    #[test]
    fn test_star_alone_and_empty() {
        assert!(glob_match("*", ""));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("", ""));
        assert!(!glob_match("", "x"));
    }

    #[test]
    fn test_adjacent_stars() {
        assert!(glob_match("a**b", "ab"));
        assert!(glob_match("a**b", "axyb"));
    }
}
