//! Shell-style wildcard matching (`*` and `?`), case-folded on both sides

/// Returns true when `text` matches `pattern`
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let text: Vec<char> = text.to_lowercase().chars().collect();

    let (mut p, mut t) = (0usize, 0usize);
    // Position of the last '*' seen and the text index it was tried against
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some('?') => {
                p += 1;
                t += 1;
            }
            Some(c) if *c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    t = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}

/// True when any of `patterns` matches. An empty pattern list matches nothing.
pub fn matches_any<S: AsRef<str>>(patterns: &[S], text: &str) -> bool {
    patterns.iter().any(|p| glob_match(p.as_ref(), text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disco_pattern() {
        assert!(glob_match("*disco*", "idol-disco-agent"));
        assert!(!glob_match("*disco*", "idol-content"));
    }

    #[test]
    fn case_insensitive_on_both_sides() {
        assert!(glob_match("*DISCO*", "idol-disco-agent"));
        assert!(glob_match("content", "CONTENT"));
    }

    #[test]
    fn question_mark_matches_exactly_one() {
        assert!(glob_match("24.?", "24.4"));
        assert!(!glob_match("24.?", "24.4.1"));
        assert!(!glob_match("24.?", "24."));
    }

    #[test]
    fn star_matches_empty_and_multiple_segments() {
        assert!(glob_match("*", ""));
        assert!(glob_match("24.4*", "24.4"));
        assert!(glob_match("24.4*", "24.4_fix"));
        assert!(glob_match("a*b*c", "axxbyyc"));
        assert!(!glob_match("a*b*c", "axxbyy"));
        assert!(!glob_match("", "x"));
    }

    #[test]
    fn any_of_several_patterns() {
        let patterns = vec!["content".to_string(), "*agent*".to_string()];
        assert!(matches_any(&patterns, "idol-disco-agent"));
        assert!(matches_any(&patterns, "content"));
        assert!(!matches_any(&patterns, "find"));
        assert!(!matches_any::<String>(&[], "content"));
    }
}
