//! Path globs for watch patterns.
//!
//! Patterns are matched segment by segment on `/`:
//! - `*` matches zero or more characters inside one segment
//! - `?` matches exactly one character inside one segment
//! - `**` as a whole segment matches zero or more segments

/// Upper bound on matcher steps, against patterns like `*a*a*a*...`.
const MAX_MATCH_CALLS: usize = 100_000;

/// Whether `path` (slash separated) matches `pattern` in full.
pub fn path_matches(pattern: &str, path: &str) -> bool {
    let pat: Vec<&str> = split(pattern);
    let input: Vec<&str> = split(path);
    let mut calls = 0usize;
    match_segments(&pat, &input, &mut calls)
}

/// Leading literal part of `pattern`: the directory to scan from.
pub fn base_dir(pattern: &str) -> String {
    let absolute = pattern.starts_with('/');
    let literal: Vec<&str> = split(pattern)
        .into_iter()
        .take_while(|seg| !has_magic(seg))
        .collect();

    // the last literal segment may be the file itself
    let dir = if literal.len() == split(pattern).len() {
        &literal[..literal.len().saturating_sub(1)]
    } else {
        &literal[..]
    };
    match (absolute, dir.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{}", dir.join("/")),
        (false, true) => ".".to_string(),
        (false, false) => dir.join("/"),
    }
}

pub fn has_magic(segment: &str) -> bool {
    segment.contains('*') || segment.contains('?')
}

fn split(s: &str) -> Vec<&str> {
    s.split('/').filter(|seg| !seg.is_empty() && *seg != ".").collect()
}

fn match_segments(pat: &[&str], input: &[&str], calls: &mut usize) -> bool {
    *calls += 1;
    if *calls > MAX_MATCH_CALLS {
        return false;
    }
    match pat.split_first() {
        None => input.is_empty(),
        Some((&"**", rest)) => {
            (0..=input.len()).any(|skip| match_segments(rest, &input[skip..], calls))
        }
        Some((seg, rest)) => match input.split_first() {
            Some((first, tail)) => {
                let seg: Vec<char> = seg.chars().collect();
                let name: Vec<char> = first.chars().collect();
                match_chars(&seg, &name, calls) && match_segments(rest, tail, calls)
            }
            None => false,
        },
    }
}

fn match_chars(pat: &[char], input: &[char], calls: &mut usize) -> bool {
    *calls += 1;
    if *calls > MAX_MATCH_CALLS {
        return false;
    }
    match pat.split_first() {
        None => input.is_empty(),
        Some((&'*', rest)) => (0..=input.len()).any(|skip| match_chars(rest, &input[skip..], calls)),
        Some((&'?', rest)) => !input.is_empty() && match_chars(rest, &input[1..], calls),
        Some((c, rest)) => input.first() == Some(c) && match_chars(rest, &input[1..], calls),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_stays_inside_a_segment() {
        assert!(path_matches("src/*.rs", "src/main.rs"));
        assert!(!path_matches("src/*.rs", "src/bin/main.rs"));
        assert!(path_matches("src/?ain.rs", "./src/main.rs"));
    }

    #[test]
    fn double_star_spans_directories() {
        assert!(path_matches("src/**/*.rs", "src/main.rs"));
        assert!(path_matches("src/**/*.rs", "src/a/b/c.rs"));
        assert!(path_matches("**/*.json", "config/app.json"));
        assert!(!path_matches("src/**/*.rs", "tests/a.rs"));
    }

    #[test]
    fn literal_patterns_match_exactly() {
        assert!(path_matches("/etc/app.conf", "/etc/app.conf"));
        assert!(!path_matches("/etc/app.conf", "/etc/app.conf.bak"));
    }

    #[test]
    fn base_dir_is_the_literal_prefix() {
        assert_eq!(base_dir("src/**/*.rs"), "src");
        assert_eq!(base_dir("*.toml"), ".");
        assert_eq!(base_dir("/etc/app.conf"), "/etc");
        assert_eq!(base_dir("./config/*.json"), "config");
    }

    #[test]
    fn pathological_pattern_gives_up() {
        let pattern = "*a*a*a*a*a*a*a*a*a*a*a*b";
        let input = "a".repeat(60);
        assert!(!path_matches(pattern, &input));
    }
}
