use regex::Regex;

/// Characters that turn a path segment into a glob.
const WILDCARDS: &[char] = &['*', '?', '['];

/// Glob pattern over object keys, relative to a location's prefix.
///
/// `*` matches within one path segment, `**` spans segments, `?` matches a
/// single non-separator character and `[...]` is a character class. An empty
/// pattern matches every key.
#[derive(Debug, Clone)]
pub struct KeyPattern {
    glob: String,
    regex: Option<Regex>,
}

impl KeyPattern {
    pub fn new(glob: &str) -> Result<Self, regex::Error> {
        let glob = glob.trim_matches('/').to_string();
        let regex = if glob.is_empty() {
            None
        } else {
            Some(Regex::new(&glob_to_regex(&glob))?)
        };
        Ok(Self { glob, regex })
    }

    /// Pattern that accepts every key.
    pub fn any() -> Self {
        Self {
            glob: String::new(),
            regex: None,
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        match &self.regex {
            Some(re) => re.is_match(key),
            None => true,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.glob
    }
}

/// Split a key into its literal directory prefix and the glob remainder.
///
/// `song_data/*/*/*.json` → (`song_data`, `*/*/*.json`). A key without
/// wildcards is all prefix.
pub fn split_literal_prefix(key: &str) -> (String, String) {
    let segments: Vec<&str> = key.split('/').collect();
    let first_glob = segments
        .iter()
        .position(|s| s.contains(WILDCARDS))
        .unwrap_or(segments.len());
    let literal = segments[..first_glob].join("/");
    let rest = segments[first_glob..].join("/");
    (literal, rest)
}

pub fn has_wildcard(key: &str) -> bool {
    key.contains(WILDCARDS)
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() * 2 + 2);
    out.push('^');
    let chars: Vec<char> = glob.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                // `**/` may also match zero segments
                if chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '[' => match chars[i + 1..].iter().position(|&c| c == ']') {
                Some(len) => {
                    let class: String = chars[i + 1..i + 1 + len].iter().collect();
                    let class = match class.strip_prefix('!') {
                        Some(negated) => format!("^{}", negated),
                        None => class,
                    };
                    out.push('[');
                    out.push_str(&class.replace('\\', "\\\\"));
                    out.push(']');
                    i += len + 2;
                    continue;
                }
                None => out.push_str("\\["),
            },
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_star_stays_in_segment() {
        let p = KeyPattern::new("*/*/*.json").unwrap();
        assert!(p.matches("A/B/TRABCEI128F424C983.json"));
        assert!(!p.matches("A/TRABCEI128F424C983.json"));
        assert!(!p.matches("A/B/C/TRABCEI128F424C983.json"));
        assert!(!p.matches("A/B/notes.txt"));
    }

    #[test]
    fn test_double_star_spans_segments() {
        let p = KeyPattern::new("**/*.json").unwrap();
        assert!(p.matches("2018/11/2018-11-05-events.json"));
        assert!(p.matches("2018-11-05-events.json"));
        assert!(!p.matches("2018/11/readme.md"));
    }

    #[test]
    fn test_question_mark_and_class() {
        let p = KeyPattern::new("2018/1?/[0-9]*.json").unwrap();
        assert!(p.matches("2018/11/2018-11-01-events.json"));
        assert!(!p.matches("2018/1/2018-11-01-events.json"));
        assert!(!p.matches("2018/11/x-events.json"));

        let negated = KeyPattern::new("[!_]*.json").unwrap();
        assert!(negated.matches("part.json"));
        assert!(!negated.matches("_part.json"));
    }

    #[test]
    fn test_dots_are_literal() {
        let p = KeyPattern::new("*.json").unwrap();
        assert!(!p.matches("fileXjson"));
    }

    #[test]
    fn test_empty_pattern_matches_everything() {
        let p = KeyPattern::new("").unwrap();
        assert!(p.matches("a/b/c.json"));
        assert!(KeyPattern::any().matches("anything"));
    }

    #[test]
    fn test_split_literal_prefix() {
        assert_eq!(
            split_literal_prefix("song_data/*/*/*/*.json"),
            ("song_data".to_string(), "*/*/*/*.json".to_string())
        );
        assert_eq!(
            split_literal_prefix("log_data/2018/11"),
            ("log_data/2018/11".to_string(), String::new())
        );
        assert_eq!(
            split_literal_prefix("*.json"),
            (String::new(), "*.json".to_string())
        );
        assert_eq!(
            split_literal_prefix("/data/logs/2018-*.json"),
            ("/data/logs".to_string(), "2018-*.json".to_string())
        );
    }
}
