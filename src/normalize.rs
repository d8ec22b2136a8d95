//! Deterministic team-name rewrites used when neither the native-name cache
//! nor the alias table knows a spelling.
//!
//! The rule table is ordered and data-driven so it can be swapped through
//! `NORMALIZATION_RULES_FILE` without a rebuild.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Where in the name a rule may match. Matching is on whole words and ignores case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    Prefix,
    Suffix,
    Anywhere,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteRule {
    pub position: Position,
    pub from: String,
    #[serde(default)]
    pub to: String,
}

impl RewriteRule {
    fn new(position: Position, from: &str, to: &str) -> Self {
        Self {
            position,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    fn apply(&self, words: Vec<String>) -> Vec<String> {
        let from: Vec<&str> = self.from.split_whitespace().collect();
        let to: Vec<String> = self.to.split_whitespace().map(str::to_string).collect();
        if from.is_empty() || words.len() < from.len() {
            return words;
        }

        let matches_at = |i: usize| {
            from.iter()
                .enumerate()
                .all(|(k, f)| words[i + k].eq_ignore_ascii_case(f))
        };

        match self.position {
            Position::Prefix => {
                // Never rewrite a name down to nothing.
                if matches_at(0) && (words.len() > from.len() || !to.is_empty()) {
                    let mut out = to;
                    out.extend_from_slice(&words[from.len()..]);
                    out
                } else {
                    words
                }
            }
            Position::Suffix => {
                let start = words.len() - from.len();
                if matches_at(start) && (start > 0 || !to.is_empty()) {
                    let mut out = words[..start].to_vec();
                    out.extend(to);
                    out
                } else {
                    words
                }
            }
            Position::Anywhere => {
                let mut out = Vec::with_capacity(words.len());
                let mut i = 0;
                while i < words.len() {
                    if i + from.len() <= words.len() && matches_at(i) {
                        out.extend(to.iter().cloned());
                        i += from.len();
                    } else {
                        out.push(words[i].clone());
                        i += 1;
                    }
                }
                if out.is_empty() {
                    words
                } else {
                    out
                }
            }
        }
    }
}

/// Ordered rewrite table. Rules run top to bottom, each on the output of the last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationRules {
    pub rules: Vec<RewriteRule>,
}

impl Default for NormalizationRules {
    /// Canonical names follow Barttorvik conventions: "St." for State,
    /// abbreviated directional prefixes, no "University" decoration.
    fn default() -> Self {
        use Position::*;
        Self {
            rules: vec![
                RewriteRule::new(Prefix, "University of", ""),
                RewriteRule::new(Suffix, "University", ""),
                RewriteRule::new(Suffix, "Univ.", ""),
                RewriteRule::new(Prefix, "Saint", "St."),
                RewriteRule::new(Anywhere, "St", "St."),
                RewriteRule::new(Anywhere, "State", "St."),
                RewriteRule::new(Anywhere, "North Carolina", "N.C."),
                RewriteRule::new(Anywhere, "South Carolina", "S.C."),
                RewriteRule::new(Prefix, "Northern", "N."),
                RewriteRule::new(Prefix, "Southern", "S."),
                RewriteRule::new(Prefix, "Eastern", "E."),
                RewriteRule::new(Prefix, "Western", "W."),
                RewriteRule::new(Prefix, "Central", "C."),
            ],
        }
    }
}

impl NormalizationRules {
    /// Load a rule table from a JSON file of the form `{"rules": [...]}`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let err = |reason: String| ConfigError::RuleTable {
            path: path.display().to_string(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| err(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| err(e.to_string()))
    }

    /// Clean up a raw name, then apply every rule in order.
    pub fn normalize(&self, name: &str) -> String {
        let cleaned = clean_name(name);
        let words: Vec<String> = cleaned.split_whitespace().map(str::to_string).collect();
        let words = self.rules.iter().fold(words, |w, rule| rule.apply(w));
        words.join(" ")
    }
}

/// Normalize a team name for lookup:
/// - remove parenthetical suffixes (e.g. "(CA)")
/// - normalize curly quotes
/// - collapse whitespace
pub fn clean_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut paren_depth: u32 = 0;

    for ch in name.chars() {
        match ch {
            '(' => paren_depth += 1,
            ')' => paren_depth = paren_depth.saturating_sub(1),
            _ if paren_depth > 0 => {}
            '\u{2019}' | '\u{2018}' => out.push('\''),
            _ => out.push(ch),
        }
    }

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(s: &str) -> String {
        NormalizationRules::default().normalize(s)
    }

    #[test]
    fn state_contracts_to_st() {
        assert_eq!(norm("Ohio State"), "Ohio St.");
        assert_eq!(norm("Ohio St."), "Ohio St.");
        assert_eq!(norm("Ohio St"), "Ohio St.");
    }

    #[test]
    fn leaves_unmatched_names_alone() {
        assert_eq!(norm("Duke Blue Devils"), "Duke Blue Devils");
        assert_eq!(norm("Boston College"), "Boston College");
    }

    #[test]
    fn strips_university_decoration() {
        assert_eq!(norm("University of Kentucky"), "Kentucky");
        assert_eq!(norm("Baylor University"), "Baylor");
        // A bare "University" is not rewritten to an empty name.
        assert_eq!(norm("University"), "University");
    }

    #[test]
    fn abbreviates_directional_prefixes() {
        assert_eq!(norm("Northern Iowa"), "N. Iowa");
        assert_eq!(norm("Eastern Washington"), "E. Washington");
        assert_eq!(norm("North Carolina State"), "N.C. St.");
        assert_eq!(norm("Saint Mary's"), "St. Mary's");
    }

    #[test]
    fn cleanup_drops_parentheticals_and_curly_quotes() {
        assert_eq!(clean_name("Miami (OH)"), "Miami");
        assert_eq!(clean_name("Saint Mary\u{2019}s   (CA)"), "Saint Mary's");
    }

    #[test]
    fn normalization_is_idempotent() {
        for name in ["Ohio State", "Saint Joseph's", "University of Northern Iowa", "Kansas St"] {
            let once = norm(name);
            assert_eq!(norm(&once), once, "{name}");
        }
    }

    #[test]
    fn custom_table_round_trips_through_json() {
        let json = r#"{"rules":[{"position":"suffix","from":"Blue Devils"}]}"#;
        let rules: NormalizationRules = serde_json::from_str(json).unwrap();
        assert_eq!(rules.normalize("Duke Blue Devils"), "Duke");
    }
}
