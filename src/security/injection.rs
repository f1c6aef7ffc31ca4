//! SQL-injection classification for string parameter values.
//!
//! A value is classified as it would appear inside a single-quoted SQL
//! literal: it is lexed into coarse token classes and the resulting
//! fingerprint is matched against the shapes injection payloads take
//! (quote break-out followed by logic, comment truncation, stacked
//! statements, union-select). Ordinary prose, emails, and names with an
//! apostrophe do not match.
//!
//! The fingerprint uses one character per token, in the style of
//! libinjection: `s` string/quote, `n` number, `k` keyword, `w` word,
//! `o` operator, `l` logic (AND/OR), `c` comment, `;` statement separator,
//! `=` comparison.

use sha2::{Digest, Sha256};

/// Classification outcome for one value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectionVerdict {
    /// No injection shape found.
    Clean,
    /// The value matches an injection shape.
    Suspicious {
        /// Token-class fingerprint of the match.
        fingerprint: String,
        /// SHA-256 of the fingerprint plus value, for audit correlation.
        digest: String,
    },
}

impl InjectionVerdict {
    /// Whether the value was flagged.
    #[must_use]
    pub const fn is_suspicious(&self) -> bool {
        matches!(self, Self::Suspicious { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Quote,
    Number,
    Keyword,
    Logic,
    Word,
    Operator,
    Comparison,
    Comment,
    Semicolon,
}

impl Token {
    const fn class(self) -> char {
        match self {
            Self::Quote => 's',
            Self::Number => 'n',
            Self::Keyword => 'k',
            Self::Logic => 'l',
            Self::Word => 'w',
            Self::Operator => 'o',
            Self::Comparison => '=',
            Self::Comment => 'c',
            Self::Semicolon => ';',
        }
    }
}

const KEYWORDS: &[&str] = &[
    "select", "union", "insert", "update", "delete", "drop", "alter", "create", "exec",
    "execute", "truncate", "grant", "revoke", "from", "where", "having", "sleep", "benchmark",
    "waitfor", "load_file", "outfile", "information_schema",
];

fn lex(value: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = value.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' | '`' => {
                tokens.push(Token::Quote);
                i += 1;
            },
            '-' if chars.get(i + 1) == Some(&'-') => {
                tokens.push(Token::Comment);
                break;
            },
            '/' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::Comment);
                i += 2;
            },
            '#' => {
                tokens.push(Token::Comment);
                break;
            },
            ';' => {
                tokens.push(Token::Semicolon);
                i += 1;
            },
            '=' | '<' | '>' => {
                tokens.push(Token::Comparison);
                i += 1;
            },
            '|' | '&' | '+' | '*' | '%' => {
                tokens.push(Token::Operator);
                i += 1;
            },
            _ if c.is_ascii_digit() => {
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                tokens.push(Token::Number);
            },
            _ if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect::<String>().to_lowercase();
                if word == "or" || word == "and" || word == "xor" || word == "not" {
                    tokens.push(Token::Logic);
                } else if KEYWORDS.contains(&word.as_str()) {
                    tokens.push(Token::Keyword);
                } else {
                    tokens.push(Token::Word);
                }
            },
            _ => i += 1,
        }
    }
    tokens
}

fn fingerprint_of(tokens: &[Token]) -> String {
    tokens.iter().map(|t| t.class()).collect()
}

/// Whether the token stream has an injection shape.
fn is_attack(tokens: &[Token]) -> bool {
    let has = |t: Token| tokens.contains(&t);

    // Stacked statement: separator followed by a mutating keyword.
    if let Some(pos) = tokens.iter().position(|t| *t == Token::Semicolon) {
        if tokens[pos..].iter().any(|t| *t == Token::Keyword) {
            return true;
        }
    }

    // Union-select and friends need no quote at all.
    let keyword_count = tokens.iter().filter(|t| **t == Token::Keyword).count();
    if keyword_count >= 2 {
        return true;
    }

    // Quote break-out: a quote followed by boolean logic or a comment.
    if let Some(pos) = tokens.iter().position(|t| *t == Token::Quote) {
        let rest = &tokens[pos..];
        if rest.iter().any(|t| matches!(t, Token::Logic | Token::Comment | Token::Keyword)) {
            return true;
        }
        // Tautology without the logic word spelled out: '1'='1
        if rest
            .windows(3)
            .any(|w| w[1] == Token::Comparison && w[0] == w[2] && w[0] != Token::Word)
        {
            return true;
        }
    }

    // Boolean tautology without quotes: 1=1 OR ...
    if has(Token::Logic)
        && tokens
            .windows(3)
            .any(|w| w[0] == Token::Number && w[1] == Token::Comparison && w[2] == Token::Number)
    {
        return true;
    }

    false
}

/// Classifies a string parameter value.
#[must_use]
pub fn classify(value: &str) -> InjectionVerdict {
    let tokens = lex(value);
    if !is_attack(&tokens) {
        return InjectionVerdict::Clean;
    }
    let fingerprint = fingerprint_of(&tokens);
    let mut hasher = Sha256::new();
    hasher.update(fingerprint.as_bytes());
    hasher.update(value.as_bytes());
    let digest = hex::encode(&hasher.finalize()[..8]);
    InjectionVerdict::Suspicious {
        fingerprint,
        digest,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("' OR 1=1 --"; "classic quote tautology with comment")]
    #[test_case("' OR 'a'='a"; "string tautology")]
    #[test_case("'; DROP TABLE users; --"; "stacked drop")]
    #[test_case("1 UNION SELECT password FROM users"; "union select")]
    #[test_case("admin'--"; "comment truncation")]
    #[test_case("1 OR 1=1"; "numeric tautology")]
    #[test_case("x' AND sleep(5) --"; "time based")]
    fn test_flags_attacks(value: &str) {
        assert!(classify(value).is_suspicious(), "should flag: {value}");
    }

    #[test_case("alice@example.com"; "email")]
    #[test_case("O'Brien"; "name with apostrophe")]
    #[test_case("hello world"; "plain words")]
    #[test_case("42"; "number")]
    #[test_case("Order #1234, paid"; "order note")]
    #[test_case("10% discount + free shipping"; "marketing text")]
    #[test_case(""; "empty")]
    fn test_passes_benign(value: &str) {
        assert_eq!(classify(value), InjectionVerdict::Clean, "should pass: {value}");
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = classify("' OR 1=1 --");
        let b = classify("' OR 1=1 --");
        assert_eq!(a, b);
        if let InjectionVerdict::Suspicious { fingerprint, digest } = a {
            assert!(!fingerprint.is_empty());
            assert_eq!(digest.len(), 16);
        }
    }
}
