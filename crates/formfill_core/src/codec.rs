//! Placeholder codec: maps between a template line and a filled line.
//!
//! A template line contains placeholder spans recognised by a
//! [`PlaceholderPattern`]. [`inject_fills`] substitutes values into those
//! spans; [`extract_fills`] recovers the values from a filled line by walking
//! the literal text around each placeholder.
//!
//! Extraction delimits a replacement by the first occurrence of the next
//! literal at or after the cursor. A replacement that itself contains that
//! literal text is cut short there and the remainder fails to line up; this
//! ambiguity is not resolved.

use regex::Regex;
use thiserror::Error;

const ZERO_WIDTH_SPACE: char = '\u{200B}';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("placeholder pattern is empty")]
    Empty,
    #[error("placeholder pattern {0:?} matches the empty string")]
    MatchesEmpty(String),
    #[error("invalid placeholder pattern {pattern:?}: {message}")]
    Invalid { pattern: String, message: String },
}

/// Compiled placeholder pattern, e.g. `(_____-_____)|(_______)`.
///
/// Matching is case-sensitive, leftmost-first, over all non-overlapping
/// occurrences.
#[derive(Debug, Clone)]
pub struct PlaceholderPattern {
    regex: Regex,
}

impl PlaceholderPattern {
    pub fn new(source: &str) -> Result<Self, PatternError> {
        if source.is_empty() {
            return Err(PatternError::Empty);
        }
        let regex = Regex::new(source).map_err(|err| PatternError::Invalid {
            pattern: source.to_string(),
            message: err.to_string(),
        })?;
        if regex.is_match("") {
            return Err(PatternError::MatchesEmpty(source.to_string()));
        }
        Ok(Self { regex })
    }

    /// Compiles `source` unless it is absent or empty.
    pub fn optional(source: Option<&str>) -> Result<Option<Self>, PatternError> {
        match source {
            Some(s) if !s.is_empty() => Self::new(s).map(Some),
            _ => Ok(None),
        }
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    pub fn count_matches(&self, text: &str) -> usize {
        self.regex.find_iter(text).count()
    }
}

impl PartialEq for PlaceholderPattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for PlaceholderPattern {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Literal(String),
    Placeholder(String),
}

/// Why a filled line could not be explained by its template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FillMismatch {
    #[error("text {expected:?} was changed at byte {at}")]
    LiteralChanged { expected: String, at: usize },
    #[error("text {delimiter:?} following placeholder {index} is missing")]
    DelimiterMissing { index: usize, delimiter: String },
    #[error("placeholder {index} was emptied")]
    EmptyReplacement { index: usize },
    #[error("replacement {candidate:?} for placeholder {index} looks like a placeholder")]
    AmbiguousReplacement { index: usize, candidate: String },
    #[error("unexpected trailing text at byte {at}")]
    TrailingText { at: usize },
}

/// Values recovered from a filled line, one per placeholder. `None` marks a
/// placeholder left untouched.
pub type Fills = Vec<Option<String>>;

fn normalize(line: &str) -> String {
    line.replace(ZERO_WIDTH_SPACE, "").trim().to_string()
}

/// Splits a template line into literal and placeholder tokens.
///
/// The line is normalized first (zero-width spaces removed, surrounding
/// whitespace trimmed). Empty literal spans are not emitted.
pub fn tokenize(template_line: &str, pattern: &PlaceholderPattern) -> Vec<Token> {
    let template = normalize(template_line);
    let mut tokens = Vec::new();
    let mut last = 0;
    for found in pattern.regex.find_iter(&template) {
        if found.start() > last {
            tokens.push(Token::Literal(template[last..found.start()].to_string()));
        }
        tokens.push(Token::Placeholder(found.as_str().to_string()));
        last = found.end();
    }
    if last < template.len() {
        tokens.push(Token::Literal(template[last..].to_string()));
    }
    tokens
}

/// Recovers the value written into each placeholder of `template_line`.
pub fn extract_fills(
    template_line: &str,
    filled_line: &str,
    pattern: &PlaceholderPattern,
) -> Result<Fills, FillMismatch> {
    let tokens = tokenize(template_line, pattern);
    let filled = normalize(filled_line);
    let mut fills = Vec::new();
    let mut pos = 0;

    for (i, token) in tokens.iter().enumerate() {
        match token {
            Token::Literal(text) => {
                if !filled[pos..].starts_with(text.as_str()) {
                    return Err(FillMismatch::LiteralChanged {
                        expected: text.clone(),
                        at: pos,
                    });
                }
                pos += text.len();
            }
            Token::Placeholder(original) => {
                let index = fills.len();
                let delimiter = tokens[i + 1..].iter().find_map(|t| match t {
                    Token::Literal(text) => Some(text.as_str()),
                    Token::Placeholder(_) => None,
                });
                let end = match delimiter {
                    Some(delimiter) => match filled[pos..].find(delimiter) {
                        Some(offset) => pos + offset,
                        None => {
                            return Err(FillMismatch::DelimiterMissing {
                                index,
                                delimiter: delimiter.to_string(),
                            })
                        }
                    },
                    None => filled.len(),
                };
                let candidate = &filled[pos..end];
                if candidate == original {
                    fills.push(None);
                } else if candidate.is_empty() {
                    return Err(FillMismatch::EmptyReplacement { index });
                } else if pattern.is_match(candidate) {
                    return Err(FillMismatch::AmbiguousReplacement {
                        index,
                        candidate: candidate.to_string(),
                    });
                } else {
                    fills.push(Some(candidate.to_string()));
                }
                pos = end;
            }
        }
    }

    if pos != filled.len() {
        return Err(FillMismatch::TrailingText { at: pos });
    }
    Ok(fills)
}

/// Replaces each placeholder of `template_line`, in order, with the matching
/// entry of `values`. Missing or `None` entries keep the placeholder text.
pub fn inject_fills(
    template_line: &str,
    values: &[Option<String>],
    pattern: &PlaceholderPattern,
) -> String {
    let mut index = 0;
    pattern
        .regex
        .replace_all(template_line, |caps: &regex::Captures<'_>| {
            let replacement = match values.get(index) {
                Some(Some(value)) => value.clone(),
                _ => caps[0].to_string(),
            };
            index += 1;
            replacement
        })
        .into_owned()
}
