//! Free-text query parsing
//!
//! Supports bare terms, quoted phrases, `field:term` and `field:"phrase"`
//! qualifiers, `AND`/`OR`/`NOT` (also `&&`, `||`, `!`), `+`/`-` modifiers and a
//! trailing `*` marking an explicit prefix. Parentheses act as separators.
//! Field names are not checked here; the query builder decides what a
//! qualifier refers to.

use crate::search::error::{SearchError, SearchResult};

/// How a clause participates in the boolean combination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseOccur {
    Should,
    Must,
    MustNot,
}

/// The text of one clause
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClauseText {
    /// A single word; `prefix` is set when it carried a trailing `*`
    Word { text: String, prefix: bool },

    /// A quoted phrase
    Phrase(String),
}

/// One parsed clause
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryClause {
    pub occur: ClauseOccur,
    pub field: Option<String>,
    pub text: ClauseText,

    /// Source text without the modifier, used when a qualifier turns out not to be a field
    pub raw: String,
}

/// A parsed free-text query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedQuery {
    pub clauses: Vec<QueryClause>,
}

impl ParsedQuery {
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    And,
    Or,
    Not,
    Term {
        modifier: Option<ClauseOccur>,
        field: Option<String>,
        text: ClauseText,
        raw: String,
    },
}

/// Parse a free-text query; empty or blank input yields no clauses
pub fn parse_query(input: &str) -> SearchResult<ParsedQuery> {
    let tokens = tokenize(input)?;
    assemble(tokens)
}

fn syntax(message: impl Into<String>) -> SearchError {
    SearchError::QuerySyntax(message.into())
}

fn is_separator(c: char) -> bool {
    c.is_whitespace() || c == '(' || c == ')'
}

fn tokenize(input: &str) -> SearchResult<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if is_separator(c) {
            i += 1;
            continue;
        }

        if c == '&' || c == '|' {
            if chars.get(i + 1) == Some(&c) {
                tokens.push(if c == '&' { Token::And } else { Token::Or });
                i += 2;
                continue;
            }
        }

        let modifier = match c {
            '+' => Some(ClauseOccur::Must),
            '-' | '!' => Some(ClauseOccur::MustNot),
            _ => None,
        };
        if modifier.is_some() {
            i += 1;
            if i >= chars.len() || is_separator(chars[i]) {
                return Err(syntax(format!("'{}' must be followed by a term", c)));
            }
        }

        // Optional `field:` qualifier
        let mut field = None;
        let word_start = i;
        let mut j = i;
        while j < chars.len() && !is_separator(chars[j]) && chars[j] != '"' && chars[j] != ':' {
            j += 1;
        }
        if j < chars.len() && chars[j] == ':' {
            if j == word_start {
                return Err(syntax("empty field qualifier"));
            }
            field = Some(chars[word_start..j].iter().collect::<String>());
            i = j + 1;
            if i >= chars.len() || is_separator(chars[i]) {
                return Err(syntax(format!(
                    "field qualifier '{}:' has no term",
                    field.as_deref().unwrap_or_default()
                )));
            }
        }

        let text = if chars[i] == '"' {
            let close = chars[i + 1..]
                .iter()
                .position(|&ch| ch == '"')
                .map(|offset| i + 1 + offset)
                .ok_or_else(|| syntax("unbalanced quote"))?;
            let phrase: String = chars[i + 1..close].iter().collect();
            i = close + 1;
            ClauseText::Phrase(phrase)
        } else {
            let begin = i;
            while i < chars.len() && !is_separator(chars[i]) && chars[i] != '"' {
                i += 1;
            }
            let word: String = chars[begin..i].iter().collect();

            if modifier.is_none() && field.is_none() {
                match word.as_str() {
                    "AND" => {
                        tokens.push(Token::And);
                        continue;
                    }
                    "OR" => {
                        tokens.push(Token::Or);
                        continue;
                    }
                    "NOT" => {
                        tokens.push(Token::Not);
                        continue;
                    }
                    _ => {}
                }
            }

            match word.strip_suffix('*') {
                Some(stem) => ClauseText::Word {
                    text: stem.to_string(),
                    prefix: true,
                },
                None => ClauseText::Word {
                    text: word,
                    prefix: false,
                },
            }
        };

        tokens.push(Token::Term {
            modifier,
            field,
            text,
            raw: chars[word_start..i].iter().collect(),
        });
    }

    Ok(tokens)
}

fn assemble(tokens: Vec<Token>) -> SearchResult<ParsedQuery> {
    let mut clauses: Vec<QueryClause> = Vec::new();
    let mut pending_and = false;
    let mut pending_not = false;
    let mut after_binary = false;

    for token in tokens {
        match token {
            Token::And | Token::Or => {
                if clauses.is_empty() || after_binary || pending_not {
                    return Err(syntax("dangling boolean operator"));
                }
                if token == Token::And {
                    if let Some(last) = clauses.last_mut() {
                        if last.occur == ClauseOccur::Should {
                            last.occur = ClauseOccur::Must;
                        }
                    }
                    pending_and = true;
                }
                after_binary = true;
            }
            Token::Not => {
                if pending_not {
                    return Err(syntax("dangling NOT"));
                }
                pending_not = true;
            }
            Token::Term {
                modifier,
                field,
                text,
                raw,
            } => {
                let occur = if pending_not {
                    ClauseOccur::MustNot
                } else if let Some(modifier) = modifier {
                    modifier
                } else if pending_and {
                    ClauseOccur::Must
                } else {
                    ClauseOccur::Should
                };

                // Skip a lone `*` or an empty phrase, they match nothing useful
                let empty = match &text {
                    ClauseText::Word { text, .. } => text.is_empty(),
                    ClauseText::Phrase(phrase) => phrase.trim().is_empty(),
                };
                if !empty {
                    clauses.push(QueryClause {
                        occur,
                        field,
                        text,
                        raw,
                    });
                }

                pending_and = false;
                pending_not = false;
                after_binary = false;
            }
        }
    }

    if after_binary || pending_not {
        return Err(syntax("dangling boolean operator"));
    }

    Ok(ParsedQuery { clauses })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str) -> ClauseText {
        ClauseText::Word {
            text: text.to_string(),
            prefix: false,
        }
    }

    fn occurs(query: &str) -> Vec<ClauseOccur> {
        parse_query(query)
            .unwrap()
            .clauses
            .into_iter()
            .map(|c| c.occur)
            .collect()
    }

    #[test]
    fn test_bare_terms_are_optional() {
        let parsed = parse_query("lucene action").unwrap();
        assert_eq!(parsed.clauses.len(), 2);
        assert_eq!(parsed.clauses[0].text, word("lucene"));
        assert_eq!(occurs("lucene action"), vec![ClauseOccur::Should; 2]);
    }

    #[test]
    fn test_boolean_operators() {
        assert_eq!(occurs("a AND b"), vec![ClauseOccur::Must, ClauseOccur::Must]);
        assert_eq!(occurs("a && b || c"), vec![ClauseOccur::Must, ClauseOccur::Must, ClauseOccur::Should]);
        assert_eq!(occurs("a NOT b"), vec![ClauseOccur::Should, ClauseOccur::MustNot]);
        assert_eq!(occurs("a AND NOT b"), vec![ClauseOccur::Must, ClauseOccur::MustNot]);
        assert_eq!(occurs("+a -b !c"), vec![ClauseOccur::Must, ClauseOccur::MustNot, ClauseOccur::MustNot]);
        assert_eq!(occurs("a and b"), vec![ClauseOccur::Should; 3]);
    }

    #[test]
    fn test_phrases_and_qualifiers() {
        let parsed = parse_query(r#"Title:"in action" author:knuth (x)"#).unwrap();
        assert_eq!(parsed.clauses.len(), 3);
        assert_eq!(parsed.clauses[0].field.as_deref(), Some("Title"));
        assert_eq!(parsed.clauses[0].text, ClauseText::Phrase("in action".to_string()));
        assert_eq!(parsed.clauses[1].field.as_deref(), Some("author"));
        assert_eq!(parsed.clauses[1].raw, "author:knuth");
        assert_eq!(parsed.clauses[2].text, word("x"));
    }

    #[test]
    fn test_trailing_star_marks_prefix() {
        let parsed = parse_query("Luc*").unwrap();
        assert_eq!(
            parsed.clauses[0].text,
            ClauseText::Word {
                text: "Luc".to_string(),
                prefix: true
            }
        );
        assert!(parse_query("*").unwrap().is_empty());
    }

    #[test]
    fn test_syntax_errors() {
        for bad in [
            "\"unbalanced",
            "a AND",
            "OR a",
            "a AND OR b",
            "NOT",
            "a -",
            "+ a",
            ":term",
            "title: x",
        ] {
            let result = parse_query(bad);
            assert!(
                matches!(result, Err(SearchError::QuerySyntax(_))),
                "expected syntax error for {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_blank_query() {
        assert!(parse_query("   ").unwrap().is_empty());
    }
}
