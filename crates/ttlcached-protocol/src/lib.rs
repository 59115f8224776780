//! Wire-protocol tokenizer for the line-oriented `get`/`set` cache protocol.
//!
//! This crate is the "external collaborator" the engine consumes: it knows
//! nothing about shared memory, locks, or sockets, only how to turn one
//! newline-terminated request line into a [`Command`].

use thiserror::Error;

/// A parsed client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Get { key: String },
    Set { ttl: i64, key: String, value: String },
}

/// Why a request line failed to parse.
///
/// Every variant maps to the same wire response (`error (bad query)\n`) —
/// the distinction exists so callers and tests can tell failure modes
/// apart without string-matching the response.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty query")]
    Empty,
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("wrong number of arguments")]
    WrongArity,
    #[error("ttl is not an integer")]
    BadTtl,
}

/// Split a request line into whitespace-delimited tokens.
///
/// Two passes: split on spaces, then strip any embedded spaces left in a
/// token and drop empty tokens. With today's grammar a token never
/// contains an embedded space once split, so the strip pass is a no-op —
/// kept anyway so a future token type that *can* contain spaces doesn't
/// silently break tokenization.
fn tokenize(line: &str) -> Vec<String> {
    line.split(' ')
        .map(|tok| tok.chars().filter(|c| *c != ' ').collect::<String>())
        .filter(|tok| !tok.is_empty())
        .collect()
}

/// Parse one request line (without its trailing `\n`) into a [`Command`].
///
/// Returns `Err(ParseError::Empty)` for a blank line — callers generally
/// want to special-case that into `"error (empty query)\n"` rather than
/// the generic `"error (bad query)\n"`, so the distinction is preserved
/// here rather than collapsed.
pub fn parse_line(line: &str) -> Result<Command, ParseError> {
    if line.is_empty() {
        return Err(ParseError::Empty);
    }

    let tokens = tokenize(line);
    if tokens.is_empty() {
        return Err(ParseError::Empty);
    }

    match tokens[0].as_str() {
        "get" => {
            if tokens.len() != 2 {
                return Err(ParseError::WrongArity);
            }
            Ok(Command::Get {
                key: tokens[1].clone(),
            })
        }
        "set" => {
            if tokens.len() != 4 {
                return Err(ParseError::WrongArity);
            }
            let ttl: i64 = tokens[1].parse().map_err(|_| ParseError::BadTtl)?;
            Ok(Command::Set {
                ttl,
                key: tokens[2].clone(),
                value: tokens[3].clone(),
            })
        }
        other => Err(ParseError::UnknownCommand(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_get() {
        assert_eq!(
            parse_line("get foo").unwrap(),
            Command::Get { key: "foo".into() }
        );
    }

    #[test]
    fn parses_set() {
        assert_eq!(
            parse_line("set 5 foo bar").unwrap(),
            Command::Set {
                ttl: 5,
                key: "foo".into(),
                value: "bar".into(),
            }
        );
    }

    #[test]
    fn ignores_repeated_and_surrounding_spaces() {
        assert_eq!(
            parse_line("  set   5   foo   bar  ").unwrap(),
            Command::Set {
                ttl: 5,
                key: "foo".into(),
                value: "bar".into(),
            }
        );
    }

    #[test]
    fn rejects_empty_line() {
        assert_eq!(parse_line(""), Err(ParseError::Empty));
        assert_eq!(parse_line("   "), Err(ParseError::Empty));
    }

    #[test]
    fn rejects_unknown_command() {
        assert_eq!(
            parse_line("blarg"),
            Err(ParseError::UnknownCommand("blarg".into()))
        );
    }

    #[test]
    fn rejects_wrong_arity() {
        assert_eq!(parse_line("get"), Err(ParseError::WrongArity));
        assert_eq!(parse_line("get a b"), Err(ParseError::WrongArity));
        assert_eq!(parse_line("set 5 foo"), Err(ParseError::WrongArity));
    }

    #[test]
    fn rejects_non_integer_ttl() {
        assert_eq!(parse_line("set abc foo bar"), Err(ParseError::BadTtl));
    }

    #[test]
    fn accepts_negative_ttl_as_parse_not_as_validation() {
        // Range validation (ttl >= 1) is the table's job, not the tokenizer's.
        assert_eq!(
            parse_line("set -1 foo bar").unwrap(),
            Command::Set {
                ttl: -1,
                key: "foo".into(),
                value: "bar".into(),
            }
        );
    }
}
