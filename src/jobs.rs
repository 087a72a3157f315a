//! Line-oriented job scripts for driving a session from the CLI.
//!
//! One command per line; blank lines and `#` comments are skipped:
//!
//! ```text
//! # build the venue
//! CREATE 1 10 10
//! RESERVE 1 [(1,1) (1,2) (1,3)]
//! SHOW 1
//! LIST
//! WAIT 100
//! QUIT
//! ```

use std::num::ParseIntError;
use thiserror::Error;

/// One parsed script command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Create {
        event_id: u32,
        rows: usize,
        cols: usize,
    },
    Reserve {
        event_id: u32,
        seats: Vec<(usize, usize)>,
    },
    Show {
        event_id: u32,
    },
    List,
    Wait {
        millis: u64,
    },
    Quit,
}

/// A script error, tagged with its 1-based line number.
#[derive(Debug, Error)]
#[error("line {line}: {kind}")]
pub struct ScriptError {
    pub line: usize,
    pub kind: ScriptErrorKind,
}

#[derive(Debug, Error)]
pub enum ScriptErrorKind {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("{command}: expected {expected}")]
    WrongArguments {
        command: &'static str,
        expected: &'static str,
    },

    #[error("invalid number {text:?}: {source}")]
    InvalidNumber {
        text: String,
        source: ParseIntError,
    },

    #[error("malformed seat list: {0}")]
    MalformedSeatList(String),
}

/// Parse a whole script into commands, stopping at the first bad line.
pub fn parse_script(input: &str) -> Result<Vec<Command>, ScriptError> {
    let mut commands = Vec::new();
    for (index, line) in input.lines().enumerate() {
        if let Some(command) = parse_line(line).map_err(|kind| ScriptError {
            line: index + 1,
            kind,
        })? {
            commands.push(command);
        }
    }
    Ok(commands)
}

/// Parse one line; `Ok(None)` for blanks and comments.
pub fn parse_line(line: &str) -> Result<Option<Command>, ScriptErrorKind> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let (keyword, rest) = match line.split_once(char::is_whitespace) {
        Some((keyword, rest)) => (keyword, rest.trim()),
        None => (line, ""),
    };

    let command = match keyword.to_ascii_uppercase().as_str() {
        "CREATE" => {
            let args: Vec<&str> = rest.split_whitespace().collect();
            if args.len() != 3 {
                return Err(ScriptErrorKind::WrongArguments {
                    command: "CREATE",
                    expected: "<event_id> <rows> <cols>",
                });
            }
            Command::Create {
                event_id: parse_number(args[0])?,
                rows: parse_number(args[1])?,
                cols: parse_number(args[2])?,
            }
        }
        "RESERVE" => {
            let (event_id, seat_list) = match rest.split_once(char::is_whitespace) {
                Some((event_id, seat_list)) => (event_id, seat_list.trim()),
                None => {
                    return Err(ScriptErrorKind::WrongArguments {
                        command: "RESERVE",
                        expected: "<event_id> [(row,col) ...]",
                    })
                }
            };
            Command::Reserve {
                event_id: parse_number(event_id)?,
                seats: parse_seat_list(seat_list)?,
            }
        }
        "SHOW" => {
            let args: Vec<&str> = rest.split_whitespace().collect();
            if args.len() != 1 {
                return Err(ScriptErrorKind::WrongArguments {
                    command: "SHOW",
                    expected: "<event_id>",
                });
            }
            Command::Show {
                event_id: parse_number(args[0])?,
            }
        }
        "LIST" => Command::List,
        "WAIT" => {
            let args: Vec<&str> = rest.split_whitespace().collect();
            if args.len() != 1 {
                return Err(ScriptErrorKind::WrongArguments {
                    command: "WAIT",
                    expected: "<milliseconds>",
                });
            }
            Command::Wait {
                millis: parse_number(args[0])?,
            }
        }
        "QUIT" => Command::Quit,
        other => return Err(ScriptErrorKind::UnknownCommand(other.to_owned())),
    };
    Ok(Some(command))
}

fn parse_number<T: std::str::FromStr<Err = ParseIntError>>(
    text: &str,
) -> Result<T, ScriptErrorKind> {
    text.parse().map_err(|source| ScriptErrorKind::InvalidNumber {
        text: text.to_owned(),
        source,
    })
}

/// Parse a `[(row,col) (row,col) ...]` seat list.
fn parse_seat_list(text: &str) -> Result<Vec<(usize, usize)>, ScriptErrorKind> {
    let inner = text
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| ScriptErrorKind::MalformedSeatList(text.to_owned()))?;

    let mut seats = Vec::new();
    for pair in inner.split_whitespace() {
        let coords = pair
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
            .and_then(|rest| rest.split_once(','))
            .ok_or_else(|| ScriptErrorKind::MalformedSeatList(pair.to_owned()))?;
        seats.push((
            parse_number(coords.0.trim())?,
            parse_number(coords.1.trim())?,
        ));
    }
    if seats.is_empty() {
        return Err(ScriptErrorKind::MalformedSeatList(text.to_owned()));
    }
    Ok(seats)
}
