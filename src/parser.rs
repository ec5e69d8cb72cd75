// Copyright (C) 2025  Tom Waddington
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published
// by the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Incremental parser for kinject scripts
//!
//! Scripts are line oriented:
//! - `KEY name...` press and release each key
//! - `TYPE text` press and release the key for each character
//! - `KEY_DOWN name...` / `KEY_UP name...` press or release only
//! - `DELAY ms` pause
//!
//! Nothing is tokenized ahead of time. A [`Cursor`] yields one token per
//! call and remembers where it is inside a multi-key line, so playback can
//! pause between any two keys.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_till1},
    character::complete::{line_ending, space0},
    combinator::{eof, value},
    sequence::terminated,
};

use crate::error::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Key,
    Type,
    KeyDown,
    KeyUp,
    Delay,
}

impl LineKind {
    fn keyword(self) -> &'static str {
        match self {
            LineKind::Key => "KEY",
            LineKind::Type => "TYPE",
            LineKind::KeyDown => "KEY_DOWN",
            LineKind::KeyUp => "KEY_UP",
            LineKind::Delay => "DELAY",
        }
    }
}

/// One unit of work. Key names borrow from the script buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    Tap(&'a str),
    Char(char),
    Press(&'a str),
    Release(&'a str),
    Delay(u64),
    End,
}

/// Position inside a line whose tokens are being handed out one by one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pending {
    pub kind: LineKind,
    pub index: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cursor {
    position: usize,
    pending: Option<Pending>,
}

fn line_kind(input: &str) -> IResult<&str, LineKind> {
    // Longer keywords first so KEY never shadows KEY_DOWN/KEY_UP
    alt((
        value(LineKind::KeyDown, tag("KEY_DOWN ")),
        value(LineKind::KeyUp, tag("KEY_UP ")),
        value(LineKind::Key, tag("KEY ")),
        value(LineKind::Type, tag("TYPE ")),
        value(LineKind::Delay, tag("DELAY ")),
    ))
    .parse(input)
}

fn key_name(input: &str) -> IResult<&str, &str> {
    take_till1(|c: char| c == ' ' || c == '\n' || c == '\r')(input)
}

fn end_of_line(input: &str) -> IResult<&str, &str> {
    alt((line_ending, eof, terminated(tag("\r"), eof))).parse(input)
}

fn delay_value(input: &str) -> IResult<&str, u64> {
    let (input, _) = space0(input)?;
    let (input, ms) = nom::character::complete::u64(input)?;
    let (input, _) = space0(input)?;
    let (input, _) = end_of_line(input)?;
    Ok((input, ms))
}

fn at_line_end(input: &str) -> bool {
    input.is_empty() || input == "\r" || input.starts_with('\n') || input.starts_with("\r\n")
}

fn first_line(input: &str) -> String {
    input.lines().next().unwrap_or_default().to_string()
}

impl Cursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Byte offset of the next unconsumed character.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn pending(&self) -> Option<Pending> {
        self.pending
    }

    fn line(&self, source: &str) -> usize {
        source[..self.position].matches('\n').count() + 1
    }

    fn advance_to(&mut self, source: &str, rest: &str) {
        self.position = source.len() - rest.len();
    }

    /// Yields the next token of `source` and moves past it.
    ///
    /// `source` must be the same buffer on every call. After an error the
    /// cursor stays put, so calling again reports the same error.
    pub fn next<'a>(&mut self, source: &'a str) -> Result<Token<'a>, ParseError> {
        loop {
            let rest = &source[self.position..];

            let Some(pending) = self.pending else {
                let rest = rest.trim_start_matches([' ', '\t', '\r', '\n']);
                self.advance_to(source, rest);
                if rest.is_empty() {
                    return Ok(Token::End);
                }

                match line_kind(rest) {
                    Ok((after, LineKind::Delay)) => {
                        let (after, ms) =
                            delay_value(after).map_err(|_| ParseError::MalformedDelay {
                                line: self.line(source),
                                text: first_line(rest),
                            })?;
                        self.advance_to(source, after);
                        return Ok(Token::Delay(ms));
                    }
                    Ok((after, kind)) => {
                        self.advance_to(source, after);
                        self.pending = Some(Pending { kind, index: 0 });
                        continue;
                    }
                    Err(_) => {
                        return Err(ParseError::UnknownToken {
                            line: self.line(source),
                            text: first_line(rest),
                        });
                    }
                }
            };

            if pending.kind == LineKind::Type {
                match rest.chars().next() {
                    Some(c) if !at_line_end(rest) => {
                        self.position += c.len_utf8();
                        self.pending = Some(Pending {
                            index: pending.index + 1,
                            ..pending
                        });
                        return Ok(Token::Char(c));
                    }
                    _ => {
                        self.pending = None;
                        continue;
                    }
                }
            }

            let rest = rest.trim_start_matches(' ');
            self.advance_to(source, rest);
            if at_line_end(rest) {
                if pending.index == 0 {
                    return Err(ParseError::MissingKey {
                        line: self.line(source),
                        keyword: pending.kind.keyword(),
                    });
                }
                self.pending = None;
                continue;
            }

            let (after, name) = key_name(rest).map_err(|_| ParseError::UnknownToken {
                line: self.line(source),
                text: first_line(rest),
            })?;
            self.advance_to(source, after);
            self.pending = Some(Pending {
                index: pending.index + 1,
                ..pending
            });

            return Ok(match pending.kind {
                LineKind::KeyDown => Token::Press(name),
                LineKind::KeyUp => Token::Release(name),
                _ => Token::Tap(name),
            });
        }
    }
}
