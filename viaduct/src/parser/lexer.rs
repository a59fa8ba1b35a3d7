use std::{char, fmt, iter::Peekable, str::CharIndices};

use derive_more::with_trait::{Display, Error};

use crate::parser::{SourcePosition, Span, Spanning};

/// A single token in the input source.
#[derive(Clone, Debug, PartialEq)]
pub enum Token<'a> {
    Name(&'a str),
    Int(i64),
    Float(f64),
    String(String),
    ExclamationMark,
    Dollar,
    ParenOpen,
    ParenClose,
    BracketOpen,
    BracketClose,
    CurlyOpen,
    CurlyClose,
    Ellipsis,
    Colon,
    Equals,
    At,
    Pipe,
    Amp,
    EndOfFile,
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Name(name) => write!(f, "{name}"),
            Token::Int(i) => write!(f, "{i}"),
            Token::Float(v) => write!(f, "{v}"),
            Token::String(s) => write!(f, "\"{s}\""),
            Token::ExclamationMark => write!(f, "!"),
            Token::Dollar => write!(f, "$"),
            Token::ParenOpen => write!(f, "("),
            Token::ParenClose => write!(f, ")"),
            Token::BracketOpen => write!(f, "["),
            Token::BracketClose => write!(f, "]"),
            Token::CurlyOpen => write!(f, "{{"),
            Token::CurlyClose => write!(f, "}}"),
            Token::Ellipsis => write!(f, "..."),
            Token::Colon => write!(f, ":"),
            Token::Equals => write!(f, "="),
            Token::At => write!(f, "@"),
            Token::Pipe => write!(f, "|"),
            Token::Amp => write!(f, "&"),
            Token::EndOfFile => write!(f, "End of file"),
        }
    }
}

/// Error while tokenizing the input source.
#[derive(Clone, Debug, Display, Eq, Error, PartialEq)]
pub enum LexerError {
    /// A character that does not occur anywhere in the GraphQL language.
    #[display("Unknown character \"{_0}\"")]
    UnknownCharacter(#[error(not(source))] char),

    /// A character that exists in the language but was not expected here.
    #[display("Unexpected character \"{_0}\"")]
    UnexpectedCharacter(#[error(not(source))] char),

    /// A string literal missing its closing quote, or terminated by a line
    /// break or mid-escape.
    #[display("Unterminated string literal")]
    UnterminatedString,

    /// An invalid source character inside a string literal.
    #[display("Unknown character \"{_0}\" in string literal")]
    UnknownCharacterInString(#[error(not(source))] char),

    /// An unsupported escape sequence inside a string literal.
    #[display("Unknown escape sequence \"{_0}\" in string")]
    UnknownEscapeSequence(#[error(not(source))] String),

    /// The source ended while the current token still required characters.
    #[display("Unexpected end of input")]
    UnexpectedEndOfFile,

    /// A number literal that does not conform to the grammar, or overflows.
    #[display("Invalid number literal")]
    InvalidNumber,
}

#[doc(hidden)]
pub type LexerResult<'a> = Result<Spanning<Token<'a>>, Spanning<LexerError>>;

/// Tokenizer over a GraphQL source string.
#[derive(Debug)]
pub struct Lexer<'a> {
    iterator: Peekable<CharIndices<'a>>,
    source: &'a str,
    length: usize,
    position: SourcePosition,
    has_reached_eof: bool,
}

impl<'a> Lexer<'a> {
    #[doc(hidden)]
    pub fn new(source: &'a str) -> Lexer<'a> {
        Lexer {
            iterator: source.char_indices().peekable(),
            source,
            length: source.len(),
            position: SourcePosition::new_origin(),
            has_reached_eof: false,
        }
    }

    fn peek_char(&mut self) -> Option<(usize, char)> {
        self.iterator.peek().copied()
    }

    fn next_char(&mut self) -> Option<(usize, char)> {
        let next = self.iterator.next();
        if let Some((_, ch)) = next {
            if ch == '\n' {
                self.position.advance_line();
            } else {
                self.position.advance_col();
            }
        }
        next
    }

    fn emit_single_char(&mut self, t: Token<'a>) -> Spanning<Token<'a>> {
        let start_pos = self.position;
        self.next_char()
            .expect("internal lexer error: emit_single_char reached EOF");
        Spanning::single_width(&start_pos, t)
    }

    fn scan_over_whitespace(&mut self) {
        while let Some((_, ch)) = self.peek_char() {
            if ch == '\t' || ch == ' ' || ch == '\n' || ch == '\r' || ch == ',' {
                self.next_char();
            } else if ch == '#' {
                self.next_char();
                while let Some((_, ch)) = self.peek_char() {
                    if ch == '\n' || ch == '\r' {
                        break;
                    }
                    self.next_char();
                }
            } else {
                break;
            }
        }
    }

    fn scan_ellipsis(&mut self) -> LexerResult<'a> {
        let start_pos = self.position;
        for _ in 0..3 {
            let (_, ch) = self.next_char().ok_or_else(|| {
                Spanning::zero_width(&self.position, LexerError::UnexpectedEndOfFile)
            })?;
            if ch != '.' {
                return Err(Spanning::zero_width(
                    &start_pos,
                    LexerError::UnexpectedCharacter('.'),
                ));
            }
        }
        Ok(Spanning::start_end(
            &start_pos,
            &self.position,
            Token::Ellipsis,
        ))
    }

    fn scan_name(&mut self) -> LexerResult<'a> {
        let start_pos = self.position;
        let (start_idx, start_ch) = self
            .next_char()
            .ok_or_else(|| Spanning::zero_width(&self.position, LexerError::UnexpectedEndOfFile))?;
        debug_assert!(is_name_start(start_ch));

        let mut end_idx = start_idx;
        while let Some((idx, ch)) = self.peek_char() {
            if is_name_cont(ch) {
                self.next_char();
                end_idx = idx;
            } else {
                break;
            }
        }

        Ok(Spanning::start_end(
            &start_pos,
            &self.position,
            Token::Name(&self.source[start_idx..=end_idx]),
        ))
    }

    fn scan_string(&mut self) -> LexerResult<'a> {
        let start_pos = self.position;
        let (_, quote) = self
            .next_char()
            .ok_or_else(|| Spanning::zero_width(&self.position, LexerError::UnexpectedEndOfFile))?;
        debug_assert!(quote == '"');

        if let Some((_, '"')) = self.peek_char() {
            self.next_char();
            if let Some((_, '"')) = self.peek_char() {
                // Third quote in a row opens a block string.
                self.next_char();
                return self.scan_block_string(&start_pos);
            }
            // Empty string literal.
            return Ok(Spanning::start_end(
                &start_pos,
                &self.position,
                Token::String(String::new()),
            ));
        }

        let mut acc = String::new();
        while let Some((_, ch)) = self.peek_char() {
            if ch == '"' {
                self.next_char();
                return Ok(Spanning::start_end(
                    &start_pos,
                    &self.position,
                    Token::String(acc),
                ));
            } else if ch == '\\' {
                self.next_char();
                acc.push(self.scan_escape_sequence()?);
            } else if ch == '\n' || ch == '\r' {
                return Err(Spanning::zero_width(
                    &self.position,
                    LexerError::UnterminatedString,
                ));
            } else if !is_source_char(ch) {
                return Err(Spanning::zero_width(
                    &self.position,
                    LexerError::UnknownCharacterInString(ch),
                ));
            } else {
                self.next_char();
                acc.push(ch);
            }
        }

        Err(Spanning::zero_width(
            &self.position,
            LexerError::UnterminatedString,
        ))
    }

    fn scan_escape_sequence(&mut self) -> Result<char, Spanning<LexerError>> {
        match self.peek_char() {
            Some((_, '"')) => self.consume_as('"'),
            Some((_, '\\')) => self.consume_as('\\'),
            Some((_, '/')) => self.consume_as('/'),
            Some((_, 'b')) => self.consume_as('\u{0008}'),
            Some((_, 'f')) => self.consume_as('\u{000c}'),
            Some((_, 'n')) => self.consume_as('\n'),
            Some((_, 'r')) => self.consume_as('\r'),
            Some((_, 't')) => self.consume_as('\t'),
            Some((_, 'u')) => {
                let start_pos = self.position;
                self.next_char();
                self.scan_escaped_unicode(&start_pos)
            }
            Some((_, ch)) => Err(Spanning::zero_width(
                &self.position,
                LexerError::UnknownEscapeSequence(format!("\\{ch}")),
            )),
            None => Err(Spanning::zero_width(
                &self.position,
                LexerError::UnterminatedString,
            )),
        }
    }

    fn consume_as(&mut self, replacement: char) -> Result<char, Spanning<LexerError>> {
        self.next_char();
        Ok(replacement)
    }

    fn scan_escaped_unicode(
        &mut self,
        start_pos: &SourcePosition,
    ) -> Result<char, Spanning<LexerError>> {
        let (start_idx, _) = self
            .peek_char()
            .ok_or_else(|| Spanning::zero_width(&self.position, LexerError::UnterminatedString))?;
        let mut end_idx = start_idx;
        let mut len = 0;

        for _ in 0..4 {
            let (idx, ch) = self
                .next_char()
                .ok_or_else(|| Spanning::zero_width(&self.position, LexerError::UnterminatedString))?;
            if !ch.is_alphanumeric() {
                break;
            }
            end_idx = idx;
            len += 1;
        }

        let escape = &self.source[start_idx..=end_idx];
        if len != 4 {
            return Err(Spanning::zero_width(
                start_pos,
                LexerError::UnknownEscapeSequence(format!("\\u{escape}")),
            ));
        }

        let code_point = u32::from_str_radix(escape, 16).map_err(|_| {
            Spanning::zero_width(
                start_pos,
                LexerError::UnknownEscapeSequence(format!("\\u{escape}")),
            )
        })?;

        char::from_u32(code_point).ok_or_else(|| {
            Spanning::zero_width(
                start_pos,
                LexerError::UnknownEscapeSequence(format!("\\u{escape}")),
            )
        })
    }

    fn scan_block_string(&mut self, start_pos: &SourcePosition) -> LexerResult<'a> {
        let mut raw = String::new();
        loop {
            let Some((_, ch)) = self.peek_char() else {
                return Err(Spanning::zero_width(
                    &self.position,
                    LexerError::UnterminatedString,
                ));
            };
            if ch == '"' {
                self.next_char();
                if let Some((_, '"')) = self.peek_char() {
                    self.next_char();
                    if let Some((_, '"')) = self.peek_char() {
                        self.next_char();
                        return Ok(Spanning::start_end(
                            start_pos,
                            &self.position,
                            Token::String(trim_block_string(&raw)),
                        ));
                    }
                    raw.push_str("\"\"");
                } else {
                    raw.push('"');
                }
            } else if ch == '\\' {
                // The only escape a block string recognizes is `\"""`.
                self.next_char();
                let mut quotes = 0;
                while quotes < 3 {
                    match self.peek_char() {
                        Some((_, '"')) => {
                            self.next_char();
                            quotes += 1;
                        }
                        _ => break,
                    }
                }
                if quotes == 3 {
                    raw.push_str("\"\"\"");
                } else {
                    raw.push('\\');
                    for _ in 0..quotes {
                        raw.push('"');
                    }
                }
            } else {
                self.next_char();
                raw.push(ch);
            }
        }
    }

    fn scan_number(&mut self) -> LexerResult<'a> {
        let start_pos = self.position;
        let (start_idx, _) = self
            .peek_char()
            .ok_or_else(|| Spanning::zero_width(&self.position, LexerError::UnexpectedEndOfFile))?;

        let mut end_idx = start_idx;
        let mut is_float = false;

        if let Some((idx, '-')) = self.peek_char() {
            end_idx = idx;
            self.next_char();
        }

        let mut saw_digit = false;
        while let Some((idx, ch)) = self.peek_char() {
            match ch {
                '0'..='9' => {
                    saw_digit = true;
                    end_idx = idx;
                    self.next_char();
                }
                '.' | 'e' | 'E' if saw_digit => {
                    is_float = true;
                    end_idx = idx;
                    self.next_char();
                }
                '+' | '-' if is_float => {
                    end_idx = idx;
                    self.next_char();
                }
                _ => break,
            }
        }

        if !saw_digit {
            return Err(Spanning::zero_width(&start_pos, LexerError::InvalidNumber));
        }

        let text = &self.source[start_idx..=end_idx];
        let token = if is_float {
            Token::Float(
                text.parse()
                    .map_err(|_| Spanning::zero_width(&start_pos, LexerError::InvalidNumber))?,
            )
        } else {
            Token::Int(
                text.parse()
                    .map_err(|_| Spanning::zero_width(&start_pos, LexerError::InvalidNumber))?,
            )
        };

        Ok(Spanning::start_end(&start_pos, &self.position, token))
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = LexerResult<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.has_reached_eof {
            return None;
        }

        self.scan_over_whitespace();

        match self.peek_char() {
            None => {
                self.has_reached_eof = true;
                Some(Ok(Spanning::zero_width(&self.position, Token::EndOfFile)))
            }
            Some((_, ch)) => Some(match ch {
                '!' => Ok(self.emit_single_char(Token::ExclamationMark)),
                '$' => Ok(self.emit_single_char(Token::Dollar)),
                '(' => Ok(self.emit_single_char(Token::ParenOpen)),
                ')' => Ok(self.emit_single_char(Token::ParenClose)),
                '[' => Ok(self.emit_single_char(Token::BracketOpen)),
                ']' => Ok(self.emit_single_char(Token::BracketClose)),
                '{' => Ok(self.emit_single_char(Token::CurlyOpen)),
                '}' => Ok(self.emit_single_char(Token::CurlyClose)),
                ':' => Ok(self.emit_single_char(Token::Colon)),
                '=' => Ok(self.emit_single_char(Token::Equals)),
                '@' => Ok(self.emit_single_char(Token::At)),
                '|' => Ok(self.emit_single_char(Token::Pipe)),
                '&' => Ok(self.emit_single_char(Token::Amp)),
                '.' => self.scan_ellipsis(),
                '"' => self.scan_string(),
                '-' | '0'..='9' => self.scan_number(),
                ch if is_name_start(ch) => self.scan_name(),
                ch => Err(Spanning::zero_width(
                    &self.position,
                    LexerError::UnknownCharacter(ch),
                )),
            }),
        }
    }
}

/// Removes the common indentation and blank leading/trailing lines of a block
/// string, per the GraphQL string-value semantics.
fn trim_block_string(raw: &str) -> String {
    let lines: Vec<&str> = raw.split('\n').collect();

    let common_indent = lines
        .iter()
        .skip(1)
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        if i == 0 {
            out.push((*line).into());
        } else {
            out.push(line.get(common_indent..).unwrap_or("").into());
        }
    }

    while out.first().is_some_and(|l| l.trim().is_empty()) {
        out.remove(0);
    }
    while out.last().is_some_and(|l| l.trim().is_empty()) {
        out.pop();
    }

    out.join("\n")
}

fn is_source_char(c: char) -> bool {
    c == '\t' || c == '\n' || c == '\r' || c >= ' '
}

fn is_name_start(c: char) -> bool {
    c == '_' || c.is_ascii_alphabetic()
}

fn is_name_cont(c: char) -> bool {
    c == '_' || c.is_ascii_alphanumeric()
}

#[cfg(test)]
mod tests {
    use super::{Lexer, LexerError, Token};

    fn tokenize(source: &str) -> Vec<Token<'_>> {
        Lexer::new(source)
            .map(|r| r.expect("lexer error").item)
            .collect()
    }

    #[test]
    fn punctuators_and_names() {
        assert_eq!(
            tokenize("{ user(id: $id) @skip(if: true) ... }"),
            vec![
                Token::CurlyOpen,
                Token::Name("user"),
                Token::ParenOpen,
                Token::Name("id"),
                Token::Colon,
                Token::Dollar,
                Token::Name("id"),
                Token::ParenClose,
                Token::At,
                Token::Name("skip"),
                Token::ParenOpen,
                Token::Name("if"),
                Token::Colon,
                Token::Name("true"),
                Token::ParenClose,
                Token::Ellipsis,
                Token::CurlyClose,
                Token::EndOfFile,
            ],
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(
            tokenize("0 -4 9007199254740991 1.5 -1.5e2"),
            vec![
                Token::Int(0),
                Token::Int(-4),
                Token::Int(9_007_199_254_740_991),
                Token::Float(1.5),
                Token::Float(-150.0),
                Token::EndOfFile,
            ],
        );
    }

    #[test]
    fn strings() {
        assert_eq!(
            tokenize(r#""simple" "with \"escapes\" and é""#),
            vec![
                Token::String("simple".into()),
                Token::String("with \"escapes\" and \u{e9}".into()),
                Token::EndOfFile,
            ],
        );
    }

    #[test]
    fn block_strings_trim_common_indent() {
        assert_eq!(
            tokenize("\"\"\"\n    Hello,\n      World!\n    \"\"\""),
            vec![Token::String("Hello,\n  World!".into()), Token::EndOfFile],
        );
    }

    #[test]
    fn comments_and_commas_are_insignificant() {
        assert_eq!(
            tokenize("a, b # trailing comment\nc"),
            vec![
                Token::Name("a"),
                Token::Name("b"),
                Token::Name("c"),
                Token::EndOfFile,
            ],
        );
    }

    #[test]
    fn unterminated_string_errors() {
        let errs: Vec<_> = Lexer::new("\"oops").filter_map(|r| r.err()).collect();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].item, LexerError::UnterminatedString);
    }
}
