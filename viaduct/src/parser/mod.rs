//! Lexing and parsing of GraphQL documents and selection fragments.

mod document;
mod lexer;
mod parser;
mod utils;
mod value;

pub use self::{
    document::{parse_document_source, parse_type_literal},
    lexer::{Lexer, LexerError, Token},
    parser::{OptionParseResult, ParseError, ParseResult, Parser, UnlocatedParseResult},
    utils::{SourcePosition, Span, Spanning},
    value::parse_value_literal,
};

pub(crate) use self::document::{parse_fragment_definition, parse_selection_set};
