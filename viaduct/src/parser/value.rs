use crate::{
    ast::InputValue,
    parser::{ParseError, ParseResult, Parser, Spanning, Token},
    value::ScalarValue,
};

pub fn parse_value_literal(parser: &mut Parser<'_>, is_const: bool) -> ParseResult<InputValue> {
    match parser.peek().item {
        Token::BracketOpen => parse_list_literal(parser, is_const),
        Token::CurlyOpen => parse_object_literal(parser, is_const),
        Token::Dollar if !is_const => parse_variable_literal(parser),
        Token::Int(i) => Ok(parser.next_token()?.map(|_| {
            // Literals fitting `Int` stay `Int`; wider ones become `Long`.
            match i32::try_from(i) {
                Ok(i) => InputValue::scalar(i),
                Err(_) => InputValue::scalar(i),
            }
        })),
        Token::Float(f) => Ok(parser.next_token()?.map(|_| InputValue::scalar(f))),
        Token::String(_) => Ok(parser.next_token()?.map(|t| {
            if let Token::String(s) = t {
                InputValue::Scalar(ScalarValue::String(s))
            } else {
                unreachable!("`String` token")
            }
        })),
        Token::Name("true") => Ok(parser.next_token()?.map(|_| InputValue::scalar(true))),
        Token::Name("false") => Ok(parser.next_token()?.map(|_| InputValue::scalar(false))),
        Token::Name("null") => Ok(parser.next_token()?.map(|_| InputValue::null())),
        Token::Name(name) => {
            let name = name.to_owned();
            Ok(parser
                .next_token()?
                .map(|_| InputValue::enum_value(&name)))
        }
        _ => Err(parser.next_token()?.map(ParseError::unexpected_token)),
    }
}

fn parse_list_literal(parser: &mut Parser<'_>, is_const: bool) -> ParseResult<InputValue> {
    Ok(parser
        .delimited_list(
            &Token::BracketOpen,
            |p| parse_value_literal(p, is_const),
            &Token::BracketClose,
        )?
        .map(InputValue::List))
}

fn parse_object_literal(parser: &mut Parser<'_>, is_const: bool) -> ParseResult<InputValue> {
    Ok(parser
        .delimited_list(
            &Token::CurlyOpen,
            |p| parse_object_field(p, is_const),
            &Token::CurlyClose,
        )?
        .map(|items| InputValue::Object(items.into_iter().map(|s| s.item).collect())))
}

fn parse_object_field(
    parser: &mut Parser<'_>,
    is_const: bool,
) -> ParseResult<(Spanning<crate::ast::Name>, Spanning<InputValue>)> {
    let key = parser.expect_name()?;
    parser.expect(&Token::Colon)?;
    let value = parse_value_literal(parser, is_const)?;

    Ok(Spanning::start_end(
        &key.span.start,
        &value.span.end.clone(),
        (key.map(Into::into), value),
    ))
}

fn parse_variable_literal(parser: &mut Parser<'_>) -> ParseResult<InputValue> {
    let Spanning {
        span: start_span, ..
    } = parser.expect(&Token::Dollar)?;
    let name = parser.expect_name()?;

    Ok(Spanning::start_end(
        &start_span.start,
        &name.span.end,
        InputValue::variable(name.item),
    ))
}
