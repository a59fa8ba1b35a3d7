use crate::{
    ast::{
        Arguments, Definition, Directive, Document, Field, FragmentDefinition, FragmentSpread,
        InlineFragment, InputValue, Name, Operation, OperationKind, Selection, TypeLiteral,
        VariableDefinition, VariableDefinitions,
    },
    parser::{
        OptionParseResult, ParseError, ParseResult, Parser, Span, Spanning, Token,
        UnlocatedParseResult, value::parse_value_literal,
    },
};

/// Parses an executable document (operations and fragment definitions).
pub fn parse_document_source(s: &str) -> UnlocatedParseResult<Document> {
    let mut parser = Parser::from_source(s)?;
    parse_document(&mut parser)
}

fn parse_document(parser: &mut Parser<'_>) -> UnlocatedParseResult<Document> {
    let mut defs = Vec::new();

    loop {
        defs.push(parse_definition(parser)?);
        if parser.peek().item == Token::EndOfFile {
            return Ok(defs);
        }
    }
}

fn parse_definition(parser: &mut Parser<'_>) -> UnlocatedParseResult<Definition> {
    match parser.peek().item {
        Token::CurlyOpen
        | Token::Name("query")
        | Token::Name("mutation")
        | Token::Name("subscription") => {
            Ok(Definition::Operation(parse_operation_definition(parser)?))
        }
        Token::Name("fragment") => Ok(Definition::Fragment(parse_fragment_definition(parser)?)),
        _ => Err(parser.next_token()?.map(ParseError::unexpected_token)),
    }
}

fn parse_operation_definition(parser: &mut Parser<'_>) -> ParseResult<Operation> {
    if parser.peek().item == Token::CurlyOpen {
        let selection_set = parse_selection_set(parser)?;

        Ok(Spanning::start_end(
            &selection_set.span.start,
            &selection_set.span.end,
            Operation {
                kind: OperationKind::Query,
                name: None,
                variable_definitions: None,
                directives: None,
                selection_set: selection_set.item,
            },
        ))
    } else {
        let start_pos = parser.peek().span.start;
        let kind = parse_operation_kind(parser)?;
        let name = match parser.peek().item {
            Token::Name(_) => Some(parser.expect_name()?.map(Name::from)),
            _ => None,
        };
        let variable_definitions = parse_variable_definitions(parser)?;
        let directives = parse_directives(parser)?;
        let selection_set = parse_selection_set(parser)?;

        Ok(Spanning::start_end(
            &start_pos,
            &selection_set.span.end,
            Operation {
                kind: kind.item,
                name,
                variable_definitions,
                directives: directives.map(|s| s.item),
                selection_set: selection_set.item,
            },
        ))
    }
}

pub(crate) fn parse_fragment_definition(
    parser: &mut Parser<'_>,
) -> ParseResult<FragmentDefinition> {
    let Spanning {
        span: start_span, ..
    } = parser.expect(&Token::Name("fragment"))?;
    let name = parser.expect_name()?;
    if name.item == "on" {
        return Err(name.map(|_| ParseError::unexpected_token(Token::Name("on"))));
    }

    parser.expect(&Token::Name("on"))?;
    let type_cond = parser.expect_name()?;
    let directives = parse_directives(parser)?;
    let selection_set = parse_selection_set(parser)?;

    Ok(Spanning::start_end(
        &start_span.start,
        &selection_set.span.end,
        FragmentDefinition {
            name: name.map(Name::from),
            type_condition: type_cond.map(Name::from),
            directives: directives.map(|s| s.item),
            selection_set: selection_set.item,
        },
    ))
}

fn parse_optional_selection_set(parser: &mut Parser<'_>) -> OptionParseResult<Vec<Selection>> {
    if parser.peek().item == Token::CurlyOpen {
        Ok(Some(parse_selection_set(parser)?))
    } else {
        Ok(None)
    }
}

pub(crate) fn parse_selection_set(parser: &mut Parser<'_>) -> ParseResult<Vec<Selection>> {
    parser.unlocated_delimited_nonempty_list(&Token::CurlyOpen, parse_selection, &Token::CurlyClose)
}

fn parse_selection(parser: &mut Parser<'_>) -> UnlocatedParseResult<Selection> {
    match parser.peek().item {
        Token::Ellipsis => parse_fragment(parser),
        _ => parse_field(parser).map(Selection::Field),
    }
}

fn parse_fragment(parser: &mut Parser<'_>) -> UnlocatedParseResult<Selection> {
    let Spanning {
        span: start_span, ..
    } = parser.expect(&Token::Ellipsis)?;

    match parser.peek().item {
        Token::Name("on") => {
            parser.next_token()?;
            let name = parser.expect_name()?;
            let directives = parse_directives(parser)?;
            let selection_set = parse_selection_set(parser)?;

            Ok(Selection::InlineFragment(Spanning::start_end(
                &start_span.start,
                &selection_set.span.end,
                InlineFragment {
                    type_condition: Some(name.map(Name::from)),
                    directives: directives.map(|s| s.item),
                    selection_set: selection_set.item,
                },
            )))
        }
        Token::CurlyOpen => {
            let selection_set = parse_selection_set(parser)?;

            Ok(Selection::InlineFragment(Spanning::start_end(
                &start_span.start,
                &selection_set.span.end,
                InlineFragment {
                    type_condition: None,
                    directives: None,
                    selection_set: selection_set.item,
                },
            )))
        }
        Token::Name(_) => {
            let frag_name = parser.expect_name()?;
            let directives = parse_directives(parser)?;

            Ok(Selection::FragmentSpread(Spanning::start_end(
                &start_span.start,
                &directives
                    .as_ref()
                    .map_or(&frag_name.span.end, |s| &s.span.end)
                    .clone(),
                FragmentSpread {
                    name: frag_name.map(Name::from),
                    directives: directives.map(|s| s.item),
                },
            )))
        }
        Token::At => {
            let directives = parse_directives(parser)?;
            let selection_set = parse_selection_set(parser)?;

            Ok(Selection::InlineFragment(Spanning::start_end(
                &start_span.start,
                &selection_set.span.end,
                InlineFragment {
                    type_condition: None,
                    directives: directives.map(|s| s.item),
                    selection_set: selection_set.item,
                },
            )))
        }
        _ => Err(parser.next_token()?.map(ParseError::unexpected_token)),
    }
}

fn parse_field(parser: &mut Parser<'_>) -> ParseResult<Field> {
    let mut alias = Some(parser.expect_name()?);

    let name = if parser.skip(&Token::Colon)?.is_some() {
        parser.expect_name()?
    } else {
        alias.take().expect("no alias after colon skip")
    };

    let arguments = parse_arguments(parser)?;
    let directives = parse_directives(parser)?;
    let selection_set = parse_optional_selection_set(parser)?;

    Ok(Spanning::start_end(
        &alias.as_ref().unwrap_or(&name).span.start.clone(),
        &selection_set
            .as_ref()
            .map(|s| &s.span.end)
            .or_else(|| directives.as_ref().map(|s| &s.span.end))
            .or_else(|| arguments.as_ref().map(|s| &s.span.end))
            .unwrap_or(&name.span.end)
            .clone(),
        Field {
            alias: alias.map(|a| a.map(Name::from)),
            name: name.map(Name::from),
            arguments,
            directives: directives.map(|s| s.item),
            selection_set: selection_set.map(|s| s.item),
        },
    ))
}

pub(crate) fn parse_arguments(parser: &mut Parser<'_>) -> OptionParseResult<Arguments> {
    if parser.peek().item != Token::ParenOpen {
        Ok(None)
    } else {
        Ok(Some(
            parser
                .delimited_nonempty_list(&Token::ParenOpen, parse_argument, &Token::ParenClose)?
                .map(|args| Arguments {
                    items: args.into_iter().map(|s| s.item).collect(),
                }),
        ))
    }
}

fn parse_argument(
    parser: &mut Parser<'_>,
) -> ParseResult<(Spanning<Name>, Spanning<InputValue>)> {
    let name = parser.expect_name()?;
    parser.expect(&Token::Colon)?;
    let value = parse_value_literal(parser, false)?;

    Ok(Spanning::start_end(
        &name.span.start.clone(),
        &value.span.end.clone(),
        (name.map(Name::from), value),
    ))
}

fn parse_operation_kind(parser: &mut Parser<'_>) -> ParseResult<OperationKind> {
    match parser.peek().item {
        Token::Name("query") => Ok(parser.next_token()?.map(|_| OperationKind::Query)),
        Token::Name("mutation") => Ok(parser.next_token()?.map(|_| OperationKind::Mutation)),
        Token::Name("subscription") => {
            Ok(parser.next_token()?.map(|_| OperationKind::Subscription))
        }
        _ => Err(parser.next_token()?.map(ParseError::unexpected_token)),
    }
}

fn parse_variable_definitions(
    parser: &mut Parser<'_>,
) -> OptionParseResult<VariableDefinitions> {
    if parser.peek().item != Token::ParenOpen {
        Ok(None)
    } else {
        Ok(Some(
            parser
                .delimited_nonempty_list(
                    &Token::ParenOpen,
                    parse_variable_definition,
                    &Token::ParenClose,
                )?
                .map(|defs| VariableDefinitions {
                    items: defs.into_iter().map(|s| s.item).collect(),
                }),
        ))
    }
}

fn parse_variable_definition(
    parser: &mut Parser<'_>,
) -> ParseResult<(Spanning<Name>, VariableDefinition)> {
    let Spanning {
        span: start_span, ..
    } = parser.expect(&Token::Dollar)?;
    let var_name = parser.expect_name()?;
    parser.expect(&Token::Colon)?;
    let var_type = parse_type_literal(parser)?;

    let default_value = if parser.skip(&Token::Equals)?.is_some() {
        Some(parse_value_literal(parser, true)?)
    } else {
        None
    };

    Ok(Spanning::start_end(
        &start_span.start,
        &default_value
            .as_ref()
            .map_or(&var_type.span.end, |s| &s.span.end)
            .clone(),
        (
            Spanning::start_end(&start_span.start, &var_name.span.end, var_name.item.into()),
            VariableDefinition {
                var_type,
                default_value,
            },
        ),
    ))
}

pub(crate) fn parse_directives(
    parser: &mut Parser<'_>,
) -> OptionParseResult<Vec<Spanning<Directive>>> {
    if parser.peek().item != Token::At {
        Ok(None)
    } else {
        let mut items = Vec::new();
        while parser.peek().item == Token::At {
            items.push(parse_directive(parser)?);
        }

        let span = Span::new(&items[0].span.start, &items[items.len() - 1].span.end);
        Ok(Some(Spanning::new(span, items)))
    }
}

fn parse_directive(parser: &mut Parser<'_>) -> ParseResult<Directive> {
    let Spanning {
        span: start_span, ..
    } = parser.expect(&Token::At)?;
    let name = parser.expect_name()?;
    let arguments = parse_arguments(parser)?;

    Ok(Spanning::start_end(
        &start_span.start,
        &arguments
            .as_ref()
            .map_or(&name.span.end, |s| &s.span.end)
            .clone(),
        Directive {
            name: name.map(Name::from),
            arguments,
        },
    ))
}

/// Parses a type literal, e.g. `[Episode!]!`.
pub fn parse_type_literal(parser: &mut Parser<'_>) -> ParseResult<TypeLiteral> {
    let parsed_type = if let Some(Spanning {
        span: start_span, ..
    }) = parser.skip(&Token::BracketOpen)?
    {
        let inner_type = parse_type_literal(parser)?;
        let Spanning { span: end_span, .. } = parser.expect(&Token::BracketClose)?;
        Spanning::start_end(
            &start_span.start,
            &end_span.end,
            TypeLiteral::List(Box::new(inner_type.item)),
        )
    } else {
        parser
            .expect_name()?
            .map(|s| TypeLiteral::Named(s.into()))
    };

    Ok(match parser.peek().item {
        Token::ExclamationMark => wrap_non_null(parser, parsed_type)?,
        _ => parsed_type,
    })
}

fn wrap_non_null(
    parser: &mut Parser<'_>,
    inner: Spanning<TypeLiteral>,
) -> ParseResult<TypeLiteral> {
    let Spanning { span: end_span, .. } = parser.expect(&Token::ExclamationMark)?;

    let wrapped = match inner.item {
        TypeLiteral::Named(name) => TypeLiteral::NonNullNamed(name),
        TypeLiteral::List(l) => TypeLiteral::NonNullList(l),
        t => t,
    };

    Ok(Spanning::start_end(&inner.span.start, &end_span.end, wrapped))
}

#[cfg(test)]
mod tests {
    use crate::ast::{Definition, OperationKind, Selection};

    use super::parse_document_source;

    #[test]
    fn shorthand_query() {
        let doc = parse_document_source("{ hero { name } }").expect("parse error");
        assert_eq!(doc.len(), 1);
        let Definition::Operation(op) = &doc[0] else {
            panic!("expected operation");
        };
        assert_eq!(op.item.kind, OperationKind::Query);
        assert_eq!(op.item.selection_set.len(), 1);
    }

    #[test]
    fn aliases_arguments_and_directives() {
        let doc = parse_document_source(
            r#"query Hero($ep: Episode = JEDI) {
                hero: character(episode: $ep) @include(if: true) { name }
            }"#,
        )
        .expect("parse error");
        let Definition::Operation(op) = &doc[0] else {
            panic!("expected operation");
        };
        let Selection::Field(f) = &op.item.selection_set[0] else {
            panic!("expected field");
        };
        assert_eq!(f.item.response_key(), "hero");
        assert_eq!(f.item.name.item, "character");
        assert!(f.item.directives.is_some());
        assert_eq!(
            op.item
                .variable_definitions
                .as_ref()
                .unwrap()
                .item
                .items
                .len(),
            1,
        );
    }

    #[test]
    fn fragments_and_spreads() {
        let doc = parse_document_source(
            "query { user { ...parts ... on Admin { role } } } fragment parts on User { id }",
        )
        .expect("parse error");
        assert_eq!(doc.len(), 2);
        assert!(matches!(&doc[1], Definition::Fragment(_)));
    }

    #[test]
    fn rejects_lonely_ellipsis() {
        assert!(parse_document_source("{ ... }").is_err());
    }
}
