//! The normalized selection IR: what required-selection-set fragments and
//! sub-selection requests are parsed into.

use std::collections::{HashMap, HashSet};
use std::fmt;

use arcstr::ArcStr;
use itertools::Itertools as _;

use crate::{
    ast::{Directive, FragmentDefinition, Name, Selection},
    parser::{Parser, Spanning, Token, parse_fragment_definition, parse_selection_set},
    schema::ViaductSchema,
};

/// Accumulated validation failures for a declared selection set. Reported at
/// bootstrap, ahead of the first execution.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RequiredSelectionsAreInvalid {
    pub errors: Vec<String>,
}

impl fmt::Display for RequiredSelectionsAreInvalid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Required selections are invalid: {}",
            self.errors.iter().format("; "),
        )
    }
}

impl std::error::Error for RequiredSelectionsAreInvalid {}

/// A parsed, normalized selection set conditioned on a type.
///
/// Three source shapes are accepted:
///
/// - shorthand field lists: `"first last"`,
/// - a braced selection set: `"{ first last }"`,
/// - full fragment syntax; with more than one fragment present the entry
///   fragment must be named `Main`.
#[derive(Clone, Debug, PartialEq)]
pub struct RawSelectionSet {
    /// The composite type the entry selections apply to.
    pub type_condition: ArcStr,
    /// The entry selections.
    pub selections: Vec<Selection>,
    /// Named fragments referenced by spreads, keyed by name.
    pub fragments: HashMap<Name, FragmentDefinition>,
    /// Variable names the selections may reference.
    pub variables: Vec<Name>,
    /// The canonical source text, part of plan-cache keys.
    pub source: String,
}

impl RawSelectionSet {
    /// Parses `source` as selections on `type_condition`.
    pub fn parse(
        type_condition: impl Into<ArcStr>,
        source: &str,
        variables: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Result<Self, RequiredSelectionsAreInvalid> {
        let type_condition = type_condition.into();
        let variables: Vec<Name> = variables
            .into_iter()
            .map(|v| Name::from(v.as_ref()))
            .collect();

        let trimmed = source.trim();
        let is_fragment_form = trimmed
            .strip_prefix("fragment")
            .is_some_and(|rest| rest.starts_with(char::is_whitespace));
        let (selections, fragments) = if is_fragment_form {
            parse_fragment_form(&type_condition, trimmed)?
        } else if trimmed.starts_with('{') {
            (parse_braced(trimmed)?, HashMap::new())
        } else {
            // Shorthand like `"first last"` becomes an implicit unnamed
            // fragment on the target type.
            (parse_braced(&format!("{{ {trimmed} }}"))?, HashMap::new())
        };

        Ok(Self {
            type_condition,
            selections,
            fragments,
            variables,
            source: trimmed.to_owned(),
        })
    }

    /// Whether any selection (transitively through fragments) exists.
    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }

    /// Validates this selection set against `schema`, accumulating every
    /// problem rather than stopping at the first.
    pub fn validate(&self, schema: &ViaductSchema) -> Result<(), RequiredSelectionsAreInvalid> {
        let mut errors = Vec::new();
        let declared: HashSet<&str> = self.variables.iter().map(Name::as_str).collect();

        if schema.type_def(&self.type_condition).is_none_or(|t| !t.is_composite()) {
            errors.push(format!(
                "type condition \"{}\" is not a composite type in the schema",
                self.type_condition,
            ));
        } else {
            let mut visited = HashSet::new();
            self.validate_selections(
                schema,
                &self.type_condition,
                &self.selections,
                &declared,
                &mut visited,
                &mut errors,
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RequiredSelectionsAreInvalid { errors })
        }
    }

    fn validate_selections(
        &self,
        schema: &ViaductSchema,
        on_type: &str,
        selections: &[Selection],
        declared: &HashSet<&str>,
        visited_fragments: &mut HashSet<Name>,
        errors: &mut Vec<String>,
    ) {
        for selection in selections {
            match selection {
                Selection::Field(f) => {
                    let field = &f.item;
                    self.validate_condition_directives(field.directives.as_deref(), declared, errors);

                    if field.name.item == "__typename" {
                        continue;
                    }
                    let Some(meta) = schema.field_of(on_type, &field.name.item) else {
                        errors.push(format!(
                            "field \"{}\" does not exist on type \"{on_type}\"",
                            field.name.item,
                        ));
                        continue;
                    };

                    if let Some(args) = &field.arguments {
                        for (name, value) in args.item.iter() {
                            if meta.argument(&name.item).is_none() {
                                errors.push(format!(
                                    "unknown argument \"{}\" on \"{on_type}.{}\"",
                                    name.item, field.name.item,
                                ));
                            }
                            for var in value.item.referenced_variables() {
                                if !declared.contains(var) {
                                    errors.push(format!(
                                        "variable \"${var}\" used by \"{on_type}.{}\" is not declared",
                                        field.name.item,
                                    ));
                                }
                            }
                        }
                    }

                    let base = meta.field_type.base();
                    let is_composite = schema
                        .type_def(base)
                        .is_some_and(|t| t.is_composite());
                    match (&field.selection_set, is_composite) {
                        (None, true) => errors.push(format!(
                            "field \"{on_type}.{}\" of composite type \"{base}\" needs a selection set",
                            field.name.item,
                        )),
                        (Some(_), false) => errors.push(format!(
                            "field \"{on_type}.{}\" of leaf type \"{base}\" cannot have a selection set",
                            field.name.item,
                        )),
                        (Some(sub), true) => {
                            self.validate_selections(
                                schema,
                                base,
                                sub,
                                declared,
                                visited_fragments,
                                errors,
                            );
                        }
                        (None, false) => {}
                    }
                }
                Selection::InlineFragment(f) => {
                    let frag = &f.item;
                    self.validate_condition_directives(frag.directives.as_deref(), declared, errors);
                    let target = match &frag.type_condition {
                        Some(cond) => {
                            if schema.type_def(&cond.item).is_none_or(|t| !t.is_composite()) {
                                errors.push(format!(
                                    "fragment type condition \"{}\" does not exist",
                                    cond.item,
                                ));
                                continue;
                            }
                            if !schema.is_spreadable(on_type, &cond.item) {
                                errors.push(format!(
                                    "fragment on \"{}\" can never apply to \"{on_type}\"",
                                    cond.item,
                                ));
                                continue;
                            }
                            cond.item.as_str()
                        }
                        None => on_type,
                    };
                    self.validate_selections(
                        schema,
                        target,
                        &frag.selection_set,
                        declared,
                        visited_fragments,
                        errors,
                    );
                }
                Selection::FragmentSpread(f) => {
                    let spread = &f.item;
                    self.validate_condition_directives(spread.directives.as_deref(), declared, errors);
                    let Some(def) = self.fragments.get(&spread.name.item) else {
                        errors.push(format!("unknown fragment \"{}\"", spread.name.item));
                        continue;
                    };
                    if !visited_fragments.insert(spread.name.item.clone()) {
                        continue;
                    }
                    if schema
                        .type_def(&def.type_condition.item)
                        .is_none_or(|t| !t.is_composite())
                    {
                        errors.push(format!(
                            "fragment type condition \"{}\" does not exist",
                            def.type_condition.item,
                        ));
                        continue;
                    }
                    if !schema.is_spreadable(on_type, &def.type_condition.item) {
                        errors.push(format!(
                            "fragment \"{}\" on \"{}\" can never apply to \"{on_type}\"",
                            def.name.item, def.type_condition.item,
                        ));
                        continue;
                    }
                    self.validate_selections(
                        schema,
                        &def.type_condition.item,
                        &def.selection_set,
                        declared,
                        visited_fragments,
                        errors,
                    );
                }
            }
        }
    }

    fn validate_condition_directives(
        &self,
        directives: Option<&[Spanning<Directive>]>,
        declared: &HashSet<&str>,
        errors: &mut Vec<String>,
    ) {
        let Some(directives) = directives else {
            return;
        };
        for d in directives {
            if d.item.name.item != "skip" && d.item.name.item != "include" {
                continue;
            }
            if let Some(args) = &d.item.arguments {
                for (_, value) in args.item.iter() {
                    for var in value.item.referenced_variables() {
                        if !declared.contains(var) {
                            errors.push(format!(
                                "variable \"${var}\" used by @{} is not declared",
                                d.item.name.item,
                            ));
                        }
                    }
                }
            }
        }
    }
}

fn parse_braced(source: &str) -> Result<Vec<Selection>, RequiredSelectionsAreInvalid> {
    let mut parser = Parser::from_source(source).map_err(one_error)?;
    let set = parse_selection_set(&mut parser).map_err(one_error)?;
    expect_eof(&mut parser)?;
    Ok(set.item)
}

fn parse_fragment_form(
    type_condition: &ArcStr,
    source: &str,
) -> Result<(Vec<Selection>, HashMap<Name, FragmentDefinition>), RequiredSelectionsAreInvalid> {
    let mut parser = Parser::from_source(source).map_err(one_error)?;
    let mut fragments = HashMap::new();
    let mut order = Vec::new();

    while parser.peek().item != Token::EndOfFile {
        let def = parse_fragment_definition(&mut parser).map_err(one_error)?;
        let name = def.item.name.item.clone();
        order.push(name.clone());
        fragments.insert(name, def.item);
    }

    let entry_name = if order.len() == 1 {
        order[0].clone()
    } else {
        let main = Name::from("Main");
        if !fragments.contains_key(&main) {
            return Err(RequiredSelectionsAreInvalid {
                errors: vec![
                    "multiple fragments declared, but none of them is named \"Main\"".into(),
                ],
            });
        }
        main
    };

    let entry = fragments
        .remove(&entry_name)
        .expect("entry fragment present");
    if entry.type_condition.item.as_str() != type_condition.as_str() {
        return Err(RequiredSelectionsAreInvalid {
            errors: vec![format!(
                "entry fragment is declared on \"{}\" but the selection targets \"{type_condition}\"",
                entry.type_condition.item,
            )],
        });
    }

    Ok((entry.selection_set, fragments))
}

fn expect_eof(parser: &mut Parser<'_>) -> Result<(), RequiredSelectionsAreInvalid> {
    if parser.peek().item == Token::EndOfFile {
        Ok(())
    } else {
        Err(RequiredSelectionsAreInvalid {
            errors: vec![format!("unexpected trailing input: {}", parser.peek().item)],
        })
    }
}

fn one_error(e: impl fmt::Display) -> RequiredSelectionsAreInvalid {
    RequiredSelectionsAreInvalid {
        errors: vec![e.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use crate::schema::{SchemaOptions, build_schema};

    use super::RawSelectionSet;

    fn schema() -> crate::schema::ViaductSchema {
        build_schema(
            &[(
                "test".into(),
                "type Query { user: User }
                 type User {
                     first: String
                     last: String
                     displayName: String @resolver
                     friends(limit: Int = 10): [User!]
                 }"
                .into(),
            )],
            &SchemaOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn shorthand_expands_to_an_implicit_fragment() {
        let set = RawSelectionSet::parse("User", "first last", Vec::<&str>::new()).unwrap();
        assert_eq!(set.selections.len(), 2);
        set.validate(&schema()).unwrap();
    }

    #[test]
    fn multiple_fragments_require_a_main_entry() {
        let err = RawSelectionSet::parse(
            "User",
            "fragment A on User { first } fragment B on User { last }",
            Vec::<&str>::new(),
        )
        .unwrap_err();
        assert!(err.errors[0].contains("Main"));

        let set = RawSelectionSet::parse(
            "User",
            "fragment Main on User { first ...Rest } fragment Rest on User { last }",
            Vec::<&str>::new(),
        )
        .unwrap();
        set.validate(&schema()).unwrap();
    }

    #[test]
    fn unknown_fields_and_variables_accumulate() {
        let set = RawSelectionSet::parse(
            "User",
            "first nope friends(limit: $n) { first } last @include(if: $cond)",
            Vec::<&str>::new(),
        )
        .unwrap();
        let err = set.validate(&schema()).unwrap_err();
        assert_eq!(err.errors.len(), 3);
        assert!(err.errors[0].contains("nope"));
        assert!(err.errors[1].contains("$n"));
        assert!(err.errors[2].contains("$cond"));
    }

    #[test]
    fn declared_variables_are_accepted() {
        let set =
            RawSelectionSet::parse("User", "friends(limit: $n) { first }", ["n"]).unwrap();
        set.validate(&schema()).unwrap();
    }

    #[test]
    fn leaf_fields_cannot_have_subselections() {
        let set = RawSelectionSet::parse("User", "first { x }", Vec::<&str>::new()).unwrap();
        assert!(set.validate(&schema()).is_err());
    }
}
