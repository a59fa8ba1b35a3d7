//! Pre-execution validation of request documents against the active schema.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::{
    ast::{
        Definition, Directive, Document, FragmentDefinition, Name, Operation, OperationKind,
        Selection,
    },
    parser::{SourcePosition, Spanning},
    schema::ViaductSchema,
};

/// One validation failure, with the source positions that produced it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RuleError {
    locations: Vec<SourcePosition>,
    message: String,
}

impl RuleError {
    #[doc(hidden)]
    pub fn new(locations: &[SourcePosition], message: impl Into<String>) -> Self {
        Self {
            locations: locations.to_vec(),
            message: message.into(),
        }
    }

    /// The failure message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Source positions related to the failure.
    pub fn locations(&self) -> &[SourcePosition] {
        &self.locations
    }
}

impl fmt::Display for RuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}. At {}", self.message, {
            use itertools::Itertools as _;
            self.locations.iter().format(", ")
        })
    }
}

impl std::error::Error for RuleError {}

/// Validates a parsed document against the active schema, accumulating every
/// rule violation.
pub fn validate_document(schema: &ViaductSchema, document: &Document) -> Vec<RuleError> {
    let mut ctx = ValidatorContext {
        schema,
        fragments: HashMap::new(),
        errors: Vec::new(),
    };

    for def in document {
        if let Definition::Fragment(f) = def {
            ctx.fragments.insert(f.item.name.item.clone(), &f.item);
        }
    }

    for def in document {
        match def {
            Definition::Operation(op) => ctx.validate_operation(&op.item, op.span.start),
            Definition::Fragment(f) => {
                let cond = &f.item.type_condition;
                if ctx
                    .schema
                    .type_def(&cond.item)
                    .is_none_or(|t| !t.is_composite())
                {
                    ctx.errors.push(RuleError::new(
                        &[cond.span.start],
                        format!("Unknown type \"{}\" in fragment condition", cond.item),
                    ));
                }
            }
        }
    }

    ctx.errors
}

struct ValidatorContext<'a> {
    schema: &'a ViaductSchema,
    fragments: HashMap<Name, &'a FragmentDefinition>,
    errors: Vec<RuleError>,
}

impl<'a> ValidatorContext<'a> {
    fn validate_operation(&mut self, operation: &'a Operation, at: SourcePosition) {
        let root = match operation.kind {
            OperationKind::Query => self.schema.query_type_name().clone(),
            OperationKind::Mutation => match self.schema.mutation_type_name() {
                Some(m) => m.clone(),
                None => {
                    self.errors
                        .push(RuleError::new(&[at], "Schema has no mutation type"));
                    return;
                }
            },
            OperationKind::Subscription => {
                self.errors.push(RuleError::new(
                    &[at],
                    "Subscription operations are not supported",
                ));
                return;
            }
        };

        let declared: HashSet<&str> = operation
            .variable_definitions
            .as_ref()
            .map(|defs| defs.item.iter().map(|(name, _)| name.item.as_str()).collect())
            .unwrap_or_default();

        let mut visited = HashSet::new();
        self.validate_selections(&root, &operation.selection_set, &declared, &mut visited);
    }

    fn validate_selections(
        &mut self,
        on_type: &str,
        selections: &'a [Selection],
        declared: &HashSet<&str>,
        visited: &mut HashSet<Name>,
    ) {
        for selection in selections {
            match selection {
                Selection::Field(f) => {
                    let field = &f.item;
                    self.check_directive_variables(field.directives.as_deref(), declared);

                    if field.name.item == "__typename" {
                        continue;
                    }
                    let Some(meta) = self.schema.field_of(on_type, &field.name.item) else {
                        self.errors.push(RuleError::new(
                            &[field.name.span.start],
                            format!(
                                "Cannot query field \"{}\" on type \"{on_type}\"",
                                field.name.item,
                            ),
                        ));
                        continue;
                    };

                    if let Some(args) = &field.arguments {
                        for (name, value) in args.item.iter() {
                            if meta.argument(&name.item).is_none() {
                                self.errors.push(RuleError::new(
                                    &[name.span.start],
                                    format!(
                                        "Unknown argument \"{}\" on field \"{on_type}.{}\"",
                                        name.item, field.name.item,
                                    ),
                                ));
                            }
                            for var in value.item.referenced_variables() {
                                if !declared.contains(var) {
                                    self.errors.push(RuleError::new(
                                        &[value.span.start],
                                        format!("Variable \"${var}\" is not defined"),
                                    ));
                                }
                            }
                        }
                    }

                    let base = meta.field_type.base().clone();
                    let is_composite = self
                        .schema
                        .type_def(&base)
                        .is_some_and(|t| t.is_composite());
                    match (&field.selection_set, is_composite) {
                        (None, true) => self.errors.push(RuleError::new(
                            &[field.name.span.start],
                            format!(
                                "Field \"{}\" of type \"{base}\" must have a selection of subfields",
                                field.name.item,
                            ),
                        )),
                        (Some(_), false) => self.errors.push(RuleError::new(
                            &[field.name.span.start],
                            format!(
                                "Field \"{}\" must not have a selection since type \"{base}\" has no subfields",
                                field.name.item,
                            ),
                        )),
                        (Some(sub), true) => {
                            self.validate_selections(&base, sub, declared, visited);
                        }
                        (None, false) => {}
                    }
                }
                Selection::InlineFragment(frag) => {
                    self.check_directive_variables(frag.item.directives.as_deref(), declared);
                    let target = match &frag.item.type_condition {
                        Some(cond) => {
                            if !self.check_condition(on_type, &cond.item, cond.span.start) {
                                continue;
                            }
                            cond.item.to_string()
                        }
                        None => on_type.to_owned(),
                    };
                    self.validate_selections(
                        &target,
                        &frag.item.selection_set,
                        declared,
                        visited,
                    );
                }
                Selection::FragmentSpread(spread) => {
                    self.check_directive_variables(spread.item.directives.as_deref(), declared);
                    let Some(def) = self.fragments.get(&spread.item.name.item).copied() else {
                        self.errors.push(RuleError::new(
                            &[spread.item.name.span.start],
                            format!("Unknown fragment \"{}\"", spread.item.name.item),
                        ));
                        continue;
                    };
                    if !visited.insert(spread.item.name.item.clone()) {
                        continue;
                    }
                    if self.check_condition(
                        on_type,
                        &def.type_condition.item,
                        def.type_condition.span.start,
                    ) {
                        self.validate_selections(
                            &def.type_condition.item.clone(),
                            &def.selection_set,
                            declared,
                            visited,
                        );
                    }
                    visited.remove(&spread.item.name.item);
                }
            }
        }
    }

    fn check_condition(&mut self, on_type: &str, condition: &Name, at: SourcePosition) -> bool {
        if self
            .schema
            .type_def(condition)
            .is_none_or(|t| !t.is_composite())
        {
            self.errors.push(RuleError::new(
                &[at],
                format!("Unknown type \"{condition}\" in fragment condition"),
            ));
            return false;
        }
        if !self.schema.is_spreadable(on_type, condition) {
            self.errors.push(RuleError::new(
                &[at],
                format!(
                    "Fragment on \"{condition}\" can never be spread inside \"{on_type}\"",
                ),
            ));
            return false;
        }
        true
    }

    fn check_directive_variables(
        &mut self,
        directives: Option<&[Spanning<Directive>]>,
        declared: &HashSet<&str>,
    ) {
        let Some(directives) = directives else {
            return;
        };
        for d in directives {
            if let Some(args) = &d.item.arguments {
                for (_, value) in args.item.iter() {
                    for var in value.item.referenced_variables() {
                        if !declared.contains(var) {
                            self.errors.push(RuleError::new(
                                &[value.span.start],
                                format!("Variable \"${var}\" is not defined"),
                            ));
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        parser::parse_document_source,
        schema::{SchemaOptions, ViaductSchema, build_schema},
    };

    use super::validate_document;

    fn schema() -> ViaductSchema {
        build_schema(
            &[(
                "test".into(),
                "type Query { hero: Character }
                 interface Character { id: ID! name: String! }
                 type Human implements Character { id: ID! name: String! homePlanet: String }"
                    .into(),
            )],
            &SchemaOptions::default(),
        )
        .unwrap()
    }

    fn errors(doc: &str) -> Vec<String> {
        let document = parse_document_source(doc).unwrap();
        validate_document(&schema(), &document)
            .into_iter()
            .map(|e| e.message().to_owned())
            .collect()
    }

    #[test]
    fn valid_documents_pass() {
        assert!(errors("{ hero { name ... on Human { homePlanet } } }").is_empty());
    }

    #[test]
    fn unknown_fields_are_reported() {
        let errs = errors("{ hero { wingspan } }");
        assert_eq!(errs.len(), 1);
        assert!(errs[0].contains("wingspan"));
    }

    #[test]
    fn undeclared_variables_are_reported() {
        let errs = errors("{ hero { name @include(if: $yes) } }");
        assert_eq!(errs, ["Variable \"$yes\" is not defined"]);
    }

    #[test]
    fn unspreadable_fragments_are_reported() {
        let errs = errors("{ hero { ... on Query { hero { name } } } }");
        assert_eq!(errs.len(), 1);
        assert!(errs[0].contains("never be spread"));
    }

    #[test]
    fn leaf_fields_reject_subselections() {
        let errs = errors("{ hero { name { x } } }");
        assert_eq!(errs.len(), 1);
    }

    #[test]
    fn subscriptions_are_rejected() {
        let errs = errors("subscription { hero }");
        assert_eq!(errs, ["Subscription operations are not supported"]);
    }
}
