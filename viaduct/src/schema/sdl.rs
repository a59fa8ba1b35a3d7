//! Parsing of schema-definition-language sources into a [`ViaductSchema`].
//!
//! The grammar is parsed with the same lexer and token-stream combinators as
//! executable documents; this module owns the type-system half.

use std::hash::Hasher as _;

use arcstr::ArcStr;
use fnv::FnvHashMap;
use indexmap::IndexMap;

use crate::{
    parser::{
        ParseError, Parser, Spanning, Token, UnlocatedParseResult, parse_type_literal,
        parse_value_literal,
    },
    schema::{
        meta::{
            AppliedDirective, ArgumentMeta, DeprecationStatus, DirectiveLocation, DirectiveMeta,
            EnumMeta, EnumValueMeta, FieldMeta, InputObjectMeta, InterfaceMeta, ObjectMeta,
            ScalarMeta, TypeDef, UnionMeta,
        },
        model::{
            InvalidSchema, SchemaError, ViaductSchema, built_in_directives, built_in_scalars,
        },
        type_expr::TypeExpr,
    },
    value::coercion,
};

/// Build-time schema options, set through the service builder.
#[derive(Clone, Debug)]
pub struct SchemaOptions {
    /// When `false`, a `Subscription` type anywhere in the sources fails the
    /// build.
    pub allow_subscriptions: bool,
    /// When `true` and the schema has node implementors, `node`/`nodes`
    /// query fields are injected.
    pub enable_node_resolvers: bool,
}

impl Default for SchemaOptions {
    fn default() -> Self {
        Self {
            allow_subscriptions: false,
            enable_node_resolvers: true,
        }
    }
}

/// Parses and validates SDL `sources` into a closed schema.
pub fn build_schema(
    sources: &[(String, String)],
    options: &SchemaOptions,
) -> Result<ViaductSchema, InvalidSchema> {
    let mut defs = Vec::new();
    for (name, text) in sources {
        let parsed = parse_sdl_source(text).map_err(|e| InvalidSchema {
            errors: vec![SchemaError::Parse(name.as_str().into(), e.to_string())],
        })?;
        defs.extend(parsed);
    }
    assemble(defs, sources, options)
}

#[derive(Debug)]
enum SdlDefinition {
    SchemaDecl {
        query: Option<ArcStr>,
        mutation: Option<ArcStr>,
        subscription: Option<ArcStr>,
    },
    Type(TypeDef),
    Directive(DirectiveMeta),
}

fn parse_sdl_source(source: &str) -> UnlocatedParseResult<Vec<SdlDefinition>> {
    let mut parser = Parser::from_source(source)?;
    let mut defs = Vec::new();
    loop {
        if parser.peek().item == Token::EndOfFile {
            return Ok(defs);
        }
        defs.push(parse_sdl_definition(&mut parser)?);
    }
}

fn parse_sdl_definition(parser: &mut Parser<'_>) -> UnlocatedParseResult<SdlDefinition> {
    let description = parse_description(parser)?;

    match parser.peek().item {
        Token::Name("schema") => parse_schema_decl(parser),
        Token::Name("scalar") => parse_scalar_def(parser, description),
        Token::Name("type") => parse_object_def(parser, description),
        Token::Name("interface") => parse_interface_def(parser, description),
        Token::Name("union") => parse_union_def(parser, description),
        Token::Name("enum") => parse_enum_def(parser, description),
        Token::Name("input") => parse_input_def(parser, description),
        Token::Name("directive") => parse_directive_def(parser, description),
        _ => Err(parser.next_token()?.map(ParseError::unexpected_token)),
    }
}

fn parse_description(
    parser: &mut Parser<'_>,
) -> Result<Option<ArcStr>, Spanning<ParseError>> {
    if let Token::String(_) = parser.peek().item {
        let token = parser.next_token()?;
        if let Token::String(s) = token.item {
            return Ok(Some(s.as_str().into()));
        }
    }
    Ok(None)
}

fn parse_schema_decl(parser: &mut Parser<'_>) -> UnlocatedParseResult<SdlDefinition> {
    parser.expect(&Token::Name("schema"))?;
    let _ = parse_applied_directives(parser)?;
    parser.expect(&Token::CurlyOpen)?;

    let mut query = None;
    let mut mutation = None;
    let mut subscription = None;

    while parser.skip(&Token::CurlyClose)?.is_none() {
        let op = parser.expect_name()?;
        parser.expect(&Token::Colon)?;
        let target = parser.expect_name()?;
        match op.item {
            "query" => query = Some(ArcStr::from(target.item)),
            "mutation" => mutation = Some(ArcStr::from(target.item)),
            "subscription" => subscription = Some(ArcStr::from(target.item)),
            _ => return Err(op.map(|n| ParseError::unexpected_token(Token::Name(n)))),
        }
    }

    Ok(SdlDefinition::SchemaDecl {
        query,
        mutation,
        subscription,
    })
}

fn parse_scalar_def(
    parser: &mut Parser<'_>,
    description: Option<ArcStr>,
) -> UnlocatedParseResult<SdlDefinition> {
    parser.expect(&Token::Name("scalar"))?;
    let name = parser.expect_name()?;
    let _ = parse_applied_directives(parser)?;

    // Tenant scalars are carried as opaque JSON-capable leaves.
    let mut meta = ScalarMeta::new(name.item, coercion::json);
    meta.description = description;
    Ok(SdlDefinition::Type(TypeDef::Scalar(meta)))
}

fn parse_implements(parser: &mut Parser<'_>) -> Result<Vec<ArcStr>, Spanning<ParseError>> {
    let mut names = Vec::new();
    if parser.skip_keyword("implements")? {
        // Leading `&` is optional.
        let _ = parser.skip(&Token::Amp)?;
        names.push(ArcStr::from(parser.expect_name()?.item));
        while parser.skip(&Token::Amp)?.is_some() {
            names.push(ArcStr::from(parser.expect_name()?.item));
        }
    }
    Ok(names)
}

fn parse_object_def(
    parser: &mut Parser<'_>,
    description: Option<ArcStr>,
) -> UnlocatedParseResult<SdlDefinition> {
    parser.expect(&Token::Name("type"))?;
    let name = parser.expect_name()?;
    let interface_names = parse_implements(parser)?;
    let directives = parse_applied_directives(parser)?;
    let fields = parse_field_definitions(parser)?;

    Ok(SdlDefinition::Type(TypeDef::Object(ObjectMeta {
        name: name.item.into(),
        description,
        fields,
        interface_names,
        has_resolver: has_directive(&directives, "resolver"),
        scopes: scopes_of(&directives),
        directives,
    })))
}

fn parse_interface_def(
    parser: &mut Parser<'_>,
    description: Option<ArcStr>,
) -> UnlocatedParseResult<SdlDefinition> {
    parser.expect(&Token::Name("interface"))?;
    let name = parser.expect_name()?;
    let interface_names = parse_implements(parser)?;
    let directives = parse_applied_directives(parser)?;
    let fields = parse_field_definitions(parser)?;

    Ok(SdlDefinition::Type(TypeDef::Interface(InterfaceMeta {
        name: name.item.into(),
        description,
        fields,
        interface_names,
        scopes: scopes_of(&directives),
        directives,
    })))
}

fn parse_union_def(
    parser: &mut Parser<'_>,
    description: Option<ArcStr>,
) -> UnlocatedParseResult<SdlDefinition> {
    parser.expect(&Token::Name("union"))?;
    let name = parser.expect_name()?;
    let directives = parse_applied_directives(parser)?;
    parser.expect(&Token::Equals)?;

    let mut of_type_names = Vec::new();
    let _ = parser.skip(&Token::Pipe)?;
    of_type_names.push(ArcStr::from(parser.expect_name()?.item));
    while parser.skip(&Token::Pipe)?.is_some() {
        of_type_names.push(ArcStr::from(parser.expect_name()?.item));
    }

    Ok(SdlDefinition::Type(TypeDef::Union(UnionMeta {
        name: name.item.into(),
        description,
        of_type_names,
        scopes: scopes_of(&directives),
        directives,
    })))
}

fn parse_enum_def(
    parser: &mut Parser<'_>,
    description: Option<ArcStr>,
) -> UnlocatedParseResult<SdlDefinition> {
    parser.expect(&Token::Name("enum"))?;
    let name = parser.expect_name()?;
    let directives = parse_applied_directives(parser)?;
    parser.expect(&Token::CurlyOpen)?;

    let mut values = Vec::new();
    while parser.skip(&Token::CurlyClose)?.is_none() {
        let value_description = parse_description(parser)?;
        let value_name = parser.expect_name()?;
        let value_directives = parse_applied_directives(parser)?;
        values.push(EnumValueMeta {
            name: value_name.item.into(),
            description: value_description,
            deprecation_status: deprecation_of(&value_directives),
            scopes: scopes_of(&value_directives),
        });
    }

    Ok(SdlDefinition::Type(TypeDef::Enum(EnumMeta {
        name: name.item.into(),
        description,
        values,
        scopes: scopes_of(&directives),
        directives,
    })))
}

fn parse_input_def(
    parser: &mut Parser<'_>,
    description: Option<ArcStr>,
) -> UnlocatedParseResult<SdlDefinition> {
    parser.expect(&Token::Name("input"))?;
    let name = parser.expect_name()?;
    let directives = parse_applied_directives(parser)?;
    parser.expect(&Token::CurlyOpen)?;

    let mut input_fields = Vec::new();
    while parser.skip(&Token::CurlyClose)?.is_none() {
        input_fields.push(parse_input_value_definition(parser)?);
    }

    Ok(SdlDefinition::Type(TypeDef::InputObject(InputObjectMeta {
        name: name.item.into(),
        description,
        input_fields,
        one_of: has_directive(&directives, "oneOf"),
        scopes: scopes_of(&directives),
        directives,
    })))
}

fn parse_directive_def(
    parser: &mut Parser<'_>,
    description: Option<ArcStr>,
) -> UnlocatedParseResult<SdlDefinition> {
    parser.expect(&Token::Name("directive"))?;
    parser.expect(&Token::At)?;
    let name = parser.expect_name()?;
    let arguments = parse_argument_definitions(parser)?;
    let repeatable = parser.skip_keyword("repeatable")?;
    parser.expect(&Token::Name("on"))?;

    let mut locations = Vec::new();
    let _ = parser.skip(&Token::Pipe)?;
    loop {
        let loc = parser.expect_name()?;
        locations.push(
            DirectiveLocation::from_sdl_name(loc.item)
                .ok_or_else(|| loc.map(|n| ParseError::unexpected_token(Token::Name(n))))?,
        );
        if parser.skip(&Token::Pipe)?.is_none() {
            break;
        }
    }

    Ok(SdlDefinition::Directive(DirectiveMeta {
        name: name.item.into(),
        description,
        locations,
        arguments,
        repeatable,
    }))
}

fn parse_field_definitions(
    parser: &mut Parser<'_>,
) -> Result<Vec<FieldMeta>, Spanning<ParseError>> {
    parser.expect(&Token::CurlyOpen)?;
    let mut fields = Vec::new();

    while parser.skip(&Token::CurlyClose)?.is_none() {
        let description = parse_description(parser)?;
        let name = parser.expect_name()?;
        let arguments = parse_argument_definitions(parser)?;
        parser.expect(&Token::Colon)?;
        let field_type = parse_type_literal(parser)?;
        let directives = parse_applied_directives(parser)?;

        fields.push(FieldMeta {
            name: name.item.into(),
            description,
            arguments,
            field_type: TypeExpr::from_literal(&field_type.item),
            deprecation_status: deprecation_of(&directives),
            has_resolver: has_directive(&directives, "resolver"),
            id_of: directive_string_arg(&directives, "idOf", "type"),
            backing_data: directive_string_arg(&directives, "backingData", "class"),
            scopes: scopes_of(&directives),
            directives,
        });
    }

    Ok(fields)
}

fn parse_argument_definitions(
    parser: &mut Parser<'_>,
) -> Result<Vec<ArgumentMeta>, Spanning<ParseError>> {
    if parser.peek().item != Token::ParenOpen {
        return Ok(Vec::new());
    }
    parser.expect(&Token::ParenOpen)?;

    let mut args = Vec::new();
    while parser.skip(&Token::ParenClose)?.is_none() {
        args.push(parse_input_value_definition(parser)?);
    }
    Ok(args)
}

fn parse_input_value_definition(
    parser: &mut Parser<'_>,
) -> Result<ArgumentMeta, Spanning<ParseError>> {
    let description = parse_description(parser)?;
    let name = parser.expect_name()?;
    parser.expect(&Token::Colon)?;
    let arg_type = parse_type_literal(parser)?;
    let default_value = if parser.skip(&Token::Equals)?.is_some() {
        Some(parse_value_literal(parser, true)?.item)
    } else {
        None
    };
    let directives = parse_applied_directives(parser)?;

    Ok(ArgumentMeta {
        name: name.item.into(),
        description,
        arg_type: TypeExpr::from_literal(&arg_type.item),
        default_value,
        id_of: directive_string_arg(&directives, "idOf", "type"),
        directives,
    })
}

fn parse_applied_directives(
    parser: &mut Parser<'_>,
) -> Result<Vec<AppliedDirective>, Spanning<ParseError>> {
    let mut out = Vec::new();
    while parser.peek().item == Token::At {
        parser.expect(&Token::At)?;
        let name = parser.expect_name()?;
        let mut arguments = IndexMap::new();
        if parser.peek().item == Token::ParenOpen {
            parser.expect(&Token::ParenOpen)?;
            while parser.skip(&Token::ParenClose)?.is_none() {
                let arg_name = parser.expect_name()?;
                parser.expect(&Token::Colon)?;
                let value = parse_value_literal(parser, true)?;
                arguments.insert(ArcStr::from(arg_name.item), value.item);
            }
        }
        out.push(AppliedDirective {
            name: name.item.into(),
            arguments,
        });
    }
    Ok(out)
}

fn has_directive(directives: &[AppliedDirective], name: &str) -> bool {
    directives.iter().any(|d| d.name == name)
}

fn scopes_of(directives: &[AppliedDirective]) -> Vec<ArcStr> {
    directives
        .iter()
        .filter(|d| d.name == "scope")
        .flat_map(|d| d.string_list_argument("to"))
        .collect()
}

fn deprecation_of(directives: &[AppliedDirective]) -> DeprecationStatus {
    directives
        .iter()
        .find(|d| d.name == "deprecated")
        .map(|d| DeprecationStatus::Deprecated(d.string_argument("reason")))
        .unwrap_or(DeprecationStatus::Current)
}

fn directive_string_arg(
    directives: &[AppliedDirective],
    directive: &str,
    argument: &str,
) -> Option<ArcStr> {
    directives
        .iter()
        .find(|d| d.name == directive)?
        .string_argument(argument)
}

fn assemble(
    defs: Vec<SdlDefinition>,
    sources: &[(String, String)],
    options: &SchemaOptions,
) -> Result<ViaductSchema, InvalidSchema> {
    let mut errors = Vec::new();
    let mut types: FnvHashMap<ArcStr, TypeDef> = FnvHashMap::default();
    let mut directives: FnvHashMap<ArcStr, DirectiveMeta> = FnvHashMap::default();

    for scalar in built_in_scalars() {
        types.insert(scalar.name.clone(), TypeDef::Scalar(scalar));
    }
    for directive in built_in_directives() {
        directives.insert(directive.name.clone(), directive);
    }

    let mut query_type_name: ArcStr = "Query".into();
    let mut mutation_type_name: Option<ArcStr> = None;
    let mut subscription_declared = false;

    for def in defs {
        match def {
            SdlDefinition::SchemaDecl {
                query,
                mutation,
                subscription,
            } => {
                if let Some(q) = query {
                    query_type_name = q;
                }
                if mutation.is_some() {
                    mutation_type_name = mutation;
                }
                subscription_declared |= subscription.is_some();
            }
            SdlDefinition::Type(t) => {
                let name = t.name().clone();
                if types.insert(name.clone(), t).is_some() {
                    errors.push(SchemaError::DuplicateType(name));
                }
            }
            SdlDefinition::Directive(d) => {
                directives.insert(d.name.clone(), d);
            }
        }
    }

    if mutation_type_name.is_none() && types.contains_key("Mutation") {
        mutation_type_name = Some("Mutation".into());
    }
    if subscription_declared || types.contains_key("Subscription") {
        if !options.allow_subscriptions {
            errors.push(SchemaError::SubscriptionsUnsupported);
        }
    }

    if options.enable_node_resolvers {
        inject_node_fields(&mut types, &query_type_name);
    }

    let schema = ViaductSchema {
        types,
        query_type_name,
        mutation_type_name,
        directives,
        digest: digest_sources(sources),
    };

    validate(&schema, &mut errors);

    if errors.is_empty() {
        Ok(schema)
    } else {
        Err(InvalidSchema { errors })
    }
}

/// Adds `node(id: ID!): Node` and `nodes(ids: [ID!]!): [Node]!` to the query
/// root when the schema has node implementors and does not declare them
/// itself.
fn inject_node_fields(types: &mut FnvHashMap<ArcStr, TypeDef>, query_type_name: &ArcStr) {
    let has_node_interface = matches!(types.get("Node"), Some(TypeDef::Interface(_)));
    let has_implementors = types.values().any(|t| match t {
        TypeDef::Object(m) => m.is_node(),
        _ => false,
    });
    if !has_node_interface || !has_implementors {
        return;
    }

    let Some(TypeDef::Object(query)) = types.get_mut(query_type_name) else {
        return;
    };

    if query.field_by_name("node").is_none() {
        query.fields.push(FieldMeta {
            name: "node".into(),
            description: Some("Fetches an object given its global ID.".into()),
            arguments: vec![ArgumentMeta {
                name: "id".into(),
                description: None,
                arg_type: TypeExpr::named("ID", false),
                default_value: None,
                id_of: None,
                directives: Vec::new(),
            }],
            field_type: TypeExpr::named("Node", true),
            deprecation_status: DeprecationStatus::Current,
            directives: Vec::new(),
            has_resolver: true,
            id_of: None,
            backing_data: None,
            scopes: Vec::new(),
        });
    }

    if query.field_by_name("nodes").is_none() {
        query.fields.push(FieldMeta {
            name: "nodes".into(),
            description: Some("Fetches objects given their global IDs.".into()),
            arguments: vec![ArgumentMeta {
                name: "ids".into(),
                description: None,
                arg_type: TypeExpr::named("ID", false).wrap_list(false),
                default_value: None,
                id_of: None,
                directives: Vec::new(),
            }],
            field_type: TypeExpr::named("Node", true).wrap_list(false),
            deprecation_status: DeprecationStatus::Current,
            directives: Vec::new(),
            has_resolver: true,
            id_of: None,
            backing_data: None,
            scopes: Vec::new(),
        });
    }
}

fn digest_sources(sources: &[(String, String)]) -> u64 {
    let mut hasher = fnv::FnvHasher::default();
    for (name, text) in sources {
        hasher.write(name.as_bytes());
        hasher.write(&[0]);
        hasher.write(text.as_bytes());
        hasher.write(&[0]);
    }
    hasher.finish()
}

fn validate(schema: &ViaductSchema, errors: &mut Vec<SchemaError>) {
    match schema.types.get(&schema.query_type_name) {
        Some(TypeDef::Object(_)) => {}
        _ => errors.push(SchemaError::BadRootType(schema.query_type_name.clone())),
    }
    if let Some(m) = &schema.mutation_type_name {
        if !matches!(schema.types.get(m), Some(TypeDef::Object(_))) {
            errors.push(SchemaError::BadRootType(m.clone()));
        }
    }

    for t in schema.types.values() {
        match t {
            TypeDef::Object(m) => {
                validate_directives(schema, &m.name, &m.directives, DirectiveLocation::Object, errors);
                for iface in &m.interface_names {
                    match schema.types.get(iface) {
                        Some(TypeDef::Interface(iface_meta)) => {
                            for own in &m.fields {
                                if let Some(decl) = iface_meta.field_by_name(&own.name) {
                                    if decl.field_type != own.field_type {
                                        errors.push(SchemaError::FieldOverrideMismatch(
                                            m.name.clone(),
                                            own.name.clone(),
                                            own.field_type.clone(),
                                            iface.clone(),
                                            decl.field_type.clone(),
                                        ));
                                    }
                                }
                            }
                        }
                        _ => errors.push(SchemaError::UnknownInterface(
                            m.name.clone(),
                            iface.clone(),
                        )),
                    }
                }
                validate_fields(schema, &m.name, &m.fields, errors);
            }
            TypeDef::Interface(m) => {
                validate_directives(
                    schema,
                    &m.name,
                    &m.directives,
                    DirectiveLocation::Interface,
                    errors,
                );
                for iface in &m.interface_names {
                    if !matches!(schema.types.get(iface), Some(TypeDef::Interface(_))) {
                        errors.push(SchemaError::UnknownInterface(
                            m.name.clone(),
                            iface.clone(),
                        ));
                    }
                }
                validate_fields(schema, &m.name, &m.fields, errors);
            }
            TypeDef::Union(m) => {
                validate_directives(
                    schema,
                    &m.name,
                    &m.directives,
                    DirectiveLocation::Union,
                    errors,
                );
                for member in &m.of_type_names {
                    match schema.types.get(member) {
                        Some(TypeDef::Object(_)) => {}
                        Some(_) => errors.push(SchemaError::NotAnOutputType(
                            member.clone(),
                            m.name.clone(),
                        )),
                        None => errors.push(SchemaError::UnknownType(
                            member.clone(),
                            m.name.clone(),
                        )),
                    }
                }
            }
            TypeDef::InputObject(m) => {
                validate_directives(
                    schema,
                    &m.name,
                    &m.directives,
                    DirectiveLocation::InputObject,
                    errors,
                );
                for f in &m.input_fields {
                    validate_input_position(
                        schema,
                        &format!("{}.{}", m.name, f.name),
                        &f.arg_type,
                        errors,
                    );
                    if m.one_of && (!f.arg_type.is_nullable() || f.default_value.is_some()) {
                        errors.push(SchemaError::OneOfFieldNotNullable(
                            m.name.clone(),
                            f.name.clone(),
                        ));
                    }
                }
            }
            TypeDef::Scalar(_) => {}
            TypeDef::Enum(m) => {
                validate_directives(
                    schema,
                    &m.name,
                    &m.directives,
                    DirectiveLocation::Enum,
                    errors,
                );
            }
        }
    }
}

fn validate_directives(
    schema: &ViaductSchema,
    position: &ArcStr,
    directives: &[AppliedDirective],
    location: DirectiveLocation,
    errors: &mut Vec<SchemaError>,
) {
    for d in directives {
        match schema.directives.get(&d.name) {
            None => errors.push(SchemaError::UnknownDirective(
                d.name.clone(),
                position.clone(),
            )),
            Some(def) => {
                if !def.allows(location) {
                    errors.push(SchemaError::DirectiveNotAllowedHere(
                        d.name.clone(),
                        position.clone(),
                    ));
                }
                if !def.repeatable
                    && directives.iter().filter(|o| o.name == d.name).count() > 1
                {
                    errors.push(SchemaError::DirectiveNotRepeatable(
                        d.name.clone(),
                        position.clone(),
                    ));
                }
            }
        }
    }
}

fn validate_fields(
    schema: &ViaductSchema,
    type_name: &ArcStr,
    fields: &[FieldMeta],
    errors: &mut Vec<SchemaError>,
) {
    for f in fields {
        let position: ArcStr = format!("{type_name}.{}", f.name).into();
        match schema.types.get(f.field_type.base()) {
            None => errors.push(SchemaError::UnknownType(
                f.field_type.base().clone(),
                position.clone(),
            )),
            Some(TypeDef::InputObject(_)) => errors.push(SchemaError::NotAnOutputType(
                f.field_type.base().clone(),
                position.clone(),
            )),
            Some(_) => {}
        }
        for a in &f.arguments {
            validate_input_position(
                schema,
                &format!("{position}({})", a.name),
                &a.arg_type,
                errors,
            );
        }
        validate_directives(
            schema,
            &position,
            &f.directives,
            DirectiveLocation::FieldDefinition,
            errors,
        );
    }
}

fn validate_input_position(
    schema: &ViaductSchema,
    position: &str,
    expr: &TypeExpr,
    errors: &mut Vec<SchemaError>,
) {
    match schema.types.get(expr.base()) {
        None => errors.push(SchemaError::UnknownType(
            expr.base().clone(),
            position.into(),
        )),
        Some(t) if !t.is_input() => errors.push(SchemaError::NotAnInputType(
            expr.base().clone(),
            position.into(),
        )),
        Some(_) => {}
    }
}
