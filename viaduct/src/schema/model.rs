use std::fmt;

use arcstr::ArcStr;
use derive_more::with_trait::{Display, Error};
use fnv::FnvHashMap;
use itertools::Itertools as _;

use crate::{
    schema::meta::{
        ArgumentMeta, DirectiveLocation, DirectiveMeta, FieldMeta, ObjectMeta, ScalarMeta,
        TypeDef,
    },
    schema::type_expr::TypeExpr,
    value::coercion,
};

/// A single schema-validation failure.
#[derive(Clone, Debug, Display, Eq, Error, PartialEq)]
pub enum SchemaError {
    #[display("Unknown type \"{_0}\" referenced from \"{_1}\"")]
    UnknownType(#[error(not(source))] ArcStr, ArcStr),

    #[display("Type \"{_0}\" is defined more than once")]
    DuplicateType(#[error(not(source))] ArcStr),

    #[display("\"{_0}\" is not usable in output position at \"{_1}\"")]
    NotAnOutputType(#[error(not(source))] ArcStr, ArcStr),

    #[display("\"{_0}\" is not usable in input position at \"{_1}\"")]
    NotAnInputType(#[error(not(source))] ArcStr, ArcStr),

    #[display("@oneOf input \"{_0}\" has non-nullable or defaulted field \"{_1}\"")]
    OneOfFieldNotNullable(#[error(not(source))] ArcStr, ArcStr),

    #[display(
        "Field \"{_0}.{_1}\" is declared as \"{_2}\" but interface \"{_3}\" declares \"{_4}\""
    )]
    FieldOverrideMismatch(
        #[error(not(source))] ArcStr,
        ArcStr,
        TypeExpr,
        ArcStr,
        TypeExpr,
    ),

    #[display("Object \"{_0}\" declares unknown interface \"{_1}\"")]
    UnknownInterface(#[error(not(source))] ArcStr, ArcStr),

    #[display("Unknown directive \"@{_0}\" applied at \"{_1}\"")]
    UnknownDirective(#[error(not(source))] ArcStr, ArcStr),

    #[display("Directive \"@{_0}\" is not allowed at \"{_1}\"")]
    DirectiveNotAllowedHere(#[error(not(source))] ArcStr, ArcStr),

    #[display("Directive \"@{_0}\" is not repeatable but applied twice at \"{_1}\"")]
    DirectiveNotRepeatable(#[error(not(source))] ArcStr, ArcStr),

    #[display("Root type \"{_0}\" is missing or not an object type")]
    BadRootType(#[error(not(source))] ArcStr),

    #[display("Schema declares a Subscription type, which is not supported")]
    SubscriptionsUnsupported,

    #[display("Failed to parse schema source \"{_0}\": {_1}")]
    Parse(#[error(not(source))] ArcStr, String),
}

/// The schema failed validation at build time. Fatal: startup aborts.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InvalidSchema {
    pub errors: Vec<SchemaError>,
}

impl fmt::Display for InvalidSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid schema: {}", self.errors.iter().format("; "))
    }
}

impl std::error::Error for InvalidSchema {}

/// An in-memory, closed GraphQL schema.
///
/// Closed means every name any definition references resolves to another
/// definition in the same schema; [`ViaductSchema::filter`] preserves this.
#[derive(Clone, Debug)]
pub struct ViaductSchema {
    pub(crate) types: FnvHashMap<ArcStr, TypeDef>,
    pub(crate) query_type_name: ArcStr,
    pub(crate) mutation_type_name: Option<ArcStr>,
    pub(crate) directives: FnvHashMap<ArcStr, DirectiveMeta>,
    pub(crate) digest: u64,
}

impl ViaductSchema {
    /// Looks up any type definition by name.
    pub fn type_def(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    /// Looks up an object type by name.
    pub fn object(&self, name: &str) -> Option<&ObjectMeta> {
        match self.types.get(name) {
            Some(TypeDef::Object(m)) => Some(m),
            _ => None,
        }
    }

    /// Looks up an interface type by name.
    pub fn interface(&self, name: &str) -> Option<&crate::schema::meta::InterfaceMeta> {
        match self.types.get(name) {
            Some(TypeDef::Interface(m)) => Some(m),
            _ => None,
        }
    }

    /// Looks up a union type by name.
    pub fn union_def(&self, name: &str) -> Option<&crate::schema::meta::UnionMeta> {
        match self.types.get(name) {
            Some(TypeDef::Union(m)) => Some(m),
            _ => None,
        }
    }

    /// Looks up an enum type by name.
    pub fn enum_def(&self, name: &str) -> Option<&crate::schema::meta::EnumMeta> {
        match self.types.get(name) {
            Some(TypeDef::Enum(m)) => Some(m),
            _ => None,
        }
    }

    /// Looks up an input object type by name.
    pub fn input_object(&self, name: &str) -> Option<&crate::schema::meta::InputObjectMeta> {
        match self.types.get(name) {
            Some(TypeDef::InputObject(m)) => Some(m),
            _ => None,
        }
    }

    /// Looks up a scalar type by name.
    pub fn scalar(&self, name: &str) -> Option<&ScalarMeta> {
        match self.types.get(name) {
            Some(TypeDef::Scalar(m)) => Some(m),
            _ => None,
        }
    }

    /// Name of the `Query` root type.
    pub fn query_type_name(&self) -> &ArcStr {
        &self.query_type_name
    }

    /// Name of the `Mutation` root type, if the schema has one.
    pub fn mutation_type_name(&self) -> Option<&ArcStr> {
        self.mutation_type_name.as_ref()
    }

    /// Content digest of this schema, stable across identical builds. Part of
    /// every plan-cache key.
    pub fn digest(&self) -> u64 {
        self.digest
    }

    /// Looks up a directive definition by name.
    pub fn directive(&self, name: &str) -> Option<&DirectiveMeta> {
        self.directives.get(name)
    }

    /// Looks up a field on a composite type, searching the object or
    /// interface's own declarations.
    pub fn field_of(&self, type_name: &str, field_name: &str) -> Option<&FieldMeta> {
        self.types.get(type_name)?.field_by_name(field_name)
    }

    /// The set of object types a selection on `composite` can concretely
    /// produce.
    pub fn possible_objects(&self, composite: &str) -> Vec<&ObjectMeta> {
        match self.types.get(composite) {
            Some(TypeDef::Object(m)) => vec![m],
            Some(TypeDef::Interface(iface)) => self
                .types
                .values()
                .filter_map(|t| match t {
                    TypeDef::Object(m)
                        if m.interface_names.iter().any(|i| *i == iface.name) =>
                    {
                        Some(m)
                    }
                    _ => None,
                })
                .collect(),
            Some(TypeDef::Union(u)) => u
                .of_type_names
                .iter()
                .filter_map(|n| self.object(n))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Whether a fragment conditioned on `fragment_type` can apply to values
    /// of `parent`: their possible object sets overlap.
    pub fn is_spreadable(&self, parent: &str, fragment_type: &str) -> bool {
        if parent == fragment_type {
            return true;
        }
        let parents = self.possible_objects(parent);
        self.possible_objects(fragment_type)
            .iter()
            .any(|cand| parents.iter().any(|p| p.name == cand.name))
    }

    /// Whether values typed `object_name` are selectable through a fragment
    /// conditioned on `condition`.
    pub fn object_matches_condition(&self, object_name: &str, condition: &str) -> bool {
        if object_name == condition {
            return true;
        }
        self.possible_objects(condition)
            .iter()
            .any(|m| m.name == object_name)
    }

    /// Every object type carrying a stable global identity.
    pub fn node_implementors(&self) -> Vec<&ObjectMeta> {
        self.types
            .values()
            .filter_map(|t| match t {
                TypeDef::Object(m) if m.is_node() => Some(m),
                _ => None,
            })
            .collect()
    }
}

/// The built-in scalar set every schema starts from.
pub(crate) fn built_in_scalars() -> Vec<ScalarMeta> {
    vec![
        ScalarMeta::new("String", coercion::string),
        ScalarMeta::new("Int", coercion::int),
        ScalarMeta::new("Float", coercion::float),
        ScalarMeta::new("Boolean", coercion::boolean),
        ScalarMeta::new("ID", coercion::string),
        ScalarMeta::new("Long", coercion::long),
        ScalarMeta::new("Short", coercion::short),
        ScalarMeta::new("Date", coercion::date),
        ScalarMeta::new("DateTime", coercion::datetime),
        ScalarMeta::new("BigDecimal", coercion::big_decimal),
        ScalarMeta::new("BigInteger", coercion::big_integer),
        ScalarMeta::new("JSON", coercion::json),
    ]
}

fn arg(name: &str, arg_type: TypeExpr) -> ArgumentMeta {
    ArgumentMeta {
        name: name.into(),
        description: None,
        arg_type,
        default_value: None,
        id_of: None,
        directives: Vec::new(),
    }
}

/// The directive definitions every schema carries: the Viaduct core
/// directives plus the executable `@skip`/`@include`/`@deprecated` set.
pub(crate) fn built_in_directives() -> Vec<DirectiveMeta> {
    use DirectiveLocation::*;

    vec![
        DirectiveMeta {
            name: "resolver".into(),
            description: None,
            locations: vec![FieldDefinition, Object],
            arguments: vec![],
            repeatable: false,
        },
        DirectiveMeta {
            name: "backingData".into(),
            description: None,
            locations: vec![FieldDefinition],
            arguments: vec![arg("class", TypeExpr::named("String", false))],
            repeatable: false,
        },
        DirectiveMeta {
            name: "scope".into(),
            description: None,
            locations: vec![
                Object,
                Interface,
                Union,
                Enum,
                InputObject,
                FieldDefinition,
                EnumValue,
            ],
            arguments: vec![arg(
                "to",
                TypeExpr::named("String", false).wrap_list(false),
            )],
            repeatable: true,
        },
        DirectiveMeta {
            name: "idOf".into(),
            description: None,
            locations: vec![FieldDefinition, InputFieldDefinition, ArgumentDefinition],
            arguments: vec![arg("type", TypeExpr::named("String", false))],
            repeatable: false,
        },
        DirectiveMeta {
            name: "oneOf".into(),
            description: None,
            locations: vec![InputObject],
            arguments: vec![],
            repeatable: false,
        },
        DirectiveMeta {
            name: "skip".into(),
            description: None,
            locations: vec![Field, FragmentSpread, InlineFragment],
            arguments: vec![arg("if", TypeExpr::named("Boolean", false))],
            repeatable: false,
        },
        DirectiveMeta {
            name: "include".into(),
            description: None,
            locations: vec![Field, FragmentSpread, InlineFragment],
            arguments: vec![arg("if", TypeExpr::named("Boolean", false))],
            repeatable: false,
        },
        DirectiveMeta {
            name: "deprecated".into(),
            description: None,
            locations: vec![FieldDefinition, EnumValue],
            arguments: vec![arg("reason", TypeExpr::named("String", true))],
            repeatable: false,
        },
    ]
}
