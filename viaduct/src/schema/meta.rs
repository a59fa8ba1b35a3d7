//! Types used to describe a Viaduct schema.

use arcstr::ArcStr;
use indexmap::IndexMap;

use crate::{ast::InputValue, schema::type_expr::TypeExpr, value::ScalarValue};

/// Shortcut for a scalar wire-format validation function.
pub type ScalarParseFn = fn(&ScalarValue) -> Result<(), String>;

/// Whether an item is deprecated, with context.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum DeprecationStatus {
    /// The field/variant is not deprecated.
    #[default]
    Current,
    /// The field/variant is deprecated, with an optional reason.
    Deprecated(Option<ArcStr>),
}

/// A directive as applied at some schema position, with its argument literals.
#[derive(Clone, Debug, PartialEq)]
pub struct AppliedDirective {
    pub name: ArcStr,
    pub arguments: IndexMap<ArcStr, InputValue>,
}

impl AppliedDirective {
    /// The string-list value of the given argument, if present.
    pub(crate) fn string_list_argument(&self, name: &str) -> Vec<ArcStr> {
        match self.arguments.get(name) {
            Some(InputValue::List(items)) => items
                .iter()
                .filter_map(|v| v.item.as_scalar().and_then(ScalarValue::as_str))
                .map(ArcStr::from)
                .collect(),
            Some(InputValue::Scalar(s)) => {
                s.as_str().map(ArcStr::from).into_iter().collect()
            }
            _ => Vec::new(),
        }
    }

    /// The string value of the given argument, if present.
    pub(crate) fn string_argument(&self, name: &str) -> Option<ArcStr> {
        self.arguments
            .get(name)?
            .as_scalar()
            .and_then(ScalarValue::as_str)
            .map(ArcStr::from)
    }
}

/// Metadata for an argument to a field, or an input object field.
#[derive(Clone, Debug)]
pub struct ArgumentMeta {
    pub name: ArcStr,
    pub description: Option<ArcStr>,
    pub arg_type: TypeExpr,
    pub default_value: Option<InputValue>,
    /// Set when the argument carries `@idOf(type:)`: incoming `ID` strings are
    /// decoded into typed global IDs before the resolver sees them.
    pub id_of: Option<ArcStr>,
    pub directives: Vec<AppliedDirective>,
}

/// Metadata for a field of an object or interface.
#[derive(Clone, Debug)]
pub struct FieldMeta {
    pub name: ArcStr,
    pub description: Option<ArcStr>,
    pub arguments: Vec<ArgumentMeta>,
    pub field_type: TypeExpr,
    pub deprecation_status: DeprecationStatus,
    pub directives: Vec<AppliedDirective>,
    /// `@resolver` on the field itself.
    pub has_resolver: bool,
    /// `@idOf(type:)` on the field.
    pub id_of: Option<ArcStr>,
    /// `@backingData(class:)` hint, carried through for the codegen layer.
    pub backing_data: Option<ArcStr>,
    /// `@scope(to:)` visibility labels; empty means visible everywhere.
    pub scopes: Vec<ArcStr>,
}

impl FieldMeta {
    pub fn argument(&self, name: &str) -> Option<&ArgumentMeta> {
        self.arguments.iter().find(|a| a.name == name)
    }
}

/// Object type metadata.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    pub name: ArcStr,
    pub description: Option<ArcStr>,
    pub fields: Vec<FieldMeta>,
    pub interface_names: Vec<ArcStr>,
    /// Object-level `@resolver`: the object is a node and requires a node
    /// resolver.
    pub has_resolver: bool,
    pub scopes: Vec<ArcStr>,
    pub directives: Vec<AppliedDirective>,
}

impl ObjectMeta {
    pub fn field_by_name(&self, name: &str) -> Option<&FieldMeta> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether this object carries a stable global identity.
    pub fn is_node(&self) -> bool {
        self.has_resolver || self.interface_names.iter().any(|i| i == "Node")
    }
}

/// Interface type metadata.
#[derive(Clone, Debug)]
pub struct InterfaceMeta {
    pub name: ArcStr,
    pub description: Option<ArcStr>,
    pub fields: Vec<FieldMeta>,
    pub interface_names: Vec<ArcStr>,
    pub scopes: Vec<ArcStr>,
    pub directives: Vec<AppliedDirective>,
}

impl InterfaceMeta {
    pub fn field_by_name(&self, name: &str) -> Option<&FieldMeta> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Union type metadata.
#[derive(Clone, Debug)]
pub struct UnionMeta {
    pub name: ArcStr,
    pub description: Option<ArcStr>,
    pub of_type_names: Vec<ArcStr>,
    pub scopes: Vec<ArcStr>,
    pub directives: Vec<AppliedDirective>,
}

/// Metadata for a single value in an enum.
#[derive(Clone, Debug)]
pub struct EnumValueMeta {
    pub name: ArcStr,
    pub description: Option<ArcStr>,
    pub deprecation_status: DeprecationStatus,
    pub scopes: Vec<ArcStr>,
}

/// Enum type metadata.
#[derive(Clone, Debug)]
pub struct EnumMeta {
    pub name: ArcStr,
    pub description: Option<ArcStr>,
    pub values: Vec<EnumValueMeta>,
    pub scopes: Vec<ArcStr>,
    pub directives: Vec<AppliedDirective>,
}

impl EnumMeta {
    pub fn has_value(&self, name: &str) -> bool {
        self.values.iter().any(|v| v.name == name)
    }
}

/// Input object metadata.
#[derive(Clone, Debug)]
pub struct InputObjectMeta {
    pub name: ArcStr,
    pub description: Option<ArcStr>,
    pub input_fields: Vec<ArgumentMeta>,
    /// `@oneOf`: exactly one field must be set, and every field is nullable.
    pub one_of: bool,
    pub scopes: Vec<ArcStr>,
    pub directives: Vec<AppliedDirective>,
}

impl InputObjectMeta {
    pub fn field_by_name(&self, name: &str) -> Option<&ArgumentMeta> {
        self.input_fields.iter().find(|f| f.name == name)
    }
}

/// Scalar type metadata.
#[derive(Clone)]
pub struct ScalarMeta {
    pub name: ArcStr,
    pub description: Option<ArcStr>,
    pub(crate) try_parse_fn: ScalarParseFn,
}

impl std::fmt::Debug for ScalarMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScalarMeta")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl ScalarMeta {
    pub fn new(name: impl Into<ArcStr>, try_parse_fn: ScalarParseFn) -> Self {
        Self {
            name: name.into(),
            description: None,
            try_parse_fn,
        }
    }

    /// Validates a scalar value's wire form against this scalar.
    pub fn try_parse(&self, value: &ScalarValue) -> Result<(), String> {
        (self.try_parse_fn)(value)
    }
}

/// Generic type metadata.
#[derive(Clone, Debug)]
pub enum TypeDef {
    Scalar(ScalarMeta),
    Object(ObjectMeta),
    Interface(InterfaceMeta),
    Union(UnionMeta),
    Enum(EnumMeta),
    InputObject(InputObjectMeta),
}

impl TypeDef {
    /// The name of the type.
    pub fn name(&self) -> &ArcStr {
        match self {
            Self::Scalar(m) => &m.name,
            Self::Object(m) => &m.name,
            Self::Interface(m) => &m.name,
            Self::Union(m) => &m.name,
            Self::Enum(m) => &m.name,
            Self::InputObject(m) => &m.name,
        }
    }

    /// The `@scope(to:)` labels of the type.
    pub fn scopes(&self) -> &[ArcStr] {
        match self {
            Self::Scalar(_) => &[],
            Self::Object(m) => &m.scopes,
            Self::Interface(m) => &m.scopes,
            Self::Union(m) => &m.scopes,
            Self::Enum(m) => &m.scopes,
            Self::InputObject(m) => &m.scopes,
        }
    }

    /// Whether selection sets can be applied to the type.
    pub fn is_composite(&self) -> bool {
        matches!(self, Self::Object(_) | Self::Interface(_) | Self::Union(_))
    }

    /// Whether the type is abstract (needs type narrowing).
    pub fn is_abstract(&self) -> bool {
        matches!(self, Self::Interface(_) | Self::Union(_))
    }

    /// Whether the type can appear in input positions.
    pub fn is_input(&self) -> bool {
        matches!(
            self,
            Self::Scalar(_) | Self::Enum(_) | Self::InputObject(_)
        )
    }

    /// Whether values of the type are leaves of the response tree.
    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Scalar(_) | Self::Enum(_))
    }

    /// Looks up a field on an object or interface type.
    pub fn field_by_name(&self, name: &str) -> Option<&FieldMeta> {
        match self {
            Self::Object(m) => m.field_by_name(name),
            Self::Interface(m) => m.field_by_name(name),
            _ => None,
        }
    }
}

/// Declared positions a directive may be applied at.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DirectiveLocation {
    Query,
    Mutation,
    Field,
    FragmentDefinition,
    FragmentSpread,
    InlineFragment,
    VariableDefinition,
    Schema,
    Scalar,
    Object,
    FieldDefinition,
    ArgumentDefinition,
    Interface,
    Union,
    Enum,
    EnumValue,
    InputObject,
    InputFieldDefinition,
}

impl DirectiveLocation {
    pub(crate) fn from_sdl_name(name: &str) -> Option<Self> {
        Some(match name {
            "QUERY" => Self::Query,
            "MUTATION" => Self::Mutation,
            "FIELD" => Self::Field,
            "FRAGMENT_DEFINITION" => Self::FragmentDefinition,
            "FRAGMENT_SPREAD" => Self::FragmentSpread,
            "INLINE_FRAGMENT" => Self::InlineFragment,
            "VARIABLE_DEFINITION" => Self::VariableDefinition,
            "SCHEMA" => Self::Schema,
            "SCALAR" => Self::Scalar,
            "OBJECT" => Self::Object,
            "FIELD_DEFINITION" => Self::FieldDefinition,
            "ARGUMENT_DEFINITION" => Self::ArgumentDefinition,
            "INTERFACE" => Self::Interface,
            "UNION" => Self::Union,
            "ENUM" => Self::Enum,
            "ENUM_VALUE" => Self::EnumValue,
            "INPUT_OBJECT" => Self::InputObject,
            "INPUT_FIELD_DEFINITION" => Self::InputFieldDefinition,
            _ => return None,
        })
    }
}

/// A directive definition.
#[derive(Clone, Debug)]
pub struct DirectiveMeta {
    pub name: ArcStr,
    pub description: Option<ArcStr>,
    pub locations: Vec<DirectiveLocation>,
    pub arguments: Vec<ArgumentMeta>,
    pub repeatable: bool,
}

impl DirectiveMeta {
    pub fn allows(&self, location: DirectiveLocation) -> bool {
        self.locations.contains(&location)
    }
}
