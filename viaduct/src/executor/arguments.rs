//! Execution-time argument coercion: canonical argument records with
//! variables substituted, schema defaults applied, and `@idOf` IDs decoded.

use std::fmt;

use arcstr::ArcStr;
use indexmap::IndexMap;

use crate::{
    ast::{InputValue, Name},
    executor::{
        Variables,
        error::{ErrorKind, FieldError, FieldResult},
    },
    global_id::{GlobalId, GlobalIdCodec},
    plan::PlannedArgument,
    schema::{TypeExpr, ViaductSchema, meta::TypeDef},
    value::ScalarValue,
};

/// A fully-coerced input value: no variables, defaults applied, global IDs
/// decoded.
#[derive(Clone, Debug, PartialEq)]
pub enum ConstValue {
    Null,
    Scalar(ScalarValue),
    Enum(Name),
    List(Vec<ConstValue>),
    Object(IndexMap<Name, ConstValue>),
    GlobalId(GlobalId),
}

impl ConstValue {
    /// Does this value represent null?
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// View the underlying scalar, if present.
    pub fn as_scalar(&self) -> Option<&ScalarValue> {
        match self {
            Self::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// View the underlying string, if present.
    pub fn as_str(&self) -> Option<&str> {
        self.as_scalar().and_then(ScalarValue::as_str)
    }

    /// View the underlying `i32`, if present.
    pub fn as_int(&self) -> Option<i32> {
        self.as_scalar().and_then(ScalarValue::as_int)
    }

    /// View the underlying boolean, if present.
    pub fn as_boolean(&self) -> Option<bool> {
        self.as_scalar().and_then(ScalarValue::as_boolean)
    }

    /// View the underlying decoded global ID, if present.
    pub fn as_global_id(&self) -> Option<&GlobalId> {
        match self {
            Self::GlobalId(id) => Some(id),
            _ => None,
        }
    }

    /// View the underlying list, if present.
    pub fn as_list(&self) -> Option<&[ConstValue]> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    /// Converts back into an [`InputValue`], e.g. to feed sub-selection
    /// variables. Decoded global IDs re-encode through `codec`.
    pub fn to_input_value(&self, codec: &dyn GlobalIdCodec) -> InputValue {
        match self {
            Self::Null => InputValue::Null,
            Self::Scalar(s) => InputValue::Scalar(s.clone()),
            Self::Enum(e) => InputValue::Enum(e.clone()),
            Self::List(l) => {
                InputValue::list(l.iter().map(|v| v.to_input_value(codec)).collect())
            }
            Self::Object(o) => InputValue::object(
                o.iter()
                    .map(|(k, v)| (k.clone(), v.to_input_value(codec)))
                    .collect(),
            ),
            Self::GlobalId(id) => InputValue::scalar(codec.serialize(id)),
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Scalar(s) => write!(f, "{s}"),
            Self::Enum(e) => write!(f, "{e}"),
            Self::List(l) => {
                write!(f, "[")?;
                for (i, v) in l.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Self::Object(o) => {
                write!(f, "{{")?;
                for (i, (k, v)) in o.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{k}:{v}")?;
                }
                write!(f, "}}")
            }
            Self::GlobalId(id) => write!(f, "gid({id})"),
        }
    }
}

/// The canonical, coerced argument record a resolver receives.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ArgumentValues {
    values: IndexMap<ArcStr, ConstValue>,
}

impl ArgumentValues {
    pub(crate) fn new(values: IndexMap<ArcStr, ConstValue>) -> Self {
        Self { values }
    }

    /// The coerced value of `name`, if supplied or defaulted.
    pub fn get(&self, name: &str) -> Option<&ConstValue> {
        self.values.get(name)
    }

    /// Shorthand for a string argument.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ConstValue::as_str)
    }

    /// Shorthand for an `Int` argument.
    pub fn get_int(&self, name: &str) -> Option<i32> {
        self.get(name).and_then(ConstValue::as_int)
    }

    /// Shorthand for a decoded `@idOf` argument.
    pub fn get_global_id(&self, name: &str) -> Option<&GlobalId> {
        self.get(name).and_then(ConstValue::as_global_id)
    }

    /// Iterates arguments in canonical (schema) order.
    pub fn iter(&self) -> impl Iterator<Item = (&ArcStr, &ConstValue)> {
        self.values.iter()
    }

    /// Number of present arguments.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no argument is present.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The equivalence-class key used to group batched invocations: two
    /// records with equal keys are the same argument record.
    pub fn canonical_key(&self) -> String {
        use std::fmt::Write as _;
        let mut out = String::new();
        for (name, value) in &self.values {
            let _ = write!(out, "{name}={value};");
        }
        out
    }
}

/// Coerces a planned argument record against the request `variables`.
pub(crate) fn coerce_arguments(
    schema: &ViaductSchema,
    codec: &dyn GlobalIdCodec,
    planned: &[PlannedArgument],
    variables: &Variables,
) -> FieldResult<ArgumentValues> {
    let mut values = IndexMap::with_capacity(planned.len());
    for arg in planned {
        let resolved = arg
            .value
            .clone()
            .into_const(variables)
            .unwrap_or(InputValue::Null);
        let value = coerce_input(schema, codec, &arg.arg_type, resolved, arg.id_of.as_ref())?;
        values.insert(arg.name.clone(), value);
    }
    Ok(ArgumentValues::new(values))
}

/// Coerces one input value against its declared type expression.
pub(crate) fn coerce_input(
    schema: &ViaductSchema,
    codec: &dyn GlobalIdCodec,
    expr: &TypeExpr,
    value: InputValue,
    id_of: Option<&ArcStr>,
) -> FieldResult<ConstValue> {
    if value.is_null() {
        return if expr.is_nullable() {
            Ok(ConstValue::Null)
        } else {
            Err(FieldError::new(
                format!("Null provided for non-nullable type \"{expr}\""),
                ErrorKind::Validation,
            ))
        };
    }

    if expr.is_list() {
        let inner = expr.unwrap_list();
        return match value {
            InputValue::List(items) => {
                let coerced: FieldResult<Vec<ConstValue>> = items
                    .into_iter()
                    .map(|item| coerce_input(schema, codec, &inner, item.item, id_of))
                    .collect();
                Ok(ConstValue::List(coerced?))
            }
            // A single value coerces to a one-element list.
            other => Ok(ConstValue::List(vec![coerce_input(
                schema, codec, &inner, other, id_of,
            )?])),
        };
    }

    match schema.type_def(expr.base()) {
        Some(TypeDef::Scalar(meta)) => {
            let InputValue::Scalar(scalar) = value else {
                return Err(FieldError::new(
                    format!("Expected a \"{}\" scalar value", meta.name),
                    ErrorKind::Validation,
                ));
            };
            meta.try_parse(&scalar)
                .map_err(|m| FieldError::new(m, ErrorKind::Validation))?;
            if let Some(node_type) = id_of {
                let token = scalar.as_str().ok_or_else(|| {
                    FieldError::new("Expected an ID string", ErrorKind::Validation)
                })?;
                let id = codec
                    .deserialize(token)
                    .map_err(|e| FieldError::new(e, ErrorKind::InvalidGlobalId))?;
                if id.type_name != *node_type {
                    return Err(FieldError::new(
                        format!(
                            "Global ID of type \"{}\" provided where \"{node_type}\" is required",
                            id.type_name,
                        ),
                        ErrorKind::InvalidGlobalId,
                    ));
                }
                return Ok(ConstValue::GlobalId(id));
            }
            Ok(ConstValue::Scalar(scalar))
        }
        Some(TypeDef::Enum(meta)) => {
            let name = match &value {
                InputValue::Enum(n) => Some(n.as_str()),
                InputValue::Scalar(ScalarValue::String(s)) => Some(s.as_str()),
                _ => None,
            };
            let name = name.ok_or_else(|| {
                FieldError::new(
                    format!("Expected a \"{}\" enum value", meta.name),
                    ErrorKind::Validation,
                )
            })?;
            if !meta.has_value(name) {
                return Err(FieldError::new(
                    format!("\"{name}\" is not a value of enum \"{}\"", meta.name),
                    ErrorKind::Validation,
                ));
            }
            Ok(ConstValue::Enum(Name::from(name)))
        }
        Some(TypeDef::InputObject(meta)) => {
            let InputValue::Object(fields) = value else {
                return Err(FieldError::new(
                    format!("Expected an input object of type \"{}\"", meta.name),
                    ErrorKind::Validation,
                ));
            };

            for (key, _) in &fields {
                if meta.field_by_name(&key.item).is_none() {
                    return Err(FieldError::new(
                        format!(
                            "Unknown field \"{}\" on input object \"{}\"",
                            key.item, meta.name,
                        ),
                        ErrorKind::Validation,
                    ));
                }
            }

            let mut out = IndexMap::with_capacity(meta.input_fields.len());
            for decl in &meta.input_fields {
                let supplied = fields
                    .iter()
                    .find(|(k, _)| k.item.as_str() == decl.name.as_str())
                    .map(|(_, v)| v.item.clone());
                let value = match supplied {
                    Some(v) => v,
                    None => match &decl.default_value {
                        Some(d) => d.clone(),
                        None if decl.arg_type.is_nullable() => continue,
                        None => {
                            return Err(FieldError::new(
                                format!(
                                    "Missing required field \"{}\" on input object \"{}\"",
                                    decl.name, meta.name,
                                ),
                                ErrorKind::Validation,
                            ));
                        }
                    },
                };
                let coerced = coerce_input(
                    schema,
                    codec,
                    &decl.arg_type,
                    value,
                    decl.id_of.as_ref(),
                )?;
                out.insert(Name::from(decl.name.as_str()), coerced);
            }

            if meta.one_of {
                let set = out.values().filter(|v| !v.is_null()).count();
                if set != 1 {
                    return Err(FieldError::new(
                        format!(
                            "@oneOf input \"{}\" requires exactly one field, got {set}",
                            meta.name,
                        ),
                        ErrorKind::Validation,
                    ));
                }
            }

            Ok(ConstValue::Object(out))
        }
        _ => Err(FieldError::new(
            format!("\"{}\" is not an input type", expr.base()),
            ErrorKind::Validation,
        )),
    }
}
