//! Predicate-based schema filtering.
//!
//! A filtered schema is how a request sees a scope-restricted view of the
//! full schema: rejected types and fields disappear, and anything left
//! dangling by their removal is pruned until the schema is closed again.

use std::{collections::HashSet, hash::Hasher as _};

use arcstr::ArcStr;

use crate::schema::{
    meta::{EnumValueMeta, FieldMeta, TypeDef},
    model::ViaductSchema,
};

/// One candidate item presented to a filter predicate.
#[derive(Clone, Copy, Debug)]
pub enum FilterTarget<'a> {
    /// A named type definition.
    Type(&'a TypeDef),
    /// A field of the named object or interface type.
    Field(&'a ArcStr, &'a FieldMeta),
    /// A value of the named enum type.
    EnumValue(&'a ArcStr, &'a EnumValueMeta),
}

impl ViaductSchema {
    /// Produces the sub-schema this predicate accepts.
    ///
    /// Removal cascades: a field whose type was rejected goes with it, a
    /// `@oneOf`-style required input field takes its whole input object, an
    /// object left without fields disappears. The result is closed; the query
    /// root always survives.
    pub fn filter<F>(&self, predicate: F) -> ViaductSchema
    where
        F: Fn(FilterTarget<'_>) -> bool,
    {
        let mut kept: HashSet<ArcStr> = self
            .types
            .values()
            .filter(|t| *t.name() == self.query_type_name || predicate(FilterTarget::Type(t)))
            .map(|t| t.name().clone())
            .collect();

        // Dropping a type can orphan fields elsewhere, which can drop more
        // types. Iterate until stable.
        loop {
            let mut changed = false;

            for t in self.types.values() {
                if !kept.contains(t.name()) {
                    continue;
                }
                let closed = match t {
                    TypeDef::Object(m) => m
                        .fields
                        .iter()
                        .any(|f| field_survives(&kept, &m.name, f, &predicate)),
                    TypeDef::Interface(m) => m
                        .fields
                        .iter()
                        .any(|f| field_survives(&kept, &m.name, f, &predicate)),
                    TypeDef::Union(m) => {
                        m.of_type_names.iter().any(|n| kept.contains(n))
                    }
                    TypeDef::Enum(m) => m
                        .values
                        .iter()
                        .any(|v| predicate(FilterTarget::EnumValue(&m.name, v))),
                    TypeDef::InputObject(m) => m.input_fields.iter().all(|f| {
                        kept.contains(f.arg_type.base())
                            || f.arg_type.is_nullable()
                            || f.default_value.is_some()
                    }),
                    TypeDef::Scalar(_) => true,
                };

                if !closed && *t.name() != self.query_type_name {
                    kept.remove(t.name());
                    changed = true;
                }
            }

            if !changed {
                break;
            }
        }

        let mut types = fnv::FnvHashMap::default();
        for t in self.types.values() {
            if !kept.contains(t.name()) {
                continue;
            }
            let rebuilt = match t {
                TypeDef::Object(m) => {
                    let mut m = m.clone();
                    let name = m.name.clone();
                    m.fields
                        .retain(|f| field_survives(&kept, &name, f, &predicate));
                    m.interface_names.retain(|i| kept.contains(i));
                    TypeDef::Object(m)
                }
                TypeDef::Interface(m) => {
                    let mut m = m.clone();
                    let name = m.name.clone();
                    m.fields
                        .retain(|f| field_survives(&kept, &name, f, &predicate));
                    m.interface_names.retain(|i| kept.contains(i));
                    TypeDef::Interface(m)
                }
                TypeDef::Union(m) => {
                    let mut m = m.clone();
                    m.of_type_names.retain(|n| kept.contains(n));
                    TypeDef::Union(m)
                }
                TypeDef::Enum(m) => {
                    let mut m = m.clone();
                    let name = m.name.clone();
                    m.values
                        .retain(|v| predicate(FilterTarget::EnumValue(&name, v)));
                    TypeDef::Enum(m)
                }
                TypeDef::InputObject(m) => {
                    let mut m = m.clone();
                    m.input_fields.retain(|f| kept.contains(f.arg_type.base()));
                    TypeDef::InputObject(m)
                }
                TypeDef::Scalar(m) => TypeDef::Scalar(m.clone()),
            };
            types.insert(t.name().clone(), rebuilt);
        }

        let mutation_type_name = self
            .mutation_type_name
            .clone()
            .filter(|m| types.contains_key(m));

        let digest = derive_digest(self.digest, &types);

        ViaductSchema {
            types,
            query_type_name: self.query_type_name.clone(),
            mutation_type_name,
            directives: self.directives.clone(),
            digest,
        }
    }

    /// The view of this schema visible to the given scope labels.
    ///
    /// An item with no `@scope(to:)` application is visible everywhere; a
    /// scoped item is visible when any of its labels is active.
    pub fn scoped_to(&self, active: &HashSet<String>) -> ViaductSchema {
        let visible = |scopes: &[ArcStr]| {
            scopes.is_empty() || scopes.iter().any(|s| active.contains(s.as_str()))
        };
        self.filter(|target| match target {
            FilterTarget::Type(t) => visible(t.scopes()),
            FilterTarget::Field(_, f) => visible(&f.scopes),
            FilterTarget::EnumValue(_, v) => visible(&v.scopes),
        })
    }
}

fn field_survives<F>(
    kept: &HashSet<ArcStr>,
    type_name: &ArcStr,
    field: &FieldMeta,
    predicate: &F,
) -> bool
where
    F: Fn(FilterTarget<'_>) -> bool,
{
    predicate(FilterTarget::Field(type_name, field))
        && kept.contains(field.field_type.base())
        && field
            .arguments
            .iter()
            .all(|a| kept.contains(a.arg_type.base()))
}

/// A filtered schema's digest mixes the kept shape into the base digest so
/// plans cached for different scoped views never collide.
fn derive_digest(base: u64, types: &fnv::FnvHashMap<ArcStr, TypeDef>) -> u64 {
    let mut names: Vec<String> = types
        .values()
        .map(|t| match t {
            TypeDef::Object(m) => {
                let fields: Vec<&str> = m.fields.iter().map(|f| f.name.as_str()).collect();
                format!("{}({})", m.name, fields.join(","))
            }
            TypeDef::Interface(m) => {
                let fields: Vec<&str> = m.fields.iter().map(|f| f.name.as_str()).collect();
                format!("{}({})", m.name, fields.join(","))
            }
            other => other.name().to_string(),
        })
        .collect();
    names.sort_unstable();

    let mut hasher = fnv::FnvHasher::with_key(base);
    for name in names {
        hasher.write(name.as_bytes());
        hasher.write(&[0]);
    }
    hasher.finish()
}
