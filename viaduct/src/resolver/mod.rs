//! Application-supplied resolvers: the traits tenants implement and the
//! descriptors that bind them to schema coordinates.

pub mod node;
pub mod registry;

use std::{fmt, sync::Arc};

use arcstr::ArcStr;
use async_trait::async_trait;

use crate::{
    executor::{ArgumentValues, FieldExecutionContext, FieldResult, NodeExecutionContext, Variables},
    selections::RawSelectionSet,
    value::ResolvedValue,
};

pub use self::registry::ResolverRegistry;

/// The pair identifying a field resolver target.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Coordinate {
    pub type_name: ArcStr,
    pub field_name: ArcStr,
}

impl Coordinate {
    pub fn new(type_name: impl Into<ArcStr>, field_name: impl Into<ArcStr>) -> Self {
        Self {
            type_name: type_name.into(),
            field_name: field_name.into(),
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.type_name, self.field_name)
    }
}

/// Resolves a single field occurrence.
#[async_trait]
pub trait FieldResolver: Send + Sync {
    async fn resolve(&self, ctx: &FieldExecutionContext) -> FieldResult<ResolvedValue>;
}

/// Resolves a whole group of sibling field occurrences in one call.
///
/// The returned list must align element-wise with `ctxs`; a length mismatch
/// fails every cell in the batch.
#[async_trait]
pub trait BatchFieldResolver: Send + Sync {
    async fn batch_resolve(
        &self,
        ctxs: &[FieldExecutionContext],
    ) -> FieldResult<Vec<FieldResult<ResolvedValue>>>;
}

/// Resolves a node type from its global identity.
#[async_trait]
pub trait NodeResolver: Send + Sync {
    async fn resolve_node(&self, ctx: &NodeExecutionContext) -> FieldResult<ResolvedValue>;
}

/// Computes a resolver's variables dynamically from its coerced arguments.
#[async_trait]
pub trait VariablesProvider: Send + Sync {
    async fn provide(&self, args: &ArgumentValues) -> FieldResult<Variables>;
}

/// Where one declared variable of a required selection set takes its value
/// from at execution time.
#[derive(Clone)]
pub enum VariableSource {
    /// The named coerced argument of the resolved field.
    FromArgument(ArcStr),
    /// A dot-separated path read from the parent object.
    FromObjectField(String),
    /// A dot-separated path read from the query root.
    FromQueryField(String),
    /// A dynamic provider invoked with the coerced arguments.
    Provider(Arc<dyn VariablesProvider>),
}

impl fmt::Debug for VariableSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FromArgument(a) => write!(f, "FromArgument({a})"),
            Self::FromObjectField(p) => write!(f, "FromObjectField({p})"),
            Self::FromQueryField(p) => write!(f, "FromQueryField({p})"),
            Self::Provider(_) => write!(f, "Provider(..)"),
        }
    }
}

/// One declared variable of a resolver's required selection sets.
#[derive(Clone, Debug)]
pub struct VariableBinding {
    pub name: ArcStr,
    pub source: VariableSource,
}

impl VariableBinding {
    pub fn from_argument(name: impl Into<ArcStr>, argument: impl Into<ArcStr>) -> Self {
        Self {
            name: name.into(),
            source: VariableSource::FromArgument(argument.into()),
        }
    }

    pub fn from_object_field(name: impl Into<ArcStr>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: VariableSource::FromObjectField(path.into()),
        }
    }

    pub fn from_query_field(name: impl Into<ArcStr>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: VariableSource::FromQueryField(path.into()),
        }
    }

    pub fn provider(name: impl Into<ArcStr>, provider: Arc<dyn VariablesProvider>) -> Self {
        Self {
            name: name.into(),
            source: VariableSource::Provider(provider),
        }
    }
}

/// Declares one field resolver: its target coordinate, exactly one
/// capability, its required selection sets, and its variable bindings.
#[derive(Clone)]
pub struct FieldResolverDescriptor {
    pub coordinate: Coordinate,
    pub resolve: Option<Arc<dyn FieldResolver>>,
    pub batch_resolve: Option<Arc<dyn BatchFieldResolver>>,
    /// Fragment of the parent object this resolver needs.
    pub object_fragment: Option<RawSelectionSet>,
    /// Fragment of the query root this resolver needs.
    pub query_fragment: Option<RawSelectionSet>,
    pub variables: Vec<VariableBinding>,
    /// A selective resolver manages which of its children to resolve itself.
    pub selective: bool,
}

impl FieldResolverDescriptor {
    /// Starts a descriptor for `Type.field` with no capability set.
    pub fn for_coordinate(type_name: impl Into<ArcStr>, field_name: impl Into<ArcStr>) -> Self {
        Self {
            coordinate: Coordinate::new(type_name, field_name),
            resolve: None,
            batch_resolve: None,
            object_fragment: None,
            query_fragment: None,
            variables: Vec::new(),
            selective: false,
        }
    }

    pub fn resolver(mut self, resolver: Arc<dyn FieldResolver>) -> Self {
        self.resolve = Some(resolver);
        self
    }

    pub fn batch_resolver(mut self, resolver: Arc<dyn BatchFieldResolver>) -> Self {
        self.batch_resolve = Some(resolver);
        self
    }

    pub fn object_fragment(mut self, fragment: RawSelectionSet) -> Self {
        self.object_fragment = Some(fragment);
        self
    }

    pub fn query_fragment(mut self, fragment: RawSelectionSet) -> Self {
        self.query_fragment = Some(fragment);
        self
    }

    pub fn variable(mut self, binding: VariableBinding) -> Self {
        self.variables.push(binding);
        self
    }

    pub fn selective(mut self, selective: bool) -> Self {
        self.selective = selective;
        self
    }
}

/// Declares one node resolver for a node type.
#[derive(Clone)]
pub struct NodeResolverDescriptor {
    pub type_name: ArcStr,
    pub resolver: Arc<dyn NodeResolver>,
}

impl NodeResolverDescriptor {
    pub fn new(type_name: impl Into<ArcStr>, resolver: Arc<dyn NodeResolver>) -> Self {
        Self {
            type_name: type_name.into(),
            resolver,
        }
    }
}

/// A package of resolvers registered at bootstrap.
pub trait TenantBootstrapper: Send + Sync {
    /// The field resolvers this tenant contributes.
    fn field_resolvers(&self) -> Vec<FieldResolverDescriptor> {
        Vec::new()
    }

    /// The node resolvers this tenant contributes.
    fn node_resolvers(&self) -> Vec<NodeResolverDescriptor> {
        Vec::new()
    }
}
