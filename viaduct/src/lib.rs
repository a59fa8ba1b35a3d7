#![cfg_attr(docsrs, feature(doc_cfg))]
//! Viaduct is a schema-driven GraphQL execution engine.
//!
//! Resolvers declare the selection sets they need from their parent and the
//! query root; the engine settles those before a resolver runs, batches
//! sibling resolutions through one `batch_resolve` call, memoizes field
//! results per request, and lets resolvers issue sub-selections against the
//! same live request instead of re-executing documents.

pub mod access;
mod ast;
pub mod executor;
mod global_id;
pub mod instrumentation;
pub mod parser;
pub mod plan;
pub mod resolver;
pub(crate) mod schema;
mod selections;
mod service;
pub mod validation;
mod value;

#[cfg(test)]
mod executor_tests;

use derive_more::with_trait::{Display, Error, From};

pub use crate::{
    ast::{
        Arguments, Definition, Directive, Document, Field, FragmentDefinition, FragmentSpread,
        InlineFragment, InputValue, Name, Operation, OperationKind, Selection, TypeLiteral,
    },
    executor::{
        ArgumentValues, CancellationToken, ConstValue, EngineExecutionContext, EngineObjectData,
        ErrorKind, ExecutionError, ExecutionHandle, FieldError, FieldExecutionContext,
        FieldResult, NodeExecutionContext, PathSegment, SubqueryExecutionException,
        SubqueryOptions, Variables, execute_selection_set,
    },
    global_id::{
        Base64GlobalIdCodec, GlobalId, GlobalIdCodec, InvalidGlobalId, SharedGlobalIdCodec,
    },
    parser::{ParseError, Span, Spanning},
    plan::{FieldStep, PlanCache, PlanError, PlanOperation, QueryPlan},
    resolver::{
        BatchFieldResolver, Coordinate, FieldResolver, FieldResolverDescriptor, NodeResolver,
        NodeResolverDescriptor, ResolverRegistry, TenantBootstrapper, VariableBinding,
        VariablesProvider,
    },
    schema::{
        FilterTarget, InvalidSchema, SchemaError, SchemaOptions, TypeExpr, ViaductSchema,
        build_schema, meta,
    },
    selections::{RawSelectionSet, RequiredSelectionsAreInvalid},
    service::{
        ENABLE_SUBQUERY_EXECUTION_VIA_HANDLE, EXECUTE_ACCESS_CHECKS_IN_MODSTRAT, ExecutionInput,
        ExecutionResponse, FlagManager, PersistedQueryLookup, Viaduct, ViaductBuilder,
    },
    validation::{RuleError, validate_document},
    value::{
        BackingMap, DataValue, Object, ResolvedValue, ScalarValue, Value, coercion,
    },
};

/// A configuration or bootstrap failure. Fatal: startup aborts.
#[derive(Debug, Display, Error, From)]
pub enum GraphQLBuildError {
    /// The schema failed validation.
    InvalidSchema(InvalidSchema),

    /// Two resolvers target the same field coordinate.
    #[display("Duplicate resolver for \"{coordinate}\"")]
    #[from(ignore)]
    DuplicateResolver {
        #[error(not(source))]
        coordinate: Coordinate,
    },

    /// Two node resolvers target the same type.
    #[display("Duplicate node resolver for \"{type_name}\"")]
    #[from(ignore)]
    DuplicateNodeResolver {
        #[error(not(source))]
        type_name: arcstr::ArcStr,
    },

    /// A descriptor declares both `resolve` and `batch_resolve`.
    #[display("Resolver for \"{coordinate}\" declares both resolve and batchResolve")]
    #[from(ignore)]
    AmbiguousResolver {
        #[error(not(source))]
        coordinate: Coordinate,
    },

    /// A descriptor declares neither capability.
    #[display("Resolver for \"{coordinate}\" declares neither resolve nor batchResolve")]
    #[from(ignore)]
    MissingCapability {
        #[error(not(source))]
        coordinate: Coordinate,
    },

    /// A required selection set failed validation.
    #[display("Required selections of \"{coordinate}\" are invalid: {source}")]
    #[from(ignore)]
    RequiredSelectionsAreInvalid {
        coordinate: Coordinate,
        source: RequiredSelectionsAreInvalid,
    },

    /// A scalar query-root field has no resolver.
    #[display("Query field \"{field_name}\" has no resolver")]
    #[from(ignore)]
    MissingQueryResolver {
        #[error(not(source))]
        field_name: Name,
    },

    /// A node-marked object has no node resolver.
    #[display("Node type \"{type_name}\" has no node resolver")]
    #[from(ignore)]
    MissingNodeResolver {
        #[error(not(source))]
        type_name: arcstr::ArcStr,
    },

    /// A plan could not be built at bootstrap.
    Plan(PlanError),

    /// Any other configuration failure.
    #[display("Configuration error: {_0}")]
    #[from(ignore)]
    Configuration(#[error(not(source))] String),
}
