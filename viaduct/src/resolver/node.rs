//! The engine-provided resolvers behind `node(id:)` and `nodes(ids:)`.

use async_trait::async_trait;

use crate::{
    executor::{ErrorKind, FieldError, FieldExecutionContext, FieldResult},
    global_id::GlobalId,
    resolver::FieldResolver,
    value::ResolvedValue,
};

/// `Query.node(id: ID!): Node` — decodes the global ID into a typed node
/// reference. The node's own resolver runs lazily, once a selection beyond
/// `id` is traversed.
pub(crate) struct NodeFieldResolver;

/// `Query.nodes(ids: [ID!]!): [Node]!` — the list form; an undecodable entry
/// fails that element only.
pub(crate) struct NodesFieldResolver;

fn decode(ctx: &FieldExecutionContext, token: &str) -> FieldResult<GlobalId> {
    let id = ctx
        .global_id_codec()
        .deserialize(token)
        .map_err(|e| FieldError::new(e, ErrorKind::InvalidGlobalId))?;
    let is_node = ctx
        .schema()
        .object(&id.type_name)
        .is_some_and(|o| o.is_node());
    if !is_node {
        return Err(FieldError::new(
            format!("\"{}\" is not a node type", id.type_name),
            ErrorKind::InvalidGlobalId,
        ));
    }
    Ok(id)
}

#[async_trait]
impl FieldResolver for NodeFieldResolver {
    async fn resolve(&self, ctx: &FieldExecutionContext) -> FieldResult<ResolvedValue> {
        let token = ctx
            .args()
            .get_str("id")
            .ok_or_else(|| FieldError::new("Missing \"id\" argument", ErrorKind::Validation))?;
        Ok(ResolvedValue::NodeRef(decode(ctx, token)?))
    }
}

#[async_trait]
impl FieldResolver for NodesFieldResolver {
    async fn resolve(&self, ctx: &FieldExecutionContext) -> FieldResult<ResolvedValue> {
        let ids = ctx
            .args()
            .get("ids")
            .and_then(|v| v.as_list())
            .ok_or_else(|| FieldError::new("Missing \"ids\" argument", ErrorKind::Validation))?;

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(token) = id.as_str() else {
                out.push(ResolvedValue::Null);
                continue;
            };
            match decode(ctx, token) {
                Ok(gid) => out.push(ResolvedValue::NodeRef(gid)),
                Err(e) => {
                    // Surface the bad entry without failing its siblings.
                    ctx.push_error(e);
                    out.push(ResolvedValue::Null);
                }
            }
        }
        Ok(ResolvedValue::List(out))
    }
}
