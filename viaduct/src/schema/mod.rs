//! The in-memory typed schema: metadata model, type-expression algebra, SDL
//! building, and scope filtering.

pub mod filter;
pub mod meta;
pub mod model;
pub mod sdl;
pub mod type_expr;

pub use self::{
    filter::FilterTarget,
    model::{InvalidSchema, SchemaError, ViaductSchema},
    sdl::{SchemaOptions, build_schema},
    type_expr::TypeExpr,
};

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{SchemaOptions, build_schema, model::SchemaError};

    fn sources(text: &str) -> Vec<(String, String)> {
        vec![("test.graphql".into(), text.into())]
    }

    const STARWARS: &str = r#"
        schema { query: Query }

        interface Node { id: ID! }

        type Query {
            hero(episode: Episode = NEWHOPE): Character
            film(id: ID! @idOf(type: "Film")): Film @resolver
        }

        enum Episode { NEWHOPE EMPIRE JEDI }

        interface Character {
            id: ID!
            name: String!
        }

        type Human implements Character & Node {
            id: ID!
            name: String!
            homePlanet: String
        }

        type Droid implements Character & Node {
            id: ID!
            name: String!
            primaryFunction: String @scope(to: ["internal"])
        }

        type Film implements Node @resolver {
            id: ID!
            title: String!
            episode: Episode
        }

        union SearchResult = Human | Droid | Film
    "#;

    #[test]
    fn builds_and_closes() {
        let schema = build_schema(&sources(STARWARS), &SchemaOptions::default()).unwrap();
        assert!(schema.object("Human").is_some());
        assert!(schema.interface("Character").is_some());
        assert_eq!(schema.possible_objects("Character").len(), 2);
        assert_eq!(schema.possible_objects("SearchResult").len(), 3);
        assert!(schema.is_spreadable("Character", "Droid"));
        assert!(schema.is_spreadable("SearchResult", "Character"));
        assert!(!schema.is_spreadable("Film", "Human"));
    }

    #[test]
    fn node_fields_are_injected() {
        let schema = build_schema(&sources(STARWARS), &SchemaOptions::default()).unwrap();
        let query = schema.object("Query").unwrap();
        assert!(query.field_by_name("node").is_some());
        assert!(query.field_by_name("nodes").is_some());
        assert!(schema.object("Film").unwrap().is_node());
    }

    #[test]
    fn node_fields_can_be_disabled() {
        let opts = SchemaOptions {
            enable_node_resolvers: false,
            ..SchemaOptions::default()
        };
        let schema = build_schema(&sources(STARWARS), &opts).unwrap();
        assert!(schema.object("Query").unwrap().field_by_name("node").is_none());
    }

    #[test]
    fn id_of_is_recorded_on_arguments() {
        let schema = build_schema(&sources(STARWARS), &SchemaOptions::default()).unwrap();
        let film = schema.field_of("Query", "film").unwrap();
        assert_eq!(film.argument("id").unwrap().id_of.as_deref(), Some("Film"));
        assert!(film.has_resolver);
    }

    #[test]
    fn unknown_type_reference_fails() {
        let err = build_schema(
            &sources("type Query { broken: Missing }"),
            &SchemaOptions::default(),
        )
        .unwrap_err();
        assert!(
            err.errors
                .iter()
                .any(|e| matches!(e, SchemaError::UnknownType(name, _) if name == "Missing")),
        );
    }

    #[test]
    fn one_of_inputs_must_be_all_nullable() {
        let err = build_schema(
            &sources(
                "type Query { a: Int }
                 input Lookup @oneOf { byId: ID! byName: String }",
            ),
            &SchemaOptions::default(),
        )
        .unwrap_err();
        assert!(
            err.errors
                .iter()
                .any(|e| matches!(e, SchemaError::OneOfFieldNotNullable(..))),
        );
    }

    #[test]
    fn interface_override_must_agree_on_type() {
        let err = build_schema(
            &sources(
                "interface Named { name: String! }
                 type Query { a: Int }
                 type Pet implements Named { name: Int! }",
            ),
            &SchemaOptions::default(),
        )
        .unwrap_err();
        assert!(
            err.errors
                .iter()
                .any(|e| matches!(e, SchemaError::FieldOverrideMismatch(..))),
        );
    }

    #[test]
    fn subscriptions_are_rejected_by_default() {
        let err = build_schema(
            &sources("type Query { a: Int } type Subscription { ticks: Int }"),
            &SchemaOptions::default(),
        )
        .unwrap_err();
        assert!(
            err.errors
                .iter()
                .any(|e| matches!(e, SchemaError::SubscriptionsUnsupported)),
        );

        let opts = SchemaOptions {
            allow_subscriptions: true,
            ..SchemaOptions::default()
        };
        build_schema(
            &sources("type Query { a: Int } type Subscription { ticks: Int }"),
            &opts,
        )
        .unwrap();
    }

    #[test]
    fn directive_location_is_enforced() {
        let err = build_schema(
            &sources("type Query @backingData(class: \"x\") { a: Int }"),
            &SchemaOptions::default(),
        )
        .unwrap_err();
        assert!(
            err.errors
                .iter()
                .any(|e| matches!(e, SchemaError::DirectiveNotAllowedHere(..))),
        );
    }

    #[test]
    fn scoped_view_prunes_fields_and_stays_closed() {
        let schema = build_schema(&sources(STARWARS), &SchemaOptions::default()).unwrap();

        let public = schema.scoped_to(&HashSet::new());
        assert!(public.object("Droid").unwrap().field_by_name("primaryFunction").is_none());

        let internal = schema.scoped_to(&HashSet::from(["internal".to_string()]));
        assert!(internal.object("Droid").unwrap().field_by_name("primaryFunction").is_some());

        assert_ne!(public.digest(), internal.digest());
        assert_ne!(public.digest(), schema.digest());
    }

    #[test]
    fn filtering_a_type_cascades_to_its_fields() {
        let schema = build_schema(&sources(STARWARS), &SchemaOptions::default()).unwrap();
        let filtered = schema.filter(|t| match t {
            crate::schema::FilterTarget::Type(t) => *t.name() != "Film",
            _ => true,
        });
        assert!(filtered.object("Film").is_none());
        // Query.film returned a Film, so it is gone with it.
        assert!(filtered.field_of("Query", "film").is_none());
        assert_eq!(filtered.possible_objects("SearchResult").len(), 2);
    }
}
