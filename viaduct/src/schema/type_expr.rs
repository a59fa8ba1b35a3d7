use std::fmt;

use arcstr::ArcStr;

use crate::ast::TypeLiteral;

/// The type of a field or argument position, flattened for planning.
///
/// A wrapped GraphQL type is carried as its base name, the base's
/// nullability, and one nullability flag per list layer (outermost first).
/// `nullable_at_depth.len()` _is_ the list depth.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TypeExpr {
    base: ArcStr,
    base_nullable: bool,
    nullable_at_depth: Vec<bool>,
}

impl TypeExpr {
    /// Creates a bare (non-list) type expression.
    pub fn named(base: impl Into<ArcStr>, nullable: bool) -> Self {
        Self {
            base: base.into(),
            base_nullable: nullable,
            nullable_at_depth: Vec::new(),
        }
    }

    /// Wraps this type expression into one list layer.
    #[must_use]
    pub fn wrap_list(mut self, nullable: bool) -> Self {
        self.nullable_at_depth.insert(0, nullable);
        self
    }

    /// The base (innermost) type name.
    pub fn base(&self) -> &ArcStr {
        &self.base
    }

    /// Whether the base position may be null.
    pub fn base_nullable(&self) -> bool {
        self.base_nullable
    }

    /// Number of list layers around the base type.
    pub fn list_depth(&self) -> usize {
        self.nullable_at_depth.len()
    }

    /// Whether any list layer is present.
    pub fn is_list(&self) -> bool {
        !self.nullable_at_depth.is_empty()
    }

    /// Whether the outermost position may be null.
    pub fn is_nullable(&self) -> bool {
        self.nullable_at_depth
            .first()
            .copied()
            .unwrap_or(self.base_nullable)
    }

    /// Removes the outermost list layer.
    ///
    /// # Panics
    ///
    /// If this expression is not a list.
    #[must_use]
    pub fn unwrap_list(&self) -> Self {
        assert!(self.is_list(), "`unwrap_list` on a non-list type");
        Self {
            base: self.base.clone(),
            base_nullable: self.base_nullable,
            nullable_at_depth: self.nullable_at_depth[1..].to_vec(),
        }
    }

    /// Returns this expression with the outermost position made non-null.
    #[must_use]
    pub fn as_non_nullable(&self) -> Self {
        let mut out = self.clone();
        if let Some(head) = out.nullable_at_depth.first_mut() {
            *head = false;
        } else {
            out.base_nullable = false;
        }
        out
    }

    /// Builds a [`TypeExpr`] from a parsed type literal.
    pub fn from_literal(lit: &TypeLiteral) -> Self {
        match lit {
            TypeLiteral::Named(n) => Self::named(n.as_str(), true),
            TypeLiteral::NonNullNamed(n) => Self::named(n.as_str(), false),
            TypeLiteral::List(inner) => Self::from_literal(inner).wrap_list(true),
            TypeLiteral::NonNullList(inner) => Self::from_literal(inner).wrap_list(false),
        }
    }
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn render(expr: &TypeExpr, depth: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            if depth == expr.list_depth() {
                write!(f, "{}", expr.base)?;
                if !expr.base_nullable {
                    write!(f, "!")?;
                }
                return Ok(());
            }
            write!(f, "[")?;
            render(expr, depth + 1, f)?;
            write!(f, "]")?;
            if !expr.nullable_at_depth[depth] {
                write!(f, "!")?;
            }
            Ok(())
        }
        render(self, 0, f)
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::{Parser, parse_type_literal};

    use super::TypeExpr;

    fn parse(s: &str) -> TypeExpr {
        let mut parser = Parser::from_source(s).unwrap();
        TypeExpr::from_literal(&parse_type_literal(&mut parser).unwrap().item)
    }

    #[test]
    fn depth_invariant_holds() {
        let t = parse("[[Film!]]!");
        assert_eq!(t.list_depth(), 2);
        assert_eq!(t.base(), "Film");
        assert!(!t.base_nullable());
        assert!(!t.is_nullable());
    }

    #[test]
    fn unwrap_list_peels_the_outermost_layer() {
        let t = parse("[[Film!]]!");
        let inner = t.unwrap_list();
        assert_eq!(inner.list_depth(), 1);
        assert!(inner.is_nullable());
        let innermost = inner.unwrap_list();
        assert!(!innermost.is_list());
        assert!(!innermost.is_nullable());
    }

    #[test]
    fn as_non_nullable_only_touches_the_outermost_position() {
        let t = parse("[Film]");
        let nn = t.as_non_nullable();
        assert!(!nn.is_nullable());
        assert!(nn.unwrap_list().is_nullable());
    }

    #[test]
    fn renders_source_syntax() {
        for src in ["String", "String!", "[Int!]", "[[Film!]]!"] {
            assert_eq!(parse(src).to_string(), src);
        }
    }
}
