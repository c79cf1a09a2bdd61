use std::fmt;
use std::str::FromStr;

use crate::error::QueryError;

/// Comparison operator of a leaf query node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Comparison {
    #[default]
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    IsNull,
    IsNotNull,
    Contains,
    IContains,
    Like,
    ILike,
    StartsWith,
    EndsWith,
    IStartsWith,
    IEndsWith,
}

impl Comparison {
    pub const ALL: [Comparison; 18] = [
        Comparison::Eq,
        Comparison::Ne,
        Comparison::Lt,
        Comparison::Le,
        Comparison::Gt,
        Comparison::Ge,
        Comparison::In,
        Comparison::NotIn,
        Comparison::IsNull,
        Comparison::IsNotNull,
        Comparison::Contains,
        Comparison::IContains,
        Comparison::Like,
        Comparison::ILike,
        Comparison::StartsWith,
        Comparison::EndsWith,
        Comparison::IStartsWith,
        Comparison::IEndsWith,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Comparison::Eq => "eq",
            Comparison::Ne => "ne",
            Comparison::Lt => "lt",
            Comparison::Le => "le",
            Comparison::Gt => "gt",
            Comparison::Ge => "ge",
            Comparison::In => "in",
            Comparison::NotIn => "notin",
            Comparison::IsNull => "isnull",
            Comparison::IsNotNull => "isnotnull",
            Comparison::Contains => "contains",
            Comparison::IContains => "icontains",
            Comparison::Like => "like",
            Comparison::ILike => "ilike",
            Comparison::StartsWith => "startswith",
            Comparison::EndsWith => "endswith",
            Comparison::IStartsWith => "istartswith",
            Comparison::IEndsWith => "iendswith",
        }
    }

    /// Null checks ignore the value.
    pub fn is_unary(&self) -> bool {
        matches!(self, Comparison::IsNull | Comparison::IsNotNull)
    }

    /// Membership tests expect a collection value.
    pub fn is_membership(&self) -> bool {
        matches!(self, Comparison::In | Comparison::NotIn)
    }

    /// Substring and anchored text matches.
    pub fn is_pattern(&self) -> bool {
        matches!(
            self,
            Comparison::Contains
                | Comparison::IContains
                | Comparison::Like
                | Comparison::ILike
                | Comparison::StartsWith
                | Comparison::EndsWith
                | Comparison::IStartsWith
                | Comparison::IEndsWith
        )
    }
}

impl FromStr for Comparison {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Comparison::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| QueryError::shape(format!("Unknown comparison '{}'", s)))
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
