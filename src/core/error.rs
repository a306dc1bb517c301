//! TP-009: Error taxonomy for flattening, strict evaluation, and planning.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, TopologyError>;

/// The six inheritable type catalogs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Node,
    Relationship,
    Capability,
    Interface,
    Group,
    Policy,
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node => write!(f, "node"),
            Self::Relationship => write!(f, "relationship"),
            Self::Capability => write!(f, "capability"),
            Self::Interface => write!(f, "interface"),
            Self::Group => write!(f, "group"),
            Self::Policy => write!(f, "policy"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TopologyError {
    /// A type name that is not in its catalog.
    #[error("unknown {kind} type '{name}' (referenced by '{referenced_by}')")]
    UnknownType {
        kind: TypeKind,
        name: String,
        referenced_by: String,
    },

    /// `derived_from` chain loops back on itself.
    #[error("cyclic {kind} type derivation: {}", chain.join(" -> "))]
    CyclicType { kind: TypeKind, chain: Vec<String> },

    /// Only raised when the caller asked for strict resolution.
    #[error("unresolved reference: {reference}")]
    UnresolvedReference { reference: String },

    /// Two implemented operations map to one lifecycle stage under the strict policy.
    #[error("component '{component}' implements stage '{stage}' twice ({first} and {second})")]
    DuplicateOperation {
        component: String,
        stage: String,
        first: String,
        second: String,
    },

    /// The lifecycle graph has no topological order.
    #[error("dependency cycle detected involving: {}", members.join(", "))]
    DependencyCycle { members: Vec<String> },

    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml_ng::Error),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
