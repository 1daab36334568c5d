//! Construction errors.
//!
//! Every fallible operation in this crate happens while a graph or a function
//! is being built. Evaluation, propagation and code generation are total.

/// Errors reported synchronously by graph and function construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("index table has {found} entries, expected {expected}")]
    IndexTableLength { expected: usize, found: usize },

    #[error("nonzero index {index} out of range for a pattern with {nnz} nonzeros")]
    NonzeroOutOfRange { index: usize, nnz: usize },

    #[error("node {0} is not part of this graph")]
    MissingDependency(u32),

    #[error("dimension mismatch: {lhs_rows}-by-{lhs_cols} vs {rhs_rows}-by-{rhs_cols}")]
    ShapeMismatch {
        lhs_rows: usize,
        lhs_cols: usize,
        rhs_rows: usize,
        rhs_cols: usize,
    },

    #[error("invalid sparsity pattern: {0}")]
    InvalidSparsity(String),

    #[error("constant has {found} values but its sparsity has {expected} nonzeros")]
    ConstantLength { expected: usize, found: usize },

    #[error("node {0} is not a symbolic input")]
    NotAnInput(u32),

    #[error("symbolic input `{0}` is declared more than once")]
    DuplicateInput(String),

    #[error("symbolic input `{0}` is used but not declared as a function input")]
    FreeVariable(String),

    #[error("expected {expected} entries, got {found}")]
    ArgumentCount { expected: usize, found: usize },
}
