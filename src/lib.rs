//! Sparse matrix-expression graphs.
//!
//! Build a DAG of matrix-valued operations with [`Graph`], where every node
//! carries its own [`Sparsity`] pattern, then compile a slice of it into a
//! [`Function`] for numeric evaluation, forward and reverse differentiation,
//! structural dependency propagation and flat-buffer code generation.
//! Derivatives can also be built symbolically ([`Graph::jvp`],
//! [`Graph::vjp`]), which yields new graph nodes that can be compiled and
//! differentiated again.

pub mod bits;
pub mod codegen;
pub mod error;
pub mod float;
pub mod function;
pub mod graph;
pub mod node;
pub mod opcode;
pub mod select;
pub mod sparsity;

pub use bits::{BitBuffer, Bvec};
pub use codegen::{CodegenOptions, GeneratedCode};
pub use error::GraphError;
pub use float::Float;
pub use function::{Evaluator, Function};
pub use graph::Graph;
pub use node::NodeId;
pub use opcode::{BinaryOp, UnaryOp};
pub use sparsity::Sparsity;
