//! Elementwise operator codes.
//!
//! Unary ops act on the stored nonzeros of their operand; binary ops combine
//! two operands of the same shape. [`eval_unary`] / [`eval_binary`] evaluate a
//! single entry and [`unary_partial`] / [`binary_partials`] return the local
//! derivatives used by the forward and reverse sweeps.

use num_traits::Float;

/// Unary elementwise operation. Output sparsity equals operand sparsity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Sin,
    Cos,
    Exp,
    /// `x * x`.
    Sq,
}

/// Binary elementwise operation on operands of equal shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
}

/// How a binary op combines operand sparsities.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SparsityRule {
    /// Stored wherever either operand is stored (missing entries read as zero).
    Union,
    /// Stored only where both operands are stored.
    Intersection,
}

impl UnaryOp {
    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Sin => "sin",
            UnaryOp::Cos => "cos",
            UnaryOp::Exp => "exp",
            UnaryOp::Sq => "sq",
        }
    }
}

impl BinaryOp {
    pub fn sparsity_rule(self) -> SparsityRule {
        match self {
            BinaryOp::Add | BinaryOp::Sub => SparsityRule::Union,
            BinaryOp::Mul => SparsityRule::Intersection,
        }
    }

    pub fn is_commutative(self) -> bool {
        matches!(self, BinaryOp::Add | BinaryOp::Mul)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
        }
    }
}

/// Evaluate a unary op on one entry.
#[inline]
pub fn eval_unary<T: Float>(op: UnaryOp, a: T) -> T {
    match op {
        UnaryOp::Neg => -a,
        UnaryOp::Sin => a.sin(),
        UnaryOp::Cos => a.cos(),
        UnaryOp::Exp => a.exp(),
        UnaryOp::Sq => a * a,
    }
}

/// `d r / d a` for `r = op(a)`.
#[inline]
pub fn unary_partial<T: Float>(op: UnaryOp, a: T, r: T) -> T {
    match op {
        UnaryOp::Neg => -T::one(),
        UnaryOp::Sin => a.cos(),
        UnaryOp::Cos => -a.sin(),
        UnaryOp::Exp => r,
        UnaryOp::Sq => a + a,
    }
}

/// Evaluate a binary op on one pair of entries.
#[inline]
pub fn eval_binary<T: Float>(op: BinaryOp, a: T, b: T) -> T {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
    }
}

/// `(d r / d a, d r / d b)` for `r = op(a, b)`.
#[inline]
pub fn binary_partials<T: Float>(op: BinaryOp, a: T, b: T) -> (T, T) {
    match op {
        BinaryOp::Add => (T::one(), T::one()),
        BinaryOp::Sub => (T::one(), -T::one()),
        BinaryOp::Mul => (b, a),
    }
}
