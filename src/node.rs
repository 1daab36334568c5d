//! Expression nodes.
//!
//! A [`Node`] is one operator in the graph arena: its output sparsity plus an
//! [`Op`] variant. The set of operator kinds is closed, so every mode (value,
//! forward, adjoint, bit propagation, code emission) is a `match` over the
//! variant rather than a trait object.
//!
//! Buffer-based modes receive the buffers of the whole arena indexed by node
//! position. A node only reads (value, forward) or accumulates into (adjoint)
//! the buffers of its dependencies, which always precede it.

use std::fmt;

use crate::bits::BitBuffer;
use crate::codegen::{Accumulate, CodeGenerator, Statement};
use crate::error::GraphError;
use crate::float::{cast, Float};
use crate::opcode::{self, BinaryOp, SparsityRule, UnaryOp};
use crate::select::SelectNode;
use crate::sparsity::Sparsity;

/// Sentinel used in [`Node::args`] for unused dependency slots.
pub const UNUSED: u32 = u32::MAX;

/// Handle to a node of a [`Graph`](crate::Graph). Does not own the node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Operator kind and its parameters.
#[derive(Clone, Debug)]
pub enum Op {
    /// Symbolic input; values are supplied per call.
    Input { name: String },
    /// Stored values, one per nonzero.
    Constant { values: Vec<f64> },
    /// Canonical zero matrix.
    Zeros,
    Unary { op: UnaryOp, arg: NodeId },
    Binary(BinaryNode),
    Select(SelectNode),
}

/// Elementwise binary node with precomputed nonzero maps.
#[derive(Clone, Debug)]
pub struct BinaryNode {
    pub(crate) op: BinaryOp,
    pub(crate) lhs: NodeId,
    pub(crate) rhs: NodeId,
    layout: Layout,
}

#[derive(Clone, Debug)]
enum Layout {
    /// Output nonzero that each operand nonzero lands on.
    Union { lhs: Vec<usize>, rhs: Vec<usize> },
    /// Operand nonzeros that each output nonzero reads.
    Intersection { lhs: Vec<usize>, rhs: Vec<usize> },
}

impl BinaryNode {
    /// Build the node and its output sparsity. Operand shapes must match.
    pub(crate) fn new(
        op: BinaryOp,
        lhs: NodeId,
        lhs_sp: &Sparsity,
        rhs: NodeId,
        rhs_sp: &Sparsity,
    ) -> Result<(Sparsity, Self), GraphError> {
        let (sp, layout) = match op.sparsity_rule() {
            SparsityRule::Union => {
                let (sp, l, r) = lhs_sp.union_with_mapping(rhs_sp)?;
                (sp, Layout::Union { lhs: l, rhs: r })
            }
            SparsityRule::Intersection => {
                let (sp, l, r) = lhs_sp.intersection_with_mapping(rhs_sp)?;
                (sp, Layout::Intersection { lhs: l, rhs: r })
            }
        };
        Ok((
            sp,
            BinaryNode {
                op,
                lhs,
                rhs,
                layout,
            },
        ))
    }

    pub fn op(&self) -> BinaryOp {
        self.op
    }

    pub fn lhs(&self) -> NodeId {
        self.lhs
    }

    pub fn rhs(&self) -> NodeId {
        self.rhs
    }

    fn rhs_sign(&self) -> Accumulate {
        if self.op == BinaryOp::Sub {
            Accumulate::Sub
        } else {
            Accumulate::Add
        }
    }

    /// Value formula; for union ops also the forward formula.
    pub(crate) fn combine<F: Float>(&self, a: &[F], b: &[F], out: &mut [F]) {
        match &self.layout {
            Layout::Union { lhs, rhs } => {
                out.fill(F::zero());
                for (&k, &v) in lhs.iter().zip(a) {
                    out[k] = out[k] + v;
                }
                let sub = self.op == BinaryOp::Sub;
                for (&k, &v) in rhs.iter().zip(b) {
                    out[k] = if sub { out[k] - v } else { out[k] + v };
                }
            }
            Layout::Intersection { lhs, rhs } => {
                for (k, o) in out.iter_mut().enumerate() {
                    *o = opcode::eval_binary(self.op, a[lhs[k]], b[rhs[k]]);
                }
            }
        }
    }

    fn forward<F: Float>(&self, values: &[Vec<F>], seeds: &[Vec<F>], out: &mut [F]) {
        let (da, db) = (&seeds[self.lhs.index()], &seeds[self.rhs.index()]);
        match &self.layout {
            Layout::Union { .. } => self.combine(da, db, out),
            Layout::Intersection { lhs, rhs } => {
                let (a, b) = (&values[self.lhs.index()], &values[self.rhs.index()]);
                for (k, o) in out.iter_mut().enumerate() {
                    let (i, j) = (lhs[k], rhs[k]);
                    let (pa, pb) = opcode::binary_partials(self.op, a[i], b[j]);
                    *o = pa * da[i] + pb * db[j];
                }
            }
        }
    }

    fn adjoint<F: Float>(&self, values: &[Vec<F>], seed: &mut [F], sens: &mut [Vec<F>]) {
        let (l, r) = (self.lhs.index(), self.rhs.index());
        match &self.layout {
            Layout::Union { lhs, rhs } => {
                for (i, &k) in lhs.iter().enumerate() {
                    sens[l][i] = sens[l][i] + seed[k];
                }
                let sub = self.op == BinaryOp::Sub;
                for (j, &k) in rhs.iter().enumerate() {
                    sens[r][j] = if sub {
                        sens[r][j] - seed[k]
                    } else {
                        sens[r][j] + seed[k]
                    };
                }
                seed.fill(F::zero());
            }
            Layout::Intersection { lhs, rhs } => {
                for k in 0..seed.len() {
                    let (i, j) = (lhs[k], rhs[k]);
                    let (pa, pb) = opcode::binary_partials(self.op, values[l][i], values[r][j]);
                    let s = seed[k];
                    sens[l][i] = sens[l][i] + pa * s;
                    sens[r][j] = sens[r][j] + pb * s;
                    seed[k] = F::zero();
                }
            }
        }
    }

    fn propagate_forward(&self, bits: &[BitBuffer], out: &mut BitBuffer) {
        let (a, b) = (&bits[self.lhs.index()], &bits[self.rhs.index()]);
        match &self.layout {
            Layout::Union { lhs, rhs } => {
                out.clear();
                for (i, &k) in lhs.iter().enumerate() {
                    out.or(k, a.get(i));
                }
                for (j, &k) in rhs.iter().enumerate() {
                    out.or(k, b.get(j));
                }
            }
            Layout::Intersection { lhs, rhs } => {
                for k in 0..out.len() {
                    out.set(k, a.get(lhs[k]) | b.get(rhs[k]));
                }
            }
        }
    }

    fn propagate_backward(&self, seed: &mut BitBuffer, bits: &mut [BitBuffer]) {
        let (l, r) = (self.lhs.index(), self.rhs.index());
        match &self.layout {
            Layout::Union { lhs, rhs } => {
                for (i, &k) in lhs.iter().enumerate() {
                    bits[l].or(i, seed.get(k));
                }
                for (j, &k) in rhs.iter().enumerate() {
                    bits[r].or(j, seed.get(k));
                }
            }
            Layout::Intersection { lhs, rhs } => {
                for k in 0..seed.len() {
                    let w = seed.get(k);
                    bits[l].or(lhs[k], w);
                    bits[r].or(rhs[k], w);
                }
            }
        }
        seed.clear();
    }

    fn emit(&self, gen: &mut CodeGenerator, res: usize, len: usize) {
        let (l, r) = (self.lhs.index(), self.rhs.index());
        match &self.layout {
            Layout::Union { lhs, rhs } => {
                gen.push(Statement::Fill {
                    res,
                    len,
                    value: 0.0,
                });
                for (arg, map, sign) in [
                    (l, lhs, Accumulate::Add),
                    (r, rhs, self.rhs_sign()),
                ] {
                    let src: Vec<usize> = (0..map.len()).collect();
                    let src = gen.add_int_constant(&src);
                    let dst = gen.add_int_constant(map);
                    gen.push(Statement::Indexed {
                        res,
                        arg,
                        len: map.len(),
                        src,
                        dst,
                        sign,
                    });
                }
            }
            Layout::Intersection { lhs, rhs } => {
                let lhs_idx = gen.add_int_constant(lhs);
                let rhs_idx = gen.add_int_constant(rhs);
                gen.push(Statement::Product {
                    res,
                    lhs: l,
                    rhs: r,
                    len,
                    lhs_idx,
                    rhs_idx,
                });
            }
        }
    }
}

/// One operator in the graph arena.
#[derive(Clone, Debug)]
pub struct Node {
    pub(crate) sparsity: Sparsity,
    pub(crate) op: Op,
}

impl Node {
    #[inline]
    pub fn sparsity(&self) -> &Sparsity {
        &self.sparsity
    }

    #[inline]
    pub fn op(&self) -> &Op {
        &self.op
    }

    /// Dependency indices; unused slots hold [`UNUSED`].
    pub fn args(&self) -> [u32; 2] {
        match &self.op {
            Op::Input { .. } | Op::Constant { .. } | Op::Zeros => [UNUSED, UNUSED],
            Op::Unary { arg, .. } => [arg.0, UNUSED],
            Op::Binary(b) => [b.lhs.0, b.rhs.0],
            Op::Select(s) => [s.dependency().0, UNUSED],
        }
    }

    pub fn is_input(&self) -> bool {
        matches!(self.op, Op::Input { .. })
    }

    /// Rewrite dependency handles through `remap` (old index -> new index).
    pub(crate) fn remap_args(&mut self, remap: &[u32]) {
        let re = |id: &mut NodeId| id.0 = remap[id.index()];
        match &mut self.op {
            Op::Input { .. } | Op::Constant { .. } | Op::Zeros => {}
            Op::Unary { arg, .. } => re(arg),
            Op::Binary(b) => {
                re(&mut b.lhs);
                re(&mut b.rhs);
            }
            Op::Select(s) => s.remap_dependency(remap),
        }
    }

    /// Short operator description with dependency handles.
    pub fn label(&self) -> String {
        let (nrow, ncol) = self.sparsity.shape();
        match &self.op {
            Op::Input { name } => format!("input {name}"),
            Op::Constant { .. } => format!("constant {nrow}-by-{ncol}"),
            Op::Zeros => format!("zeros {nrow}-by-{ncol}"),
            Op::Unary { op, arg } => format!("{}({arg})", op.name()),
            Op::Binary(b) => format!("{} {} {}", b.lhs, b.op.symbol(), b.rhs),
            Op::Select(s) if s.is_scatter() => format!("scatter({})", s.dependency()),
            Op::Select(s) => format!("select({})", s.dependency()),
        }
    }

    // ── Numeric modes ──

    /// Value mode. Input buffers are filled by the evaluator.
    pub(crate) fn eval_value<F: Float>(&self, bufs: &[Vec<F>], out: &mut [F]) {
        match &self.op {
            Op::Input { .. } => {}
            Op::Constant { values } => {
                for (o, &v) in out.iter_mut().zip(values) {
                    *o = cast(v);
                }
            }
            Op::Zeros => out.fill(F::zero()),
            Op::Unary { op, arg } => {
                for (o, &a) in out.iter_mut().zip(&bufs[arg.index()]) {
                    *o = opcode::eval_unary(*op, a);
                }
            }
            Op::Binary(b) => b.combine(&bufs[b.lhs.index()], &bufs[b.rhs.index()], out),
            Op::Select(s) => s.eval(Some(bufs[s.dependency().index()].as_slice()), Some(out)),
        }
    }

    /// Forward mode for one direction: `out` receives this node's sensitivity.
    pub(crate) fn eval_forward<F: Float>(
        &self,
        values: &[Vec<F>],
        seeds: &[Vec<F>],
        out: &mut [F],
    ) {
        match &self.op {
            Op::Input { .. } => {}
            Op::Constant { .. } | Op::Zeros => out.fill(F::zero()),
            Op::Unary { op, arg } => {
                let (a, da) = (&values[arg.index()], &seeds[arg.index()]);
                for (k, o) in out.iter_mut().enumerate() {
                    let v = opcode::eval_unary(*op, a[k]);
                    *o = opcode::unary_partial(*op, a[k], v) * da[k];
                }
            }
            Op::Binary(b) => b.forward(values, seeds, out),
            Op::Select(s) => s.forward(Some(seeds[s.dependency().index()].as_slice()), Some(out)),
        }
    }

    /// Adjoint mode for one direction. Consumes `seed` (cleared on return) and
    /// accumulates into the dependency entries of `sens`.
    pub(crate) fn eval_adjoint<F: Float>(
        &self,
        values: &[Vec<F>],
        seed: &mut [F],
        sens: &mut [Vec<F>],
    ) {
        match &self.op {
            Op::Input { .. } => {}
            Op::Constant { .. } | Op::Zeros => seed.fill(F::zero()),
            Op::Unary { op, arg } => {
                let a = &values[arg.index()];
                let da = &mut sens[arg.index()];
                for k in 0..seed.len() {
                    let v = opcode::eval_unary(*op, a[k]);
                    da[k] = da[k] + opcode::unary_partial(*op, a[k], v) * seed[k];
                    seed[k] = F::zero();
                }
            }
            Op::Binary(b) => b.adjoint(values, seed, sens),
            Op::Select(s) => {
                let dep = sens[s.dependency().index()].as_mut_slice();
                s.adjoint(Some(seed), Some(dep))
            }
        }
    }

    // ── Structural modes ──

    pub(crate) fn propagate_forward(&self, bits: &[BitBuffer], out: &mut BitBuffer) {
        match &self.op {
            Op::Input { .. } => {}
            Op::Constant { .. } | Op::Zeros => out.clear(),
            Op::Unary { arg, .. } => {
                out.as_mut_slice()
                    .copy_from_slice(bits[arg.index()].as_slice())
            }
            Op::Binary(b) => b.propagate_forward(bits, out),
            Op::Select(s) => s.propagate_forward(&bits[s.dependency().index()], out),
        }
    }

    /// Consumes `seed` (cleared on return).
    pub(crate) fn propagate_backward(&self, seed: &mut BitBuffer, bits: &mut [BitBuffer]) {
        match &self.op {
            Op::Input { .. } => {}
            Op::Constant { .. } | Op::Zeros => seed.clear(),
            Op::Unary { arg, .. } => {
                let dep = &mut bits[arg.index()];
                for k in 0..seed.len() {
                    dep.or(k, seed.get(k));
                }
                seed.clear();
            }
            Op::Binary(b) => b.propagate_backward(seed, bits),
            Op::Select(s) => s.propagate_backward(&mut bits[s.dependency().index()], seed),
        }
    }

    // ── Code generation ──

    /// Emit the statements computing work buffer `res`. Inputs are emitted by
    /// the function driver, which knows their argument slot.
    pub(crate) fn emit(&self, gen: &mut CodeGenerator, res: usize) {
        let len = self.sparsity.nnz();
        match &self.op {
            Op::Input { .. } => {}
            Op::Constant { values } => {
                let constant = gen.add_real_constant(values);
                gen.push(Statement::Constant { res, constant, len });
            }
            Op::Zeros => gen.push(Statement::Fill {
                res,
                len,
                value: 0.0,
            }),
            Op::Unary { op, arg } => gen.push(Statement::Unary {
                op: *op,
                res,
                arg: arg.index(),
                len,
            }),
            Op::Binary(b) => b.emit(gen, res, len),
            Op::Select(s) => s.emit(gen, res, len),
        }
    }
}
