//! Append-only expression graph.
//!
//! [`Graph`] owns an arena of [`Node`]s addressed by [`NodeId`]. A node can
//! only reference nodes created before it, so arena order is a topological
//! order and the graph is acyclic by construction.
//!
//! Node creation simplifies eagerly: identical unary, binary and selection
//! nodes are shared (hash-consing), identity selections fold to their
//! dependency, and operations whose operands are all constant are folded to
//! a constant node.

pub(crate) mod derivative;

use std::collections::HashMap;

use crate::error::GraphError;
use crate::node::{BinaryNode, Node, NodeId, Op, UNUSED};
use crate::opcode::{self, BinaryOp, UnaryOp};
use crate::select::SelectNode;
use crate::sparsity::Sparsity;

/// Structural key used to share identical nodes.
#[derive(Clone, PartialEq, Eq, Hash)]
enum OpKey {
    Zeros(Sparsity),
    Unary(UnaryOp, u32),
    Binary(BinaryOp, u32, u32),
    Select {
        dep: u32,
        accumulate: bool,
        assign: Vec<usize>,
        sparsity: Sparsity,
    },
}

/// Builder and owner of an expression DAG.
#[derive(Clone, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    interned: HashMap<OpKey, u32>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes in the arena.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.nodes
            .get(id.index())
            .ok_or(GraphError::MissingDependency(id.0))
    }

    pub fn sparsity(&self, id: NodeId) -> Result<&Sparsity, GraphError> {
        self.node(id).map(Node::sparsity)
    }

    pub(crate) fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    fn intern(&mut self, key: OpKey, node: Node) -> NodeId {
        if let Some(&idx) = self.interned.get(&key) {
            return NodeId(idx);
        }
        let id = self.push(node);
        self.interned.insert(key, id.0);
        id
    }

    /// Stored values of a constant or zero node.
    fn constant_values(&self, id: NodeId) -> Option<Vec<f64>> {
        let node = &self.nodes[id.index()];
        match &node.op {
            Op::Constant { values } => Some(values.clone()),
            Op::Zeros => Some(vec![0.0; node.sparsity.nnz()]),
            _ => None,
        }
    }

    fn is_zeros(&self, id: NodeId) -> bool {
        matches!(self.nodes[id.index()].op, Op::Zeros)
    }

    // ── Leaves ──

    /// Symbolic input with the given sparsity.
    pub fn input(&mut self, name: impl Into<String>, sparsity: Sparsity) -> NodeId {
        self.push(Node {
            sparsity,
            op: Op::Input { name: name.into() },
        })
    }

    /// Dense symbolic input.
    pub fn symbol(&mut self, name: impl Into<String>, nrow: usize, ncol: usize) -> NodeId {
        self.input(name, Sparsity::dense(nrow, ncol))
    }

    /// Constant with one value per nonzero of `sparsity`.
    pub fn constant(&mut self, sparsity: Sparsity, values: Vec<f64>) -> Result<NodeId, GraphError> {
        if values.len() != sparsity.nnz() {
            return Err(GraphError::ConstantLength {
                expected: sparsity.nnz(),
                found: values.len(),
            });
        }
        Ok(self.push(Node {
            sparsity,
            op: Op::Constant { values },
        }))
    }

    /// Zero matrix with the given sparsity. Shared per pattern.
    pub fn zeros(&mut self, sparsity: Sparsity) -> NodeId {
        self.intern(
            OpKey::Zeros(sparsity.clone()),
            Node {
                sparsity,
                op: Op::Zeros,
            },
        )
    }

    // ── Elementwise ──

    /// Apply `op` to the stored nonzeros of `x`.
    pub fn unary(&mut self, op: UnaryOp, x: NodeId) -> Result<NodeId, GraphError> {
        let sp = self.sparsity(x)?.clone();
        if let Some(values) = self.constant_values(x) {
            if self.is_zeros(x) && matches!(op, UnaryOp::Neg | UnaryOp::Sin | UnaryOp::Sq) {
                return Ok(self.zeros(sp));
            }
            log::trace!("folding {} of constant {x}", op.name());
            let values = values.iter().map(|&v| opcode::eval_unary(op, v)).collect();
            return self.constant(sp, values);
        }
        Ok(self.intern(
            OpKey::Unary(op, x.0),
            Node {
                sparsity: sp,
                op: Op::Unary { op, arg: x },
            },
        ))
    }

    pub fn neg(&mut self, x: NodeId) -> Result<NodeId, GraphError> {
        self.unary(UnaryOp::Neg, x)
    }

    pub fn sin(&mut self, x: NodeId) -> Result<NodeId, GraphError> {
        self.unary(UnaryOp::Sin, x)
    }

    pub fn cos(&mut self, x: NodeId) -> Result<NodeId, GraphError> {
        self.unary(UnaryOp::Cos, x)
    }

    pub fn exp(&mut self, x: NodeId) -> Result<NodeId, GraphError> {
        self.unary(UnaryOp::Exp, x)
    }

    pub fn sq(&mut self, x: NodeId) -> Result<NodeId, GraphError> {
        self.unary(UnaryOp::Sq, x)
    }

    /// Elementwise binary operation. Operands must have the same shape.
    pub fn binary(&mut self, op: BinaryOp, a: NodeId, b: NodeId) -> Result<NodeId, GraphError> {
        let (lsp, rsp) = (self.sparsity(a)?.clone(), self.sparsity(b)?.clone());
        lsp.check_same_shape(&rsp)?;

        // Algebraic simplification against structural zeros.
        let (a_zero, b_zero) = (self.is_zeros(a), self.is_zeros(b));
        match op {
            BinaryOp::Add | BinaryOp::Sub if b_zero && rsp.is_subset(&lsp) => return Ok(a),
            BinaryOp::Add if a_zero && lsp.is_subset(&rsp) => return Ok(b),
            BinaryOp::Sub if a_zero && lsp.is_subset(&rsp) => return self.neg(b),
            BinaryOp::Mul if a_zero || b_zero => {
                let sp = lsp.intersection(&rsp)?;
                return Ok(self.zeros(sp));
            }
            _ => {}
        }

        let (a, b, lsp, rsp) = if op.is_commutative() && b < a {
            (b, a, rsp, lsp)
        } else {
            (a, b, lsp, rsp)
        };
        let (sp, node) = BinaryNode::new(op, a, &lsp, b, &rsp)?;

        if let (Some(va), Some(vb)) = (self.constant_values(a), self.constant_values(b)) {
            log::trace!("folding {a} {} {b}", op.symbol());
            let mut out = vec![0.0; sp.nnz()];
            node.combine(&va, &vb, &mut out);
            return self.constant(sp, out);
        }
        Ok(self.intern(
            OpKey::Binary(op, a.0, b.0),
            Node {
                sparsity: sp,
                op: Op::Binary(node),
            },
        ))
    }

    pub fn add(&mut self, a: NodeId, b: NodeId) -> Result<NodeId, GraphError> {
        self.binary(BinaryOp::Add, a, b)
    }

    pub fn sub(&mut self, a: NodeId, b: NodeId) -> Result<NodeId, GraphError> {
        self.binary(BinaryOp::Sub, a, b)
    }

    pub fn mul(&mut self, a: NodeId, b: NodeId) -> Result<NodeId, GraphError> {
        self.binary(BinaryOp::Mul, a, b)
    }

    // ── Selection ──

    /// Gather: output nonzero `k` of `sparsity` reads nonzero `assign[k]` of
    /// `dep`.
    pub fn select(
        &mut self,
        sparsity: Sparsity,
        dep: NodeId,
        assign: Vec<usize>,
    ) -> Result<NodeId, GraphError> {
        self.push_select(sparsity, dep, assign, false)
    }

    /// Scatter: nonzero `j` of `dep` is added into output nonzero `assign[j]`
    /// of `sparsity`.
    pub fn scatter(
        &mut self,
        sparsity: Sparsity,
        dep: NodeId,
        assign: Vec<usize>,
    ) -> Result<NodeId, GraphError> {
        self.push_select(sparsity, dep, assign, true)
    }

    /// Column vector of the listed nonzeros of `dep`.
    pub fn get_nonzeros(&mut self, dep: NodeId, nz: &[usize]) -> Result<NodeId, GraphError> {
        self.select(Sparsity::column(nz.len()), dep, nz.to_vec())
    }

    fn push_select(
        &mut self,
        sparsity: Sparsity,
        dep: NodeId,
        assign: Vec<usize>,
        accumulate: bool,
    ) -> Result<NodeId, GraphError> {
        let dep_sp = self.sparsity(dep)?.clone();
        let node = SelectNode::new(&sparsity, dep, &dep_sp, assign, accumulate)?;

        if node.is_identity(&sparsity, &dep_sp) {
            return Ok(dep);
        }
        if sparsity.nnz() == 0 || node.assign().is_empty() || self.is_zeros(dep) {
            return Ok(self.zeros(sparsity));
        }
        if let Some(values) = self.constant_values(dep) {
            log::trace!("folding selection of constant {dep}");
            let mut out = vec![0.0; sparsity.nnz()];
            node.eval(Some(values.as_slice()), Some(out.as_mut_slice()));
            return self.constant(sparsity, out);
        }

        let key = OpKey::Select {
            dep: dep.0,
            accumulate,
            assign: node.assign().to_vec(),
            sparsity: sparsity.clone(),
        };
        Ok(self.intern(
            key,
            Node {
                sparsity,
                op: Op::Select(node),
            },
        ))
    }

    // ── Helpers for rewrites ──

    /// Restrict `id` to the entries stored in `target` (same shape).
    pub(crate) fn project(&mut self, id: NodeId, target: &Sparsity) -> Result<NodeId, GraphError> {
        let sp = self.sparsity(id)?.clone();
        if sp.is_subset(target) {
            return Ok(id);
        }
        let (isp, map, _) = sp.intersection_with_mapping(target)?;
        self.select(isp, id, map)
    }

    /// Add `contrib` into an optional accumulator. Empty contributions are
    /// dropped.
    pub(crate) fn accumulate(
        &mut self,
        acc: Option<NodeId>,
        contrib: NodeId,
    ) -> Result<Option<NodeId>, GraphError> {
        if self.sparsity(contrib)?.nnz() == 0 {
            return Ok(acc);
        }
        match acc {
            None => Ok(Some(contrib)),
            Some(acc) => self.add(acc, contrib).map(Some),
        }
    }

    /// Mark the nodes that `roots` depend on (roots included).
    pub(crate) fn reachable(&self, roots: &[NodeId]) -> Result<Vec<bool>, GraphError> {
        let mut live = vec![false; self.nodes.len()];
        let mut stack = Vec::with_capacity(roots.len());
        for &r in roots {
            self.node(r)?;
            stack.push(r.0);
        }
        while let Some(idx) = stack.pop() {
            let i = idx as usize;
            if live[i] {
                continue;
            }
            live[i] = true;
            for a in self.nodes[i].args() {
                if a != UNUSED {
                    stack.push(a);
                }
            }
        }
        Ok(live)
    }

    // ── Diagnostics ──

    /// Expression string for `id`, e.g. `(sin(x)+x[[2, 0, 2, 3]])`.
    ///
    /// Shared subexpressions are spelled out at every use.
    pub fn describe(&self, id: NodeId) -> Result<String, GraphError> {
        let mut out = String::new();
        let mut stack = vec![Piece::Node(id)];
        while let Some(piece) = stack.pop() {
            let node = match piece {
                Piece::Text(text) => {
                    out.push_str(&text);
                    continue;
                }
                Piece::Node(n) => self.node(n)?,
            };
            let sp = &node.sparsity;
            let pieces = match &node.op {
                Op::Input { name } => vec![Piece::Text(name.clone())],
                Op::Constant { values } if sp.is_scalar() && values.len() == 1 => {
                    vec![Piece::Text(format!("{}", values[0]))]
                }
                Op::Constant { .. } => vec![Piece::Text(format!("constant({sp})"))],
                Op::Zeros => vec![Piece::Text(format!("sparse({},{})", sp.nrow(), sp.ncol()))],
                Op::Unary { op: UnaryOp::Neg, arg } => {
                    vec![Piece::text("(-"), Piece::Node(*arg), Piece::text(")")]
                }
                Op::Unary { op, arg } => vec![
                    Piece::Text(format!("{}(", op.name())),
                    Piece::Node(*arg),
                    Piece::text(")"),
                ],
                Op::Binary(b) => vec![
                    Piece::text("("),
                    Piece::Node(b.lhs),
                    Piece::text(b.op.symbol()),
                    Piece::Node(b.rhs),
                    Piece::text(")"),
                ],
                Op::Select(s) if s.is_scatter() => vec![
                    Piece::text("scatter("),
                    Piece::Node(s.dependency()),
                    Piece::Text(format!(", {:?})", s.assign())),
                ],
                Op::Select(s) if sp.is_scalar() && sp.nnz() == 1 => vec![
                    Piece::Node(s.dependency()),
                    Piece::Text(format!("[{}]", s.assign()[0])),
                ],
                Op::Select(s) => vec![
                    Piece::Node(s.dependency()),
                    Piece::Text(format!("[{:?}]", s.assign())),
                ],
            };
            stack.extend(pieces.into_iter().rev());
        }
        Ok(out)
    }
}

/// Pending output of [`Graph::describe`].
enum Piece {
    Node(NodeId),
    Text(String),
}

impl Piece {
    fn text(s: &str) -> Self {
        Piece::Text(s.to_string())
    }
}
