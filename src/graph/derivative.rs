//! Symbolic forward and reverse differentiation by graph rewriting.
//!
//! Each node kind knows how to rebuild itself (value mode) and how to build
//! the graph fragments of its forward and adjoint sensitivities, given the
//! nodes that are concretely available for its dependencies and seeds. The
//! drivers below walk the graph in topological order (reverse order for
//! adjoints) and thread those nodes along dependency edges.
//!
//! Absent seeds and sensitivities are `None` and mean "structurally zero".
//! Fragments never store more entries than the intersection of what is
//! requested and what exists, so derivative graphs stay sparse when
//! differentiated again.

use std::collections::HashSet;

use super::Graph;
use crate::error::GraphError;
use crate::node::{NodeId, Op, UNUSED};
use crate::opcode::{BinaryOp, UnaryOp};
use crate::sparsity::Sparsity;

/// Inputs and outputs of one node rewrite.
#[derive(Debug)]
pub(crate) struct Rewrite {
    /// Value nodes standing in for the dependencies.
    pub(crate) args: [Option<NodeId>; 2],
    /// Whether `output` should be rebuilt.
    pub(crate) want_output: bool,
    pub(crate) output: Option<NodeId>,
    /// Forward seeds of the dependencies, per direction.
    pub(crate) fwd_seeds: Vec<[Option<NodeId>; 2]>,
    pub(crate) fwd_sens: Vec<Option<NodeId>>,
    /// Adjoint seeds of the node, per direction. Taken by the rewrite.
    pub(crate) adj_seeds: Vec<Option<NodeId>>,
    /// Adjoint accumulators of the dependencies, per direction.
    pub(crate) adj_sens: Vec<[Option<NodeId>; 2]>,
}

impl Rewrite {
    fn new(args: [Option<NodeId>; 2], want_output: bool, nfwd: usize, nadj: usize) -> Self {
        Rewrite {
            args,
            want_output,
            output: None,
            fwd_seeds: vec![[None; 2]; nfwd],
            fwd_sens: vec![None; nfwd],
            adj_seeds: vec![None; nadj],
            adj_sens: vec![[None; 2]; nadj],
        }
    }
}

fn deps_of(args: [u32; 2]) -> [Option<NodeId>; 2] {
    args.map(|a| (a != UNUSED).then_some(NodeId(a)))
}

impl Graph {
    /// Forward-mode sensitivities: `seeds[d][i]` seeds `inputs[i]` in direction
    /// `d`; returns `sens[d][o]` for every output `o`.
    ///
    /// Seeds must have the shape of the input they seed. Outputs that do not
    /// depend on any seed get an empty zero matrix of their shape.
    pub fn jvp(
        &mut self,
        outputs: &[NodeId],
        inputs: &[NodeId],
        seeds: &[Vec<NodeId>],
    ) -> Result<Vec<Vec<NodeId>>, GraphError> {
        self.check_inputs(inputs)?;
        self.check_seeds(inputs, seeds)?;

        let n = self.len();
        let live = self.reachable(outputs)?;
        let nfwd = seeds.len();
        let mut sens: Vec<Vec<Option<NodeId>>> = vec![vec![None; n]; nfwd];
        for (d, dir) in seeds.iter().enumerate() {
            for (&x, &s) in inputs.iter().zip(dir) {
                let sp = self.sparsity(x)?.clone();
                let s = self.project(s, &sp)?;
                sens[d][x.index()] = self.nonempty(s)?;
            }
        }

        for i in 0..n {
            if !live[i] || self.nodes[i].is_input() {
                continue;
            }
            let deps = deps_of(self.nodes[i].args());
            if (0..nfwd).all(|d| deps.iter().flatten().all(|x| sens[d][x.index()].is_none())) {
                continue;
            }
            let mut rw = Rewrite::new(deps, false, nfwd, 0);
            for (d, seeds) in rw.fwd_seeds.iter_mut().enumerate() {
                *seeds = deps.map(|x| x.and_then(|x| sens[d][x.index()]));
            }
            self.rewrite_node(NodeId(i as u32), &mut rw)?;
            for (d, s) in rw.fwd_sens.into_iter().enumerate() {
                sens[d][i] = match s {
                    Some(s) => self.nonempty(s)?,
                    None => None,
                };
            }
        }

        let mut result = Vec::with_capacity(nfwd);
        for dir in &sens {
            let mut row = Vec::with_capacity(outputs.len());
            for &o in outputs {
                row.push(match dir[o.index()] {
                    Some(s) => s,
                    None => self.empty_like(o)?,
                });
            }
            result.push(row);
        }
        log::debug!(
            "jvp: {nfwd} directions, graph grew from {n} to {} nodes",
            self.len()
        );
        Ok(result)
    }

    /// Reverse-mode sensitivities: `seeds[d][o]` seeds `outputs[o]` in
    /// direction `d`; returns `sens[d][i]` for every input `i`, restricted to
    /// the input's sparsity.
    pub fn vjp(
        &mut self,
        outputs: &[NodeId],
        inputs: &[NodeId],
        seeds: &[Vec<NodeId>],
    ) -> Result<Vec<Vec<NodeId>>, GraphError> {
        self.check_inputs(inputs)?;
        self.check_seeds(outputs, seeds)?;

        let n = self.len();
        let live = self.reachable(outputs)?;
        let nadj = seeds.len();
        let mut adj: Vec<Vec<Option<NodeId>>> = vec![vec![None; n]; nadj];
        for (d, dir) in seeds.iter().enumerate() {
            for (&o, &s) in outputs.iter().zip(dir) {
                adj[d][o.index()] = self.accumulate(adj[d][o.index()], s)?;
            }
        }

        for i in (0..n).rev() {
            if !live[i] || self.nodes[i].is_input() {
                continue;
            }
            if adj.iter().all(|dir| dir[i].is_none()) {
                continue;
            }
            let deps = deps_of(self.nodes[i].args());
            let aliased = deps[0].is_some() && deps[0] == deps[1];
            let mut rw = Rewrite::new(deps, false, 0, nadj);
            for d in 0..nadj {
                rw.adj_seeds[d] = adj[d][i].take();
                rw.adj_sens[d][0] = deps[0].and_then(|x| adj[d][x.index()].take());
                if !aliased {
                    rw.adj_sens[d][1] = deps[1].and_then(|x| adj[d][x.index()].take());
                }
            }
            self.rewrite_node(NodeId(i as u32), &mut rw)?;
            for (d, [s0, s1]) in rw.adj_sens.into_iter().enumerate() {
                if let Some(x) = deps[0] {
                    adj[d][x.index()] = s0;
                }
                if let Some(y) = deps[1] {
                    adj[d][y.index()] = match (aliased, s1) {
                        (false, s1) => s1,
                        (true, Some(c)) => self.accumulate(adj[d][y.index()], c)?,
                        (true, None) => adj[d][y.index()],
                    };
                }
            }
        }

        let mut result = Vec::with_capacity(nadj);
        for dir in &adj {
            let mut row = Vec::with_capacity(inputs.len());
            for &x in inputs {
                row.push(match dir[x.index()] {
                    Some(s) => {
                        let sp = self.sparsity(x)?.clone();
                        self.project(s, &sp)?
                    }
                    None => self.empty_like(x)?,
                });
            }
            result.push(row);
        }
        log::debug!(
            "vjp: {nadj} directions, graph grew from {n} to {} nodes",
            self.len()
        );
        Ok(result)
    }

    /// Rebuild `outputs` with every `inputs[i]` replaced by `replacements[i]`.
    ///
    /// A replacement may store fewer entries than the input it replaces;
    /// selections downstream of it shrink accordingly.
    pub fn substitute(
        &mut self,
        outputs: &[NodeId],
        inputs: &[NodeId],
        replacements: &[NodeId],
    ) -> Result<Vec<NodeId>, GraphError> {
        self.check_inputs(inputs)?;
        self.check_seeds(inputs, &[replacements.to_vec()])?;

        let n = self.len();
        let live = self.reachable(outputs)?;
        let mut value: Vec<Option<NodeId>> = vec![None; n];
        for (&x, &r) in inputs.iter().zip(replacements) {
            value[x.index()] = Some(r);
        }

        for i in 0..n {
            if !live[i] {
                continue;
            }
            let id = NodeId(i as u32);
            if self.nodes[i].is_input() {
                value[i].get_or_insert(id);
                continue;
            }
            let deps = deps_of(self.nodes[i].args());
            let args = deps.map(|x| x.and_then(|x| value[x.index()]));
            if args == deps {
                value[i] = Some(id);
                continue;
            }
            let mut rw = Rewrite::new(args, true, 0, 0);
            self.rewrite_node(id, &mut rw)?;
            value[i] = rw.output;
        }

        outputs
            .iter()
            .map(|&o| value[o.index()].ok_or(GraphError::MissingDependency(o.0)))
            .collect()
    }

    // ── Validation ──

    fn check_inputs(&self, inputs: &[NodeId]) -> Result<(), GraphError> {
        let mut seen = HashSet::new();
        for &x in inputs {
            match &self.node(x)?.op {
                Op::Input { name } => {
                    if !seen.insert(x) {
                        return Err(GraphError::DuplicateInput(name.clone()));
                    }
                }
                _ => return Err(GraphError::NotAnInput(x.0)),
            }
        }
        Ok(())
    }

    /// Every direction must hold one node per target, of the target's shape.
    fn check_seeds(&self, targets: &[NodeId], seeds: &[Vec<NodeId>]) -> Result<(), GraphError> {
        for dir in seeds {
            if dir.len() != targets.len() {
                return Err(GraphError::ArgumentCount {
                    expected: targets.len(),
                    found: dir.len(),
                });
            }
            for (&t, &s) in targets.iter().zip(dir) {
                self.sparsity(s)?.check_same_shape(self.sparsity(t)?)?;
            }
        }
        Ok(())
    }

    fn nonempty(&self, id: NodeId) -> Result<Option<NodeId>, GraphError> {
        Ok((self.sparsity(id)?.nnz() > 0).then_some(id))
    }

    fn empty_like(&mut self, id: NodeId) -> Result<NodeId, GraphError> {
        let (nrow, ncol) = self.sparsity(id)?.shape();
        Ok(self.zeros(Sparsity::empty(nrow, ncol)))
    }

    // ── Per-kind rules ──

    fn rewrite_node(&mut self, id: NodeId, rw: &mut Rewrite) -> Result<(), GraphError> {
        let node = self.nodes[id.index()].clone();
        match &node.op {
            Op::Input { .. } | Op::Constant { .. } | Op::Zeros => {
                if rw.want_output {
                    rw.output = Some(id);
                }
                rw.adj_seeds.iter_mut().for_each(|s| *s = None);
                Ok(())
            }
            Op::Unary { op, .. } => self.rewrite_unary(*op, &node.sparsity, rw),
            Op::Binary(b) => self.rewrite_binary(b.op(), &node.sparsity, rw),
            Op::Select(s) => s.rewrite(self, &node.sparsity, rw),
        }
    }

    fn rewrite_unary(
        &mut self,
        op: UnaryOp,
        sp: &Sparsity,
        rw: &mut Rewrite,
    ) -> Result<(), GraphError> {
        let x = rw.args[0];
        if rw.want_output {
            rw.output = Some(match x {
                Some(x) => self.unary(op, x)?,
                None => self.zeros(Sparsity::empty(sp.nrow(), sp.ncol())),
            });
        }
        let Some(x) = x else {
            rw.adj_seeds.iter_mut().for_each(|s| *s = None);
            return Ok(());
        };

        for d in 0..rw.fwd_seeds.len() {
            if let Some(seed) = rw.fwd_seeds[d][0] {
                let seed = self.project(seed, sp)?;
                rw.fwd_sens[d] = Some(self.scale_unary(op, x, seed)?);
            }
        }
        for d in 0..rw.adj_seeds.len() {
            if let Some(seed) = rw.adj_seeds[d].take() {
                let seed = self.project(seed, sp)?;
                let contrib = self.scale_unary(op, x, seed)?;
                rw.adj_sens[d][0] = self.accumulate(rw.adj_sens[d][0], contrib)?;
            }
        }
        Ok(())
    }

    /// `op'(x) * seed`.
    fn scale_unary(&mut self, op: UnaryOp, x: NodeId, seed: NodeId) -> Result<NodeId, GraphError> {
        let factor = match op {
            UnaryOp::Neg => return self.neg(seed),
            UnaryOp::Sin => self.cos(x)?,
            UnaryOp::Cos => {
                let s = self.sin(x)?;
                self.neg(s)?
            }
            UnaryOp::Exp => self.exp(x)?,
            UnaryOp::Sq => self.add(x, x)?,
        };
        self.mul(factor, seed)
    }

    fn rewrite_binary(
        &mut self,
        op: BinaryOp,
        sp: &Sparsity,
        rw: &mut Rewrite,
    ) -> Result<(), GraphError> {
        let [a, b] = rw.args;
        if rw.want_output {
            rw.output = Some(match (a, b) {
                (Some(a), Some(b)) => self.binary(op, a, b)?,
                _ => self.zeros(Sparsity::empty(sp.nrow(), sp.ncol())),
            });
        }
        let (Some(a), Some(b)) = (a, b) else {
            rw.adj_seeds.iter_mut().for_each(|s| *s = None);
            return Ok(());
        };
        let (asp, bsp) = (self.sparsity(a)?.clone(), self.sparsity(b)?.clone());

        for d in 0..rw.fwd_seeds.len() {
            let [sa, sb] = rw.fwd_seeds[d];
            let sa = sa.map(|s| self.project(s, &asp)).transpose()?;
            let sb = sb.map(|s| self.project(s, &bsp)).transpose()?;
            let (ta, tb) = match op {
                BinaryOp::Add => (sa, sb),
                BinaryOp::Sub => (sa, sb.map(|s| self.neg(s)).transpose()?),
                BinaryOp::Mul => (
                    sa.map(|s| self.mul(b, s)).transpose()?,
                    sb.map(|s| self.mul(a, s)).transpose()?,
                ),
            };
            rw.fwd_sens[d] = match (ta, tb) {
                (Some(ta), Some(tb)) => Some(self.add(ta, tb)?),
                (ta, tb) => ta.or(tb),
            };
        }

        for d in 0..rw.adj_seeds.len() {
            let Some(seed) = rw.adj_seeds[d].take() else {
                continue;
            };
            let seed = self.project(seed, sp)?;
            let (ca, cb) = match op {
                BinaryOp::Add => (self.project(seed, &asp)?, self.project(seed, &bsp)?),
                BinaryOp::Sub => {
                    let cb = self.project(seed, &bsp)?;
                    (self.project(seed, &asp)?, self.neg(cb)?)
                }
                BinaryOp::Mul => (self.mul(seed, b)?, self.mul(seed, a)?),
            };
            rw.adj_sens[d][0] = self.accumulate(rw.adj_sens[d][0], ca)?;
            rw.adj_sens[d][1] = self.accumulate(rw.adj_sens[d][1], cb)?;
        }
        Ok(())
    }
}
