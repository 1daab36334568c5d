//! Compiled functions and their evaluators.
//!
//! A [`Function`] is a self-contained, immutable slice of a [`Graph`]: the
//! nodes reachable from its outputs, compacted so that dependency handles
//! index into its own node list. It can be shared freely between threads.
//!
//! Numeric passes run through an [`Evaluator`], which owns one buffer per
//! node and is reused across calls. Independent evaluators over the same
//! function never share mutable state.

use std::collections::HashSet;

use crate::error::GraphError;
use crate::float::Float;
use crate::graph::Graph;
use crate::node::{Node, NodeId, Op, UNUSED};
use crate::sparsity::Sparsity;

mod codegen;
mod forward;
#[cfg(feature = "parallel")]
mod parallel;
mod reverse;
mod sparse;

/// A compiled graph slice with designated inputs and outputs.
#[derive(Clone, Debug)]
pub struct Function {
    name: String,
    nodes: Vec<Node>,
    inputs: Vec<u32>,
    outputs: Vec<u32>,
}

impl Function {
    /// Compile the part of `graph` that `outputs` depend on.
    ///
    /// `inputs` must be distinct input nodes, and every input node reachable
    /// from `outputs` must be among them.
    pub fn new(
        name: impl Into<String>,
        graph: &Graph,
        inputs: &[NodeId],
        outputs: &[NodeId],
    ) -> Result<Self, GraphError> {
        let name = name.into();

        let mut seen = HashSet::new();
        for &x in inputs {
            match graph.node(x)?.op() {
                Op::Input { name } => {
                    if !seen.insert(x) {
                        return Err(GraphError::DuplicateInput(name.clone()));
                    }
                }
                _ => return Err(GraphError::NotAnInput(x.0)),
            }
        }

        let mut roots = outputs.to_vec();
        roots.extend_from_slice(inputs);
        let live = graph.reachable(&roots)?;

        let all = graph.nodes();
        for (i, node) in all.iter().enumerate() {
            if let Op::Input { name } = node.op() {
                if live[i] && !seen.contains(&NodeId(i as u32)) {
                    return Err(GraphError::FreeVariable(name.clone()));
                }
            }
        }

        // Build remap: graph index -> function index.
        let mut remap = vec![UNUSED; all.len()];
        let mut nodes = Vec::with_capacity(live.iter().filter(|&&l| l).count());
        for (i, node) in all.iter().enumerate() {
            if live[i] {
                remap[i] = nodes.len() as u32;
                let mut node = node.clone();
                node.remap_args(&remap);
                nodes.push(node);
            }
        }

        let inputs: Vec<u32> = inputs.iter().map(|x| remap[x.index()]).collect();
        let outputs: Vec<u32> = outputs.iter().map(|o| remap[o.index()]).collect();
        log::debug!(
            "compiled function `{name}`: {} of {} nodes, {} inputs, {} outputs",
            nodes.len(),
            all.len(),
            inputs.len(),
            outputs.len()
        );
        Ok(Function {
            name,
            nodes,
            inputs,
            outputs,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of compiled nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn n_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn n_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn input_sparsity(&self, i: usize) -> &Sparsity {
        &self.nodes[self.inputs[i] as usize].sparsity
    }

    pub fn output_sparsity(&self, o: usize) -> &Sparsity {
        &self.nodes[self.outputs[o] as usize].sparsity
    }

    /// Fresh evaluator with its own buffers.
    pub fn evaluator<F: Float>(&self) -> Evaluator<'_, F> {
        Evaluator::new(self)
    }

    /// One-shot value evaluation.
    pub fn eval<F: Float>(&self, args: &[&[F]]) -> Vec<Vec<F>> {
        self.evaluator().eval(args)
    }

    /// One-shot forward-mode evaluation: `seeds[d][i]` seeds input `i` in
    /// direction `d`. Returns `(outputs, sens[d][o])`.
    pub fn jvp<F: Float>(
        &self,
        args: &[&[F]],
        seeds: &[Vec<&[F]>],
    ) -> (Vec<Vec<F>>, Vec<Vec<Vec<F>>>) {
        self.evaluator().forward(args, seeds)
    }

    /// One-shot reverse-mode evaluation: `seeds[d][o]` seeds output `o` in
    /// direction `d`. Returns `(outputs, sens[d][i])`.
    pub fn vjp<F: Float>(
        &self,
        args: &[&[F]],
        seeds: &[Vec<&[F]>],
    ) -> (Vec<Vec<F>>, Vec<Vec<Vec<F>>>) {
        self.evaluator().reverse(args, seeds)
    }

    fn check_args<F>(&self, args: &[&[F]]) {
        assert_eq!(args.len(), self.inputs.len(), "wrong number of inputs");
        for (i, (arg, &x)) in args.iter().zip(&self.inputs).enumerate() {
            assert_eq!(
                arg.len(),
                self.nodes[x as usize].sparsity.nnz(),
                "input {i} has wrong number of nonzeros"
            );
        }
    }
}

/// Per-thread evaluation state for a [`Function`]: one value buffer and one
/// sensitivity buffer per node.
pub struct Evaluator<'a, F: Float> {
    function: &'a Function,
    values: Vec<Vec<F>>,
    sens: Vec<Vec<F>>,
}

impl<'a, F: Float> Evaluator<'a, F> {
    pub fn new(function: &'a Function) -> Self {
        let values: Vec<Vec<F>> = function
            .nodes
            .iter()
            .map(|n| vec![F::zero(); n.sparsity.nnz()])
            .collect();
        Evaluator {
            function,
            sens: values.clone(),
            values,
        }
    }

    pub fn function(&self) -> &'a Function {
        self.function
    }

    fn outputs(&self) -> Vec<Vec<F>> {
        self.function
            .outputs
            .iter()
            .map(|&o| self.values[o as usize].clone())
            .collect()
    }
}
