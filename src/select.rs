//! Nonzero selection and scatter.
//!
//! A [`SelectNode`] reindexes the stored entries of a single dependency into
//! a new sparsity pattern. It comes in two forms:
//!
//! - **gather** (`accumulate = false`): `out[k] = in[assign[k]]`. The table
//!   has one entry per output nonzero; entries may repeat and need not cover
//!   every dependency nonzero.
//! - **scatter** (`accumulate = true`): `out = 0; out[assign[j]] += in[j]`.
//!   The table has one entry per dependency nonzero. This is the transpose of
//!   a gather and is what adjoint rewrites produce when several seed entries
//!   land on the same dependency nonzero.
//!
//! Both forms are described by the same runtime table of
//! `(source nonzero, output nonzero)` pairs, which drives the derivative
//! rewrite and code emission.

use crate::bits::BitBuffer;
use crate::codegen::{Accumulate, CodeGenerator, Statement};
use crate::error::GraphError;
use crate::float::Float;
use crate::graph::derivative::Rewrite;
use crate::graph::Graph;
use crate::node::NodeId;
use crate::sparsity::{Sparsity, NOT_FOUND};

#[derive(Clone, Debug)]
pub struct SelectNode {
    dep: NodeId,
    assign: Vec<usize>,
    accumulate: bool,
    /// `(source nonzero, output nonzero)` pairs in table order.
    assign2: Vec<(usize, usize)>,
}

impl SelectNode {
    /// Check `assign` against both patterns and build the runtime table.
    pub(crate) fn new(
        sp: &Sparsity,
        dep: NodeId,
        dep_sp: &Sparsity,
        assign: Vec<usize>,
        accumulate: bool,
    ) -> Result<Self, GraphError> {
        // Gather tables are indexed by output nonzeros, scatter tables by
        // dependency nonzeros.
        let (len, range) = if accumulate {
            (dep_sp.nnz(), sp.nnz())
        } else {
            (sp.nnz(), dep_sp.nnz())
        };
        if assign.len() != len {
            return Err(GraphError::IndexTableLength {
                expected: len,
                found: assign.len(),
            });
        }
        if let Some(&index) = assign.iter().find(|&&a| a >= range) {
            return Err(GraphError::NonzeroOutOfRange { index, nnz: range });
        }

        let assign2 = if accumulate {
            assign.iter().enumerate().map(|(j, &a)| (j, a)).collect()
        } else {
            assign.iter().enumerate().map(|(k, &a)| (a, k)).collect()
        };
        Ok(SelectNode {
            dep,
            assign,
            accumulate,
            assign2,
        })
    }

    #[inline]
    pub fn dependency(&self) -> NodeId {
        self.dep
    }

    #[inline]
    pub fn assign(&self) -> &[usize] {
        &self.assign
    }

    #[inline]
    pub fn is_scatter(&self) -> bool {
        self.accumulate
    }

    /// `(source nonzero, output nonzero)` pairs.
    #[inline]
    pub fn pairs(&self) -> &[(usize, usize)] {
        &self.assign2
    }

    pub(crate) fn remap_dependency(&mut self, remap: &[u32]) {
        self.dep = NodeId(remap[self.dep.index()]);
    }

    /// True if the node passes its dependency through unchanged.
    pub fn is_identity(&self, sp: &Sparsity, dep_sp: &Sparsity) -> bool {
        sp == dep_sp && self.assign.iter().enumerate().all(|(k, &a)| a == k)
    }

    // ── Numeric modes ──

    /// Value mode. Does nothing unless both buffers are supplied.
    pub fn eval<F: Float>(&self, input: Option<&[F]>, output: Option<&mut [F]>) {
        let (Some(input), Some(output)) = (input, output) else {
            return;
        };
        if self.accumulate {
            output.fill(F::zero());
            for (&v, &a) in input.iter().zip(&self.assign) {
                output[a] = output[a] + v;
            }
        } else {
            for (o, &a) in output.iter_mut().zip(&self.assign) {
                *o = input[a];
            }
        }
    }

    /// Forward mode for one direction. The map is linear, so this is the value
    /// formula applied to the seed.
    #[inline]
    pub fn forward<F: Float>(&self, seed: Option<&[F]>, sens: Option<&mut [F]>) {
        self.eval(seed, sens);
    }

    /// Adjoint mode for one direction.
    ///
    /// Accumulates `seed` into `sens` (indexed by dependency nonzeros) in
    /// ascending output-nonzero order, then clears `seed`. A supplied seed is
    /// cleared even when `sens` is absent.
    pub fn adjoint<F: Float>(&self, seed: Option<&mut [F]>, sens: Option<&mut [F]>) {
        let Some(seed) = seed else {
            return;
        };
        let Some(sens) = sens else {
            seed.fill(F::zero());
            return;
        };
        if self.accumulate {
            for (j, &a) in self.assign.iter().enumerate() {
                sens[j] = sens[j] + seed[a];
            }
            seed.fill(F::zero());
        } else {
            for (k, &a) in self.assign.iter().enumerate() {
                sens[a] = sens[a] + seed[k];
                seed[k] = F::zero();
            }
        }
    }

    // ── Structural modes ──

    pub(crate) fn propagate_forward(&self, input: &BitBuffer, output: &mut BitBuffer) {
        if self.accumulate {
            output.clear();
            for (j, &a) in self.assign.iter().enumerate() {
                output.or(a, input.get(j));
            }
        } else {
            for (k, &a) in self.assign.iter().enumerate() {
                output.set(k, input.get(a));
            }
        }
    }

    /// Boolean shadow of [`adjoint`](Self::adjoint): ORs `seed` into `dep`
    /// and clears `seed`.
    pub(crate) fn propagate_backward(&self, dep: &mut BitBuffer, seed: &mut BitBuffer) {
        if self.accumulate {
            for (j, &a) in self.assign.iter().enumerate() {
                dep.or(j, seed.get(a));
            }
            seed.clear();
        } else {
            for (k, &a) in self.assign.iter().enumerate() {
                dep.or(a, seed.get(k));
                seed.set(k, 0);
            }
        }
    }

    // ── Symbolic rewrite ──

    /// Pair indices sorted by source nonzero, stable among equal sources.
    pub(crate) fn order_by_source(&self, dep_nnz: usize) -> Vec<usize> {
        let mut offset = vec![0usize; dep_nnz + 1];
        for &(src, _) in &self.assign2 {
            offset[src + 1] += 1;
        }
        for i in 0..dep_nnz {
            offset[i + 1] += offset[i];
        }
        let mut order = vec![0usize; self.assign2.len()];
        for (p, &(src, _)) in self.assign2.iter().enumerate() {
            order[offset[src]] = p;
            offset[src] += 1;
        }
        order
    }

    /// Build the value, forward and adjoint graph fragments of this node,
    /// restricted to the entries that the available nodes actually store.
    ///
    /// Adjoint seeds in `rw` are always taken, whether or not they
    /// contribute.
    pub(crate) fn rewrite(
        &self,
        graph: &mut Graph,
        sp: &Sparsity,
        rw: &mut Rewrite,
    ) -> Result<(), GraphError> {
        let dep_sp = graph.sparsity(self.dep)?.clone();
        let (orow, ocol) = (sp.row(), sp.col_of_nonzeros());
        let (irow, icol) = (dep_sp.row(), dep_sp.col_of_nonzeros());
        let element = |nrow: usize, r: usize, c: usize| (r + c * nrow) as i64;

        let order = self.order_by_source(dep_sp.nnz());
        let el_known: Vec<i64> = order
            .iter()
            .map(|&p| {
                let src = self.assign2[p].0;
                element(dep_sp.nrow(), irow[src], icol[src])
            })
            .collect();

        // Surviving pairs of a lookup against `source`, keyed on source
        // coordinates and placed at output coordinates.
        let gather_known = |graph: &mut Graph, source: NodeId| -> Result<NodeId, GraphError> {
            let mut temp = el_known.clone();
            graph.sparsity(source)?.get_nz_inplace(&mut temp);
            let (mut src_nz, mut rows, mut cols) = (Vec::new(), Vec::new(), Vec::new());
            for (k, &nz) in temp.iter().enumerate() {
                if nz != NOT_FOUND {
                    let dst = self.assign2[order[k]].1;
                    src_nz.push(nz as usize);
                    rows.push(orow[dst]);
                    cols.push(ocol[dst]);
                }
            }
            log::trace!(
                "select rewrite: {} of {} entries available in {source}",
                src_nz.len(),
                temp.len()
            );
            assemble(graph, sp.nrow(), sp.ncol(), source, &src_nz, &rows, &cols)
        };

        if rw.want_output {
            rw.output = Some(match rw.args[0] {
                Some(value) => gather_known(graph, value)?,
                None => graph.zeros(Sparsity::empty(sp.nrow(), sp.ncol())),
            });
        }

        for d in 0..rw.fwd_seeds.len() {
            rw.fwd_sens[d] = match (rw.args[0], rw.fwd_seeds[d][0]) {
                (Some(_), Some(seed)) => Some(gather_known(graph, seed)?),
                _ => None,
            };
        }

        let el_wanted: Vec<i64> = self
            .assign2
            .iter()
            .map(|&(_, dst)| element(sp.nrow(), orow[dst], ocol[dst]))
            .collect();
        for d in 0..rw.adj_seeds.len() {
            let Some(seed) = rw.adj_seeds[d].take() else {
                continue;
            };
            if rw.args[0].is_none() {
                continue;
            }
            let mut temp = el_wanted.clone();
            graph.sparsity(seed)?.get_nz_inplace(&mut temp);
            let (mut seed_nz, mut rows, mut cols) = (Vec::new(), Vec::new(), Vec::new());
            for (k, &nz) in temp.iter().enumerate() {
                if nz != NOT_FOUND {
                    let src = self.assign2[k].0;
                    seed_nz.push(nz as usize);
                    rows.push(irow[src]);
                    cols.push(icol[src]);
                }
            }
            log::trace!(
                "select adjoint: {} of {} seed entries present in {seed}",
                seed_nz.len(),
                temp.len()
            );
            if seed_nz.is_empty() {
                continue;
            }
            let contrib = assemble(
                graph,
                dep_sp.nrow(),
                dep_sp.ncol(),
                seed,
                &seed_nz,
                &rows,
                &cols,
            )?;
            rw.adj_sens[d][0] = graph.accumulate(rw.adj_sens[d][0], contrib)?;
        }
        Ok(())
    }

    // ── Code generation ──

    /// A gather writes each output nonzero once, so it stores directly. A
    /// scatter zero-fills and accumulates.
    pub(crate) fn emit(&self, gen: &mut CodeGenerator, res: usize, len: usize) {
        let sign = if self.accumulate {
            gen.push(Statement::Fill {
                res,
                len,
                value: 0.0,
            });
            Accumulate::Add
        } else {
            Accumulate::Assign
        };
        let (src, dst): (Vec<usize>, Vec<usize>) = self.assign2.iter().copied().unzip();
        let src = gen.add_int_constant(&src);
        let dst = gen.add_int_constant(&dst);
        gen.push(Statement::Indexed {
            res,
            arg: self.dep.index(),
            len: self.assign2.len(),
            src,
            dst,
            sign,
        });
    }
}

/// Place `source[src_nz[j]]` at `(rows[j], cols[j])` of a new `nrow`-by-`ncol`
/// node. Coordinates hit more than once are summed through a scatter.
fn assemble(
    graph: &mut Graph,
    nrow: usize,
    ncol: usize,
    source: NodeId,
    src_nz: &[usize],
    rows: &[usize],
    cols: &[usize],
) -> Result<NodeId, GraphError> {
    if src_nz.is_empty() {
        return Ok(graph.zeros(Sparsity::empty(nrow, ncol)));
    }
    let (sp, mapping) = Sparsity::triplet_with_mapping(nrow, ncol, rows, cols)?;
    if sp.nnz() == src_nz.len() {
        let mut table = vec![0usize; sp.nnz()];
        for (&m, &nz) in mapping.iter().zip(src_nz) {
            table[m] = nz;
        }
        graph.select(sp, source, table)
    } else {
        let picked = graph.select(Sparsity::column(src_nz.len()), source, src_nz.to_vec())?;
        graph.scatter(sp, picked, mapping)
    }
}
