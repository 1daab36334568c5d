//! Structural dependency propagation and Jacobian sparsity.
//!
//! These passes run every node's bitset mode instead of its numeric mode. A
//! bit set in a slot means "may be structurally nonzero / may depend on seed
//! direction `b`". The backward pass is the boolean shadow of the adjoint
//! sweep and follows the same consume-and-clear discipline.

use crate::bits::{BitBuffer, BVEC_BITS};
use crate::sparsity::Sparsity;

impl super::Function {
    fn bit_buffers(&self) -> Vec<BitBuffer> {
        self.nodes
            .iter()
            .map(|n| BitBuffer::zeros(n.sparsity.nnz()))
            .collect()
    }

    /// Forward propagation: `input_bits[i]` marks the slots of input `i`;
    /// returns the marked slots of every output.
    ///
    /// # Panics
    /// Panics if the buffer count or lengths do not match the inputs.
    pub fn propagate_forward(&self, input_bits: &[BitBuffer]) -> Vec<BitBuffer> {
        assert_eq!(input_bits.len(), self.inputs.len(), "wrong number of inputs");
        let mut bits = self.bit_buffers();
        for (b, &x) in input_bits.iter().zip(&self.inputs) {
            assert_eq!(b.len(), bits[x as usize].len(), "input bitset has wrong length");
            bits[x as usize] = b.clone();
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if node.is_input() {
                continue;
            }
            let mut out = std::mem::take(&mut bits[i]);
            node.propagate_forward(&bits, &mut out);
            bits[i] = out;
        }
        self.outputs.iter().map(|&o| bits[o as usize].clone()).collect()
    }

    /// Backward propagation: `output_bits[o]` marks the slots of output `o`;
    /// returns the input slots they depend on.
    ///
    /// # Panics
    /// Panics if the buffer count or lengths do not match the outputs.
    pub fn propagate_backward(&self, output_bits: &[BitBuffer]) -> Vec<BitBuffer> {
        assert_eq!(output_bits.len(), self.outputs.len(), "wrong number of outputs");
        let mut bits = self.bit_buffers();
        for (b, &o) in output_bits.iter().zip(&self.outputs) {
            let dst = &mut bits[o as usize];
            assert_eq!(b.len(), dst.len(), "output bitset has wrong length");
            for k in 0..b.len() {
                dst.or(k, b.get(k));
            }
        }
        for i in (0..self.nodes.len()).rev() {
            let node = &self.nodes[i];
            if node.is_input() || !bits[i].any() {
                continue;
            }
            let mut seed = std::mem::take(&mut bits[i]);
            node.propagate_backward(&mut seed, &mut bits);
            bits[i] = seed;
        }
        self.inputs.iter().map(|&x| bits[x as usize].clone()).collect()
    }

    /// Jacobian sparsity of output `oind` with respect to input `iind`:
    /// an `nnz(out)`-by-`nnz(in)` pattern. Propagates in whichever direction
    /// needs fewer sweeps.
    pub fn jac_sparsity(&self, iind: usize, oind: usize) -> Sparsity {
        if self.input_sparsity(iind).nnz() <= self.output_sparsity(oind).nnz() {
            self.jac_sparsity_forward(iind, oind)
        } else {
            self.jac_sparsity_reverse(iind, oind)
        }
    }

    /// [`jac_sparsity`](Self::jac_sparsity) by forward sweeps, one per
    /// [`BVEC_BITS`] input nonzeros.
    pub fn jac_sparsity_forward(&self, iind: usize, oind: usize) -> Sparsity {
        let n_in = self.input_sparsity(iind).nnz();
        let n_out = self.output_sparsity(oind).nnz();
        let mut columns = vec![Vec::new(); n_in];

        let mut seeds: Vec<BitBuffer> = (0..self.inputs.len())
            .map(|i| BitBuffer::zeros(self.input_sparsity(i).nnz()))
            .collect();
        for start in (0..n_in).step_by(BVEC_BITS) {
            let end = (start + BVEC_BITS).min(n_in);
            seeds[iind].clear();
            for j in start..end {
                seeds[iind].set(j, 1 << (j - start));
            }
            let out = self.propagate_forward(&seeds);
            let out = &out[oind];
            for r in 0..n_out {
                let w = out.get(r);
                for b in 0..end - start {
                    if w & (1 << b) != 0 {
                        columns[start + b].push(r);
                    }
                }
            }
        }
        log::debug!(
            "forward jacobian sparsity of `{}` ({oind}, {iind}): {} sweeps",
            self.name,
            n_in.div_ceil(BVEC_BITS)
        );
        Sparsity::from_column_rows(n_out, columns)
    }

    /// [`jac_sparsity`](Self::jac_sparsity) by backward sweeps, one per
    /// [`BVEC_BITS`] output nonzeros.
    pub fn jac_sparsity_reverse(&self, iind: usize, oind: usize) -> Sparsity {
        let n_in = self.input_sparsity(iind).nnz();
        let n_out = self.output_sparsity(oind).nnz();
        let mut columns = vec![Vec::new(); n_in];

        let mut seeds: Vec<BitBuffer> = (0..self.outputs.len())
            .map(|o| BitBuffer::zeros(self.output_sparsity(o).nnz()))
            .collect();
        for start in (0..n_out).step_by(BVEC_BITS) {
            let end = (start + BVEC_BITS).min(n_out);
            seeds[oind].clear();
            for r in start..end {
                seeds[oind].set(r, 1 << (r - start));
            }
            let sens = self.propagate_backward(&seeds);
            let sens = &sens[iind];
            for (c, rows) in columns.iter_mut().enumerate() {
                let w = sens.get(c);
                for b in 0..end - start {
                    if w & (1 << b) != 0 {
                        rows.push(start + b);
                    }
                }
            }
        }
        log::debug!(
            "reverse jacobian sparsity of `{}` ({oind}, {iind}): {} sweeps",
            self.name,
            n_out.div_ceil(BVEC_BITS)
        );
        Sparsity::from_column_rows(n_out, columns)
    }
}
