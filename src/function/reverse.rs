use crate::float::Float;

impl<F: Float> super::Evaluator<'_, F> {
    /// Reverse mode: values at `args`, then one adjoint sweep per direction.
    /// `seeds[d][o]` seeds output `o`; returns `(outputs, sens[d][i])`.
    ///
    /// Adjoints are accumulated into each node's sensitivity buffer, so
    /// nodes with several consumers (and outputs listed twice) receive the
    /// sum of all contributions.
    ///
    /// # Panics
    /// Panics if the argument or seed counts or lengths do not match.
    pub fn reverse(
        &mut self,
        args: &[&[F]],
        seeds: &[Vec<&[F]>],
    ) -> (Vec<Vec<F>>, Vec<Vec<Vec<F>>>) {
        self.sweep_values(args);
        let function = self.function;

        let mut result = Vec::with_capacity(seeds.len());
        for dir in seeds {
            assert_eq!(
                dir.len(),
                function.outputs.len(),
                "wrong number of adjoint seeds"
            );
            for buf in &mut self.sens {
                buf.fill(F::zero());
            }
            for (seed, &o) in dir.iter().zip(&function.outputs) {
                let buf = &mut self.sens[o as usize];
                assert_eq!(seed.len(), buf.len(), "adjoint seed has wrong length");
                for (s, &v) in buf.iter_mut().zip(seed.iter()) {
                    *s = *s + v;
                }
            }

            for i in (0..function.nodes.len()).rev() {
                let node = &function.nodes[i];
                if node.is_input() || self.sens[i].iter().all(|v| v.is_zero()) {
                    continue;
                }
                let mut seed = std::mem::take(&mut self.sens[i]);
                node.eval_adjoint(&self.values, &mut seed, &mut self.sens);
                self.sens[i] = seed;
            }

            result.push(
                function
                    .inputs
                    .iter()
                    .map(|&x| self.sens[x as usize].clone())
                    .collect(),
            );
        }
        (self.outputs(), result)
    }
}
