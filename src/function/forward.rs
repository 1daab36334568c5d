use crate::float::Float;

impl<F: Float> super::Evaluator<'_, F> {
    /// Evaluate all nodes at `args` (one buffer of nonzeros per input).
    ///
    /// # Panics
    /// Panics if the number of arguments or their lengths do not match the
    /// function's inputs.
    pub fn eval(&mut self, args: &[&[F]]) -> Vec<Vec<F>> {
        self.sweep_values(args);
        self.outputs()
    }

    /// Value sweep; leaves every node's value buffer filled.
    pub(crate) fn sweep_values(&mut self, args: &[&[F]]) {
        let function = self.function;
        function.check_args(args);

        for (arg, &x) in args.iter().zip(&function.inputs) {
            self.values[x as usize].copy_from_slice(arg);
        }
        for (i, node) in function.nodes.iter().enumerate() {
            if node.is_input() {
                continue;
            }
            let mut out = std::mem::take(&mut self.values[i]);
            node.eval_value(&self.values, &mut out);
            self.values[i] = out;
        }
    }

    /// Forward mode: values at `args`, then one sensitivity sweep per
    /// direction. `seeds[d][i]` seeds input `i`; returns
    /// `(outputs, sens[d][o])`.
    pub fn forward(
        &mut self,
        args: &[&[F]],
        seeds: &[Vec<&[F]>],
    ) -> (Vec<Vec<F>>, Vec<Vec<Vec<F>>>) {
        self.sweep_values(args);
        let function = self.function;

        let mut result = Vec::with_capacity(seeds.len());
        for dir in seeds {
            function.check_args(dir);
            for (seed, &x) in dir.iter().zip(&function.inputs) {
                self.sens[x as usize].copy_from_slice(seed);
            }
            for (i, node) in function.nodes.iter().enumerate() {
                if node.is_input() {
                    continue;
                }
                let mut out = std::mem::take(&mut self.sens[i]);
                node.eval_forward(&self.values, &self.sens, &mut out);
                self.sens[i] = out;
            }
            result.push(
                function
                    .outputs
                    .iter()
                    .map(|&o| self.sens[o as usize].clone())
                    .collect(),
            );
        }
        (self.outputs(), result)
    }
}
