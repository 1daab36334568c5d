use rayon::prelude::*;

use crate::float::Float;

impl super::Function {
    /// Evaluate many argument sets in parallel.
    ///
    /// Each rayon task owns its own [`Evaluator`](super::Evaluator); the
    /// function itself is shared read-only. `batch[s][i]` is input `i` of
    /// sample `s`, and the result is indexed the same way by output.
    pub fn eval_batch<F: Float>(&self, batch: &[Vec<Vec<F>>]) -> Vec<Vec<Vec<F>>> {
        batch
            .par_iter()
            .map_init(
                || self.evaluator::<F>(),
                |ev, args| {
                    let args: Vec<&[F]> = args.iter().map(Vec::as_slice).collect();
                    ev.eval(&args)
                },
            )
            .collect()
    }
}
