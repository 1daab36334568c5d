use crate::codegen::{CodeGenerator, CodegenOptions, GeneratedCode, Statement};

impl super::Function {
    /// Lower the compiled nodes to flat-buffer statements.
    ///
    /// Work buffer `i` belongs to node `i`; inputs are copied from the
    /// argument buffers and outputs copied to the result buffers.
    pub fn generate(&self, options: CodegenOptions) -> GeneratedCode {
        let mut gen = CodeGenerator::new(options);
        let comments = gen.options().comments;

        for (res, node) in self.nodes.iter().enumerate() {
            if comments {
                gen.push(Statement::Comment(format!("w{res}: {}", node.label())));
            }
            if let Some(input) = self.inputs.iter().position(|&x| x as usize == res) {
                gen.push(Statement::Input {
                    res,
                    input,
                    len: node.sparsity.nnz(),
                });
            } else {
                node.emit(&mut gen, res);
            }
        }
        for (output, &o) in self.outputs.iter().enumerate() {
            gen.push(Statement::Output {
                output,
                arg: o as usize,
                len: self.nodes[o as usize].sparsity.nnz(),
            });
        }

        let work_sizes: Vec<usize> = self.nodes.iter().map(|n| n.sparsity.nnz()).collect();
        let input_sizes = self
            .inputs
            .iter()
            .map(|&x| work_sizes[x as usize])
            .collect();
        let output_sizes = self
            .outputs
            .iter()
            .map(|&o| work_sizes[o as usize])
            .collect();
        let code = gen.finish(work_sizes, input_sizes, output_sizes);
        log::debug!(
            "generated `{}`: {} statements, {} index tables, {} real tables",
            self.name,
            code.statements().len(),
            code.int_constants().len(),
            code.real_constants().len()
        );
        code
    }
}
