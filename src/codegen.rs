//! Flat-buffer code generation.
//!
//! Every node of a compiled function owns one work buffer (`w<node>`) sized to
//! its nonzero count. Nodes emit [`Statement`]s that read and write those
//! buffers through constant index tables held by the [`CodeGenerator`]; the
//! tables are deduplicated by content. The finished [`GeneratedCode`] renders a
//! C-like translation unit and can also execute itself, which is how the
//! emitted code is checked against direct evaluation.

use std::collections::HashMap;
use std::fmt::{self, Write as _};

use crate::float::{cast, Float};
use crate::opcode::{self, UnaryOp};

/// Options for [`crate::Function::generate`].
#[derive(Debug, Clone)]
pub struct CodegenOptions {
    /// Name of the emitted entry point (default: `"eval"`).
    pub function_name: String,
    /// Floating-point type of the emitted buffers (default: `"double"`).
    pub real_type: String,
    /// Integer type of the emitted index tables (default: `"int"`).
    pub int_type: String,
    /// Emit one comment per node (default: `true`).
    pub comments: bool,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        CodegenOptions {
            function_name: "eval".to_string(),
            real_type: "double".to_string(),
            int_type: "int".to_string(),
            comments: true,
        }
    }
}

/// How an indexed statement writes into its target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Accumulate {
    /// Plain store. Only valid when every target slot is hit exactly once.
    Assign,
    Add,
    Sub,
}

/// One flat-buffer statement. Buffer fields are work-buffer indices; `src`,
/// `dst`, `lhs_idx`, `rhs_idx` refer to integer constant tables and
/// `constant` to a real constant table.
#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    Comment(String),
    /// `w[res][i] = value` for `i < len`.
    Fill { res: usize, len: usize, value: f64 },
    /// `w[res][i] = arg[input][i]`.
    Input { res: usize, input: usize, len: usize },
    /// `w[res][i] = c[constant][i]`.
    Constant { res: usize, constant: usize, len: usize },
    /// `w[res][i] = op(w[arg][i])`.
    Unary {
        op: UnaryOp,
        res: usize,
        arg: usize,
        len: usize,
    },
    /// `w[res][s[dst][i]] (=|+=|-=) w[arg][s[src][i]]`.
    Indexed {
        res: usize,
        arg: usize,
        len: usize,
        src: usize,
        dst: usize,
        sign: Accumulate,
    },
    /// `w[res][i] = w[lhs][s[lhs_idx][i]] * w[rhs][s[rhs_idx][i]]`.
    Product {
        res: usize,
        lhs: usize,
        rhs: usize,
        len: usize,
        lhs_idx: usize,
        rhs_idx: usize,
    },
    /// `res[output][i] = w[arg][i]`.
    Output { output: usize, arg: usize, len: usize },
}

/// Collects statements and deduplicated constant tables.
pub struct CodeGenerator {
    options: CodegenOptions,
    statements: Vec<Statement>,
    int_constants: Vec<Vec<usize>>,
    int_lookup: HashMap<Vec<usize>, usize>,
    real_constants: Vec<Vec<f64>>,
    real_lookup: HashMap<Vec<u64>, usize>,
}

impl CodeGenerator {
    pub fn new(options: CodegenOptions) -> Self {
        CodeGenerator {
            options,
            statements: Vec::new(),
            int_constants: Vec::new(),
            int_lookup: HashMap::new(),
            real_constants: Vec::new(),
            real_lookup: HashMap::new(),
        }
    }

    pub fn options(&self) -> &CodegenOptions {
        &self.options
    }

    /// Register an integer table, returning the index of an identical
    /// existing table if there is one.
    pub fn add_int_constant(&mut self, values: &[usize]) -> usize {
        if let Some(&idx) = self.int_lookup.get(values) {
            return idx;
        }
        let idx = self.int_constants.len();
        self.int_constants.push(values.to_vec());
        self.int_lookup.insert(values.to_vec(), idx);
        idx
    }

    /// Register a real table. Tables are compared bitwise.
    pub fn add_real_constant(&mut self, values: &[f64]) -> usize {
        let key: Vec<u64> = values.iter().map(|v| v.to_bits()).collect();
        if let Some(&idx) = self.real_lookup.get(&key) {
            return idx;
        }
        let idx = self.real_constants.len();
        self.real_constants.push(values.to_vec());
        self.real_lookup.insert(key, idx);
        idx
    }

    pub fn push(&mut self, statement: Statement) {
        self.statements.push(statement);
    }

    /// Finish generation. `work_sizes[i]` is the length of work buffer `i`.
    pub fn finish(
        self,
        work_sizes: Vec<usize>,
        input_sizes: Vec<usize>,
        output_sizes: Vec<usize>,
    ) -> GeneratedCode {
        GeneratedCode {
            options: self.options,
            statements: self.statements,
            int_constants: self.int_constants,
            real_constants: self.real_constants,
            work_sizes,
            input_sizes,
            output_sizes,
        }
    }
}

/// Result of code generation: statements plus constant tables.
#[derive(Debug, Clone)]
pub struct GeneratedCode {
    options: CodegenOptions,
    statements: Vec<Statement>,
    int_constants: Vec<Vec<usize>>,
    real_constants: Vec<Vec<f64>>,
    work_sizes: Vec<usize>,
    input_sizes: Vec<usize>,
    output_sizes: Vec<usize>,
}

impl GeneratedCode {
    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn int_constants(&self) -> &[Vec<usize>] {
        &self.int_constants
    }

    pub fn real_constants(&self) -> &[Vec<f64>] {
        &self.real_constants
    }

    pub fn work_sizes(&self) -> &[usize] {
        &self.work_sizes
    }

    /// Execute the statements on flat buffers.
    ///
    /// # Panics
    /// Panics if the number or length of `args` does not match the inputs.
    pub fn run<F: Float>(&self, args: &[&[F]]) -> Vec<Vec<F>> {
        assert_eq!(args.len(), self.input_sizes.len(), "wrong number of inputs");
        for (i, (arg, &n)) in args.iter().zip(&self.input_sizes).enumerate() {
            assert_eq!(arg.len(), n, "input {i} has wrong length");
        }

        let mut w: Vec<Vec<F>> = self.work_sizes.iter().map(|&n| vec![F::zero(); n]).collect();
        let mut res: Vec<Vec<F>> = self
            .output_sizes
            .iter()
            .map(|&n| vec![F::zero(); n])
            .collect();

        for st in &self.statements {
            match *st {
                Statement::Comment(_) => {}
                Statement::Fill { res: r, len, value } => {
                    w[r][..len].fill(cast(value));
                }
                Statement::Input { res: r, input, len } => {
                    w[r][..len].copy_from_slice(&args[input][..len]);
                }
                Statement::Constant { res: r, constant, len } => {
                    for (dst, &v) in w[r][..len].iter_mut().zip(&self.real_constants[constant]) {
                        *dst = cast(v);
                    }
                }
                Statement::Unary { op, res: r, arg, len } => {
                    for i in 0..len {
                        let a = w[arg][i];
                        w[r][i] = opcode::eval_unary(op, a);
                    }
                }
                Statement::Indexed {
                    res: r,
                    arg,
                    len,
                    src,
                    dst,
                    sign,
                } => {
                    let (src, dst) = (&self.int_constants[src], &self.int_constants[dst]);
                    for i in 0..len {
                        let v = w[arg][src[i]];
                        let slot = &mut w[r][dst[i]];
                        *slot = match sign {
                            Accumulate::Assign => v,
                            Accumulate::Add => *slot + v,
                            Accumulate::Sub => *slot - v,
                        };
                    }
                }
                Statement::Product {
                    res: r,
                    lhs,
                    rhs,
                    len,
                    lhs_idx,
                    rhs_idx,
                } => {
                    let (li, ri) = (&self.int_constants[lhs_idx], &self.int_constants[rhs_idx]);
                    for i in 0..len {
                        let v = w[lhs][li[i]] * w[rhs][ri[i]];
                        w[r][i] = v;
                    }
                }
                Statement::Output { output, arg, len } => {
                    res[output][..len].copy_from_slice(&w[arg][..len]);
                }
            }
        }
        res
    }

    /// Render a C-like translation unit.
    pub fn render(&self) -> String {
        let mut s = String::new();
        // Writing into a String cannot fail.
        let _ = self.write_to(&mut s);
        s
    }

    fn write_to(&self, s: &mut String) -> fmt::Result {
        let opts = &self.options;
        let (real, int) = (&opts.real_type, &opts.int_type);

        for (k, table) in self.int_constants.iter().enumerate() {
            writeln!(
                s,
                "static const {int} s{k}[{}] = {{{}}};",
                table.len().max(1),
                join_or_zero(table.iter().map(|v| v.to_string()))
            )?;
        }
        for (k, table) in self.real_constants.iter().enumerate() {
            writeln!(
                s,
                "static const {real} c{k}[{}] = {{{}}};",
                table.len().max(1),
                join_or_zero(table.iter().map(|v| format!("{v:?}")))
            )?;
        }
        if !self.int_constants.is_empty() || !self.real_constants.is_empty() {
            writeln!(s)?;
        }

        writeln!(
            s,
            "void {}(const {real}** arg, {real}** res) {{",
            opts.function_name
        )?;
        writeln!(s, "  {int} i;")?;
        for (k, &n) in self.work_sizes.iter().enumerate() {
            writeln!(s, "  {real} w{k}[{}];", n.max(1))?;
        }

        for st in &self.statements {
            match st {
                Statement::Comment(text) => writeln!(s, "  /* {text} */")?,
                Statement::Fill { res, len, value } => {
                    writeln!(s, "  for (i=0; i<{len}; ++i) w{res}[i] = {value:?};")?
                }
                Statement::Input { res, input, len } => {
                    writeln!(s, "  for (i=0; i<{len}; ++i) w{res}[i] = arg[{input}][i];")?
                }
                Statement::Constant { res, constant, len } => {
                    writeln!(s, "  for (i=0; i<{len}; ++i) w{res}[i] = c{constant}[i];")?
                }
                Statement::Unary { op, res, arg, len } => {
                    let x = format!("w{arg}[i]");
                    writeln!(
                        s,
                        "  for (i=0; i<{len}; ++i) w{res}[i] = {};",
                        render_unary(*op, &x)
                    )?
                }
                Statement::Indexed {
                    res,
                    arg,
                    len,
                    src,
                    dst,
                    sign,
                } => {
                    let op = match sign {
                        Accumulate::Assign => "=",
                        Accumulate::Add => "+=",
                        Accumulate::Sub => "-=",
                    };
                    writeln!(
                        s,
                        "  for (i=0; i<{len}; ++i) w{res}[s{dst}[i]] {op} w{arg}[s{src}[i]];"
                    )?
                }
                Statement::Product {
                    res,
                    lhs,
                    rhs,
                    len,
                    lhs_idx,
                    rhs_idx,
                } => writeln!(
                    s,
                    "  for (i=0; i<{len}; ++i) w{res}[i] = w{lhs}[s{lhs_idx}[i]] * w{rhs}[s{rhs_idx}[i]];"
                )?,
                Statement::Output { output, arg, len } => {
                    writeln!(s, "  for (i=0; i<{len}; ++i) res[{output}][i] = w{arg}[i];")?
                }
            }
        }
        writeln!(s, "}}")
    }
}

impl fmt::Display for GeneratedCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

fn render_unary(op: UnaryOp, x: &str) -> String {
    match op {
        UnaryOp::Neg => format!("-{x}"),
        UnaryOp::Sin => format!("sin({x})"),
        UnaryOp::Cos => format!("cos({x})"),
        UnaryOp::Exp => format!("exp({x})"),
        UnaryOp::Sq => format!("{x}*{x}"),
    }
}

fn join_or_zero(items: impl Iterator<Item = String>) -> String {
    let joined: Vec<String> = items.collect();
    if joined.is_empty() {
        "0".to_string()
    } else {
        joined.join(", ")
    }
}
