use approx::assert_relative_eq;
use mxgraph::{Function, Graph, GraphError, Sparsity};

/// Central finite difference of output `o`, nonzero `k` along `dir`.
fn finite_diff(f: &Function, x: &[f64], dir: &[f64], o: usize, k: usize) -> f64 {
    let h = 1e-6;
    let plus: Vec<f64> = x.iter().zip(dir).map(|(a, d)| a + h * d).collect();
    let minus: Vec<f64> = x.iter().zip(dir).map(|(a, d)| a - h * d).collect();
    (f.eval(&[&plus[..]])[o][k] - f.eval(&[&minus[..]])[o][k]) / (2.0 * h)
}

// ── Elementwise sparsity ──

#[test]
fn add_uses_union_of_patterns() {
    let mut g = Graph::new();
    let a = g.input("a", Sparsity::triplet(3, 1, &[0, 2], &[0, 0]).unwrap());
    let b = g.input("b", Sparsity::triplet(3, 1, &[1, 2], &[0, 0]).unwrap());
    let s = g.add(a, b).unwrap();
    let d = g.sub(a, b).unwrap();
    assert_eq!(g.sparsity(s).unwrap(), &Sparsity::column(3));

    let f = Function::new("f", &g, &[a, b], &[s, d]).unwrap();
    let out = f.eval(&[&[1.0, 3.0][..], &[10.0, 20.0][..]]);
    assert_eq!(out[0], vec![1.0, 10.0, 23.0]);
    assert_eq!(out[1], vec![1.0, -10.0, -17.0]);
}

#[test]
fn mul_uses_intersection_of_patterns() {
    let mut g = Graph::new();
    let a = g.input("a", Sparsity::triplet(3, 1, &[0, 2], &[0, 0]).unwrap());
    let b = g.input("b", Sparsity::triplet(3, 1, &[1, 2], &[0, 0]).unwrap());
    let p = g.mul(a, b).unwrap();
    assert_eq!(g.sparsity(p).unwrap().row(), &[2]);

    let f = Function::new("f", &g, &[a, b], &[p]).unwrap();
    assert_eq!(f.eval(&[&[1.0, 3.0][..], &[10.0, 20.0][..]]), vec![vec![60.0]]);
}

#[test]
fn unary_ops_act_on_stored_entries() {
    let mut g = Graph::new();
    let x = g.input("x", Sparsity::diagonal(2));
    let c = g.cos(x).unwrap();
    assert_eq!(g.sparsity(c).unwrap(), &Sparsity::diagonal(2));

    let f = Function::new("f", &g, &[x], &[c]).unwrap();
    let out = f.eval(&[&[0.0, 1.0][..]]);
    assert_relative_eq!(out[0][0], 1.0);
    assert_relative_eq!(out[0][1], 1.0_f64.cos());
}

#[test]
fn shape_mismatch_is_rejected() {
    let mut g = Graph::new();
    let a = g.symbol("a", 2, 1);
    let b = g.symbol("b", 1, 2);
    assert_eq!(
        g.add(a, b).unwrap_err(),
        GraphError::ShapeMismatch {
            lhs_rows: 2,
            lhs_cols: 1,
            rhs_rows: 1,
            rhs_cols: 2
        }
    );
}

// ── Simplification ──

#[test]
fn constants_fold_at_construction() {
    let mut g = Graph::new();
    let c = g.constant(Sparsity::column(2), vec![1.0, 2.0]).unwrap();
    let d = g.constant(Sparsity::column(2), vec![3.0, 4.0]).unwrap();
    let s = g.add(c, d).unwrap();
    let e = g.sq(s).unwrap();
    assert_eq!(g.describe(e).unwrap(), format!("constant({})", Sparsity::column(2)));

    let f = Function::new("f", &g, &[], &[e]).unwrap();
    assert_eq!(f.len(), 1);
    assert_eq!(f.eval::<f64>(&[]), vec![vec![16.0, 36.0]]);
}

#[test]
fn adding_structural_zeros_is_free() {
    let mut g = Graph::new();
    let x = g.symbol("x", 3, 1);
    let z = g.zeros(Sparsity::triplet(3, 1, &[1], &[0]).unwrap());
    assert_eq!(g.add(x, z).unwrap(), x);
    assert_eq!(g.add(z, x).unwrap(), x);
    assert_eq!(g.sub(x, z).unwrap(), x);
    let n = g.sub(z, x).unwrap();
    assert_eq!(n, g.neg(x).unwrap());
    let m = g.mul(x, z).unwrap();
    assert_eq!(g.sparsity(m).unwrap().nnz(), 1);
    assert_eq!(g.describe(m).unwrap(), "sparse(3,1)");
}

#[test]
fn commutative_ops_are_shared() {
    let mut g = Graph::new();
    let x = g.symbol("x", 2, 2);
    let y = g.symbol("y", 2, 2);
    assert_eq!(g.mul(x, y).unwrap(), g.mul(y, x).unwrap());
    assert_eq!(g.add(x, y).unwrap(), g.add(y, x).unwrap());
    assert_ne!(g.sub(x, y).unwrap(), g.sub(y, x).unwrap());
}

// ── Compilation ──

#[test]
fn unused_nodes_are_compacted_away() {
    let mut g = Graph::new();
    let x = g.symbol("x", 3, 1);
    let _unused = g.exp(x).unwrap();
    let y = g.sin(x).unwrap();
    let f = Function::new("f", &g, &[x], &[y]).unwrap();
    assert_eq!(g.len(), 3);
    assert_eq!(f.len(), 2);
}

#[test]
fn unreachable_inputs_stay_in_the_signature() {
    let mut g = Graph::new();
    let x = g.symbol("x", 1, 1);
    let y = g.symbol("y", 2, 1);
    let s = g.sin(x).unwrap();
    let f = Function::new("f", &g, &[x, y], &[s]).unwrap();
    assert_eq!(f.n_inputs(), 2);
    assert_eq!(f.input_sparsity(1), &Sparsity::column(2));
    let (_, sens) = f.vjp(&[&[0.0][..], &[1.0, 2.0][..]], &[vec![&[1.0][..]]]);
    assert_eq!(sens[0][1], vec![0.0, 0.0]);
}

#[test]
fn free_inputs_are_rejected() {
    let mut g = Graph::new();
    let x = g.symbol("x", 1, 1);
    let y = g.symbol("y", 1, 1);
    let s = g.add(x, y).unwrap();
    assert_eq!(
        Function::new("f", &g, &[x], &[s]).unwrap_err(),
        GraphError::FreeVariable("y".to_string())
    );
}

#[test]
fn inputs_must_be_distinct_symbols() {
    let mut g = Graph::new();
    let x = g.symbol("x", 1, 1);
    let s = g.sin(x).unwrap();
    assert_eq!(
        Function::new("f", &g, &[x, x], &[s]).unwrap_err(),
        GraphError::DuplicateInput("x".to_string())
    );
    assert_eq!(
        Function::new("f", &g, &[s], &[s]).unwrap_err(),
        GraphError::NotAnInput(s.index() as u32)
    );
}

#[test]
fn constant_length_is_checked() {
    let mut g = Graph::new();
    assert_eq!(
        g.constant(Sparsity::column(3), vec![1.0]).unwrap_err(),
        GraphError::ConstantLength {
            expected: 3,
            found: 1
        }
    );
}

// ── Forward / reverse ──

/// `[x0*x1 + sin(x2), exp(x0) - sq(x1)]` with the inputs gathered from `x`.
fn two_outputs(g: &mut Graph) -> (mxgraph::NodeId, Function) {
    let x = g.symbol("x", 3, 1);
    let x0 = g.get_nonzeros(x, &[0]).unwrap();
    let x1 = g.get_nonzeros(x, &[1]).unwrap();
    let x2 = g.get_nonzeros(x, &[2]).unwrap();
    let p = g.mul(x0, x1).unwrap();
    let s = g.sin(x2).unwrap();
    let o0 = g.add(p, s).unwrap();
    let e = g.exp(x0).unwrap();
    let q = g.sq(x1).unwrap();
    let o1 = g.sub(e, q).unwrap();
    let f = Function::new("two", g, &[x], &[o0, o1]).unwrap();
    (x, f)
}

#[test]
fn forward_matches_finite_differences() {
    let mut g = Graph::new();
    let (_, f) = two_outputs(&mut g);
    let x = [0.3, -1.2, 0.7];
    let dirs = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.5, -0.25, 2.0]];
    let seeds: Vec<Vec<&[f64]>> = dirs.iter().map(|d| vec![&d[..]]).collect();
    let (out, sens) = f.jvp(&[&x[..]], &seeds);

    assert_relative_eq!(out[0][0], x[0] * x[1] + x[2].sin(), max_relative = 1e-12);
    for (d, dir) in dirs.iter().enumerate() {
        for o in 0..2 {
            assert_relative_eq!(
                sens[d][o][0],
                finite_diff(&f, &x, dir, o, 0),
                max_relative = 1e-6
            );
        }
    }
}

#[test]
fn reverse_is_transpose_of_forward() {
    let mut g = Graph::new();
    let (_, f) = two_outputs(&mut g);
    let x = [0.3, -1.2, 0.7];
    let basis = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
    let fwd_seeds: Vec<Vec<&[f64]>> = basis.iter().map(|d| vec![&d[..]]).collect();
    let (_, fwd) = f.jvp(&[&x[..]], &fwd_seeds);

    let adj_seeds: Vec<Vec<&[f64]>> = vec![
        vec![&[1.0][..], &[0.0][..]],
        vec![&[0.0][..], &[1.0][..]],
    ];
    let (_, adj) = f.vjp(&[&x[..]], &adj_seeds);

    for o in 0..2 {
        for i in 0..3 {
            assert_relative_eq!(adj[o][0][i], fwd[i][o][0], max_relative = 1e-12);
        }
    }
}

#[test]
fn shared_subexpressions_accumulate_adjoints() {
    let mut g = Graph::new();
    let x = g.symbol("x", 2, 1);
    let s = g.sin(x).unwrap();
    let y = g.mul(s, s).unwrap();
    let z = g.add(y, x).unwrap();
    let f = Function::new("f", &g, &[x], &[z, y]).unwrap();

    let xv: [f64; 2] = [0.4, 1.1];
    let (_, sens) = f.vjp(&[&xv[..]], &[vec![&[1.0, 1.0][..], &[1.0, 0.0][..]]]);
    for i in 0..2 {
        let dy = 2.0 * xv[i].sin() * xv[i].cos();
        let expected = dy + 1.0 + if i == 0 { dy } else { 0.0 };
        assert_relative_eq!(sens[0][0][i], expected, max_relative = 1e-12);
    }
}

#[test]
fn evaluator_is_reusable() {
    let mut g = Graph::new();
    let (_, f) = two_outputs(&mut g);
    let mut ev = f.evaluator::<f64>();
    let a = ev.eval(&[&[1.0, 2.0, 3.0][..]]);
    let _ = ev.eval(&[&[-4.0, 0.5, 9.0][..]]);
    let b = ev.eval(&[&[1.0, 2.0, 3.0][..]]);
    assert_eq!(a, b);
}

#[test]
fn evaluates_in_single_precision() {
    let mut g = Graph::new();
    let (_, f) = two_outputs(&mut g);
    let out = f.eval::<f32>(&[&[0.5, 2.0, 0.0][..]]);
    assert_relative_eq!(out[0][0], 1.0_f32, max_relative = 1e-6);
    assert_relative_eq!(out[1][0], 0.5_f32.exp() - 4.0, max_relative = 1e-6);
}

#[test]
#[should_panic(expected = "wrong number of inputs")]
fn wrong_argument_count_panics() {
    let mut g = Graph::new();
    let (_, f) = two_outputs(&mut g);
    f.eval::<f64>(&[]);
}
