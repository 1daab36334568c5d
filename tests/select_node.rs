use mxgraph::node::Op;
use mxgraph::select::SelectNode;
use mxgraph::{Function, Graph, GraphError, NodeId, Sparsity};

fn select_node(g: &Graph, id: NodeId) -> &SelectNode {
    match g.node(id).unwrap().op() {
        Op::Select(s) => s,
        other => panic!("expected a selection, got {other:?}"),
    }
}

/// 4-by-4 matrix storing linear elements 10, 11, 12, 13.
fn source_pattern() -> Sparsity {
    Sparsity::triplet(4, 4, &[2, 3, 0, 1], &[2, 2, 3, 3]).unwrap()
}

/// Deterministic small-integer generator (exact in f64).
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: usize) -> usize {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((self.0 >> 33) % bound as u64) as usize
    }

    fn vec(&mut self, len: usize) -> Vec<f64> {
        (0..len).map(|_| self.next(19) as f64 - 9.0).collect()
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

// ── End-to-end scenario ──

#[test]
fn source_pattern_has_expected_elements() {
    assert_eq!(source_pattern().elements(), vec![10, 11, 12, 13]);
}

#[test]
fn gather_value_and_adjoint() {
    let mut g = Graph::new();
    let x = g.input("x", source_pattern());
    let y = g.select(Sparsity::column(4), x, vec![2, 0, 2, 3]).unwrap();
    let s = select_node(&g, y);

    let (a, b, c, d) = (1.0, 2.0, 3.0, 4.0);
    let mut out = [0.0; 4];
    s.eval(Some(&[a, b, c, d][..]), Some(&mut out[..]));
    assert_eq!(out, [c, a, c, d]);

    let (p, q, r, t) = (10.0, 20.0, 30.0, 40.0);
    let mut seed = [p, q, r, t];
    let mut sens = [0.0; 4];
    s.adjoint(Some(&mut seed[..]), Some(&mut sens[..]));
    assert_eq!(sens, [q, 0.0, p + r, t]);
    assert_eq!(seed, [0.0; 4]);
}

#[test]
fn gather_through_compiled_function() {
    let mut g = Graph::new();
    let x = g.input("x", source_pattern());
    let y = g.select(Sparsity::column(4), x, vec![2, 0, 2, 3]).unwrap();
    let f = Function::new("f", &g, &[x], &[y]).unwrap();

    let args: &[&[f64]] = &[&[1.0, 2.0, 3.0, 4.0]];
    assert_eq!(f.eval(args), vec![vec![3.0, 1.0, 3.0, 4.0]]);

    let seeds: &[Vec<&[f64]>] = &[vec![&[10.0, 20.0, 30.0, 40.0][..]]];
    let (_, sens) = f.vjp(args, seeds);
    assert_eq!(sens, vec![vec![vec![20.0, 0.0, 40.0, 40.0]]]);
}

// ── Identity ──

#[test]
fn identity_selection_folds_to_dependency() {
    let mut g = Graph::new();
    let sp = source_pattern();
    let x = g.input("x", sp.clone());
    let y = g.select(sp, x, vec![0, 1, 2, 3]).unwrap();
    assert_eq!(y, x);

    let f = Function::new("f", &g, &[x], &[y]).unwrap();
    let v = [5.0, -1.0, 0.5, 2.0];
    assert_eq!(f.eval(&[&v[..]]), vec![v.to_vec()]);
}

#[test]
fn identity_needs_matching_sparsity() {
    let mut g = Graph::new();
    let x = g.input("x", Sparsity::diagonal(3));
    let y = g.select(Sparsity::column(3), x, vec![0, 1, 2]).unwrap();
    assert_ne!(y, x);

    let s = select_node(&g, y);
    assert!(!s.is_identity(&Sparsity::column(3), &Sparsity::diagonal(3)));
    assert!(s.is_identity(&Sparsity::diagonal(3), &Sparsity::diagonal(3)));
}

// ── Duplicates ──

#[test]
fn duplicate_targets_accumulate_in_adjoint_only() {
    let mut g = Graph::new();
    let x = g.input("x", Sparsity::column(1));
    let y = g.select(Sparsity::column(2), x, vec![0, 0]).unwrap();
    let s = select_node(&g, y);

    let mut out = [0.0; 2];
    s.eval(Some(&[7.0][..]), Some(&mut out[..]));
    assert_eq!(out, [7.0, 7.0]);

    let mut seed = [1.5, 2.25];
    let mut sens = [0.0];
    s.adjoint(Some(&mut seed[..]), Some(&mut sens[..]));
    assert_eq!(sens, [3.75]);
    assert_eq!(seed, [0.0, 0.0]);
}

#[test]
fn adjoint_accumulates_on_top_of_existing_sensitivity() {
    let mut g = Graph::new();
    let x = g.input("x", Sparsity::column(2));
    let y = g.select(Sparsity::column(3), x, vec![1, 1, 0]).unwrap();
    let s = select_node(&g, y);

    let mut seed = [1.0, 2.0, 3.0];
    let mut sens = [100.0, 200.0];
    s.adjoint(Some(&mut seed[..]), Some(&mut sens[..]));
    assert_eq!(sens, [103.0, 203.0]);
}

// ── Scatter ──

#[test]
fn scatter_sums_into_targets() {
    let mut g = Graph::new();
    let x = g.input("x", Sparsity::column(4));
    let y = g.scatter(Sparsity::column(2), x, vec![1, 0, 1, 1]).unwrap();
    let s = select_node(&g, y);
    assert!(s.is_scatter());

    let mut out = [f64::NAN; 2];
    s.eval(Some(&[1.0, 2.0, 3.0, 4.0][..]), Some(&mut out[..]));
    assert_eq!(out, [2.0, 8.0]);

    let mut seed = [10.0, 20.0];
    let mut sens = [0.0; 4];
    s.adjoint(Some(&mut seed[..]), Some(&mut sens[..]));
    assert_eq!(sens, [20.0, 10.0, 20.0, 20.0]);
    assert_eq!(seed, [0.0, 0.0]);
}

// ── Duality ──

#[test]
fn adjoint_is_transpose_of_forward() {
    let mut rng = Lcg(7);
    for trial in 0..20 {
        let (n_in, n_out) = (1 + rng.next(6), 1 + rng.next(6));
        let scatter = trial % 2 == 1;
        let table_len = if scatter { n_in } else { n_out };
        let range = if scatter { n_out } else { n_in };
        let assign: Vec<usize> = (0..table_len).map(|_| rng.next(range)).collect();

        let mut g = Graph::new();
        let x = g.input("x", Sparsity::column(n_in));
        let y = if scatter {
            g.scatter(Sparsity::column(n_out), x, assign.clone()).unwrap()
        } else {
            g.select(Sparsity::column(n_out), x, assign.clone()).unwrap()
        };
        let f = Function::new("f", &g, &[x], &[y]).unwrap();

        let x0 = rng.vec(n_in);
        let u = rng.vec(n_in);
        let w = rng.vec(n_out);
        let (_, fwd) = f.jvp(&[x0.as_slice()], &[vec![u.as_slice()]]);
        let (_, adj) = f.vjp(&[x0.as_slice()], &[vec![w.as_slice()]]);
        assert_eq!(
            dot(&w, &fwd[0][0]),
            dot(&adj[0][0], &u),
            "trial {trial}: assign = {assign:?}, scatter = {scatter}"
        );
    }
}

// ── Absent buffers ──

#[test]
fn absent_buffers_skip_the_mode() {
    let mut g = Graph::new();
    let x = g.input("x", Sparsity::column(3));
    let y = g.select(Sparsity::column(2), x, vec![2, 0]).unwrap();
    let s = select_node(&g, y);

    let mut out = [9.0, 9.0];
    s.eval::<f64>(None, Some(&mut out[..]));
    assert_eq!(out, [9.0, 9.0]);
    s.forward(Some(&[1.0, 2.0, 3.0][..]), None);

    let mut sens = [1.0, 1.0, 1.0];
    s.adjoint::<f64>(None, Some(&mut sens[..]));
    assert_eq!(sens, [1.0, 1.0, 1.0]);

    // A supplied seed is consumed even when there is nowhere to put it.
    let mut seed = [4.0, 5.0];
    s.adjoint::<f64>(Some(&mut seed[..]), None);
    assert_eq!(seed, [0.0, 0.0]);
}

// ── Construction errors ──

#[test]
fn table_length_must_match_output() {
    let mut g = Graph::new();
    let x = g.input("x", Sparsity::column(3));
    let err = g.select(Sparsity::column(2), x, vec![0, 1, 2]).unwrap_err();
    assert_eq!(
        err,
        GraphError::IndexTableLength {
            expected: 2,
            found: 3
        }
    );
}

#[test]
fn scatter_table_length_must_match_dependency() {
    let mut g = Graph::new();
    let x = g.input("x", Sparsity::column(3));
    let err = g.scatter(Sparsity::column(2), x, vec![0, 1]).unwrap_err();
    assert_eq!(
        err,
        GraphError::IndexTableLength {
            expected: 3,
            found: 2
        }
    );
}

#[test]
fn table_entries_must_be_valid_nonzeros() {
    let mut g = Graph::new();
    let x = g.input("x", Sparsity::column(3));
    let err = g.select(Sparsity::column(2), x, vec![0, 3]).unwrap_err();
    assert_eq!(err, GraphError::NonzeroOutOfRange { index: 3, nnz: 3 });

    let err = g.scatter(Sparsity::column(2), x, vec![0, 2, 1]).unwrap_err();
    assert_eq!(err, GraphError::NonzeroOutOfRange { index: 2, nnz: 2 });
}

#[test]
fn dependency_must_exist() {
    let mut other = Graph::new();
    for i in 0..5 {
        other.symbol(format!("x{i}"), 1, 1);
    }
    let foreign = other.symbol("far", 1, 1);

    let mut g = Graph::new();
    let err = g.select(Sparsity::column(1), foreign, vec![0]).unwrap_err();
    assert_eq!(err, GraphError::MissingDependency(5));
}

// ── Simplification ──

#[test]
fn empty_table_is_a_zero_matrix() {
    let mut g = Graph::new();
    let x = g.input("x", Sparsity::column(3));
    let y = g.select(Sparsity::empty(2, 2), x, vec![]).unwrap();
    assert!(matches!(g.node(y).unwrap().op(), Op::Zeros));
    assert_eq!(g.sparsity(y).unwrap().shape(), (2, 2));
}

#[test]
fn identical_selections_are_shared() {
    let mut g = Graph::new();
    let x = g.input("x", Sparsity::column(3));
    let a = g.select(Sparsity::column(2), x, vec![2, 0]).unwrap();
    let b = g.select(Sparsity::column(2), x, vec![2, 0]).unwrap();
    let c = g.select(Sparsity::column(2), x, vec![0, 2]).unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn selection_of_constant_folds() {
    let mut g = Graph::new();
    let c = g.constant(Sparsity::column(3), vec![1.0, 2.0, 3.0]).unwrap();
    let y = g.get_nonzeros(c, &[2, 2, 0]).unwrap();
    match g.node(y).unwrap().op() {
        Op::Constant { values } => assert_eq!(values, &vec![3.0, 3.0, 1.0]),
        other => panic!("expected a constant, got {other:?}"),
    }
}

#[test]
fn describe_shows_index_table() {
    let mut g = Graph::new();
    let x = g.input("x", Sparsity::column(4));
    let y = g.select(Sparsity::column(4), x, vec![2, 0, 2, 3]).unwrap();
    let z = g.get_nonzeros(x, &[1]).unwrap();
    assert_eq!(g.describe(y).unwrap(), "x[[2, 0, 2, 3]]");
    assert_eq!(g.describe(z).unwrap(), "x[1]");
}

#[test]
fn describe_spells_out_scatter_and_shared_operands() {
    let mut g = Graph::new();
    let x = g.input("x", Sparsity::column(3));
    let s = g.scatter(Sparsity::column(2), x, vec![1, 0, 1]).unwrap();
    let y = g.sin(x).unwrap();
    let p = g.mul(y, y).unwrap();
    assert_eq!(g.describe(s).unwrap(), "scatter(x, [1, 0, 1])");
    assert_eq!(g.describe(p).unwrap(), "(sin(x)*sin(x))");
}

#[test]
fn describe_handles_deep_chains() {
    let depth = 200_000;
    let mut g = Graph::new();
    let mut y = g.input("x", Sparsity::column(2));
    for _ in 0..depth {
        y = g.sin(y).unwrap();
    }
    let text = g.describe(y).unwrap();
    assert_eq!(text.len(), 5 * depth + 1);
    assert!(text.starts_with("sin(sin("));
    assert!(text.ends_with("(x))"));
}
