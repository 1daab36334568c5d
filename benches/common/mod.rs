#![allow(dead_code)]

use mxgraph::{Function, Graph, NodeId, Sparsity};

pub fn make_input(n: usize) -> Vec<f64> {
    (0..n).map(|i| 0.5 + 0.01 * i as f64).collect()
}

/// Residuals of the extended Rosenbrock function,
/// `(1 - x[i])^2 + 100 (x[i+1] - x[i]^2)^2` for `i < n - 1`.
pub fn rosenbrock_graph(g: &mut Graph, n: usize) -> (NodeId, NodeId) {
    let x = g.symbol("x", n, 1);
    let head: Vec<usize> = (0..n - 1).collect();
    let tail: Vec<usize> = (1..n).collect();
    let a = g.get_nonzeros(x, &head).unwrap();
    let b = g.get_nonzeros(x, &tail).unwrap();

    let one = g.constant(Sparsity::column(n - 1), vec![1.0; n - 1]).unwrap();
    let hundred = g.constant(Sparsity::column(n - 1), vec![100.0; n - 1]).unwrap();
    let t1 = g.sub(one, a).unwrap();
    let a2 = g.sq(a).unwrap();
    let t2 = g.sub(b, a2).unwrap();
    let t1 = g.sq(t1).unwrap();
    let t2 = g.sq(t2).unwrap();
    let t2 = g.mul(hundred, t2).unwrap();
    let out = g.add(t1, t2).unwrap();
    (x, out)
}

pub fn rosenbrock_function(n: usize) -> Function {
    let mut g = Graph::new();
    let (x, out) = rosenbrock_graph(&mut g, n);
    Function::new("rosenbrock", &g, &[x], &[out]).unwrap()
}

/// `n`-by-`n` band pattern with `bandwidth` sub- and super-diagonals.
pub fn banded(n: usize, bandwidth: usize) -> Sparsity {
    let (mut rows, mut cols) = (Vec::new(), Vec::new());
    for c in 0..n {
        for r in c.saturating_sub(bandwidth)..(c + bandwidth + 1).min(n) {
            rows.push(r);
            cols.push(c);
        }
    }
    Sparsity::triplet(n, n, &rows, &cols).unwrap()
}
