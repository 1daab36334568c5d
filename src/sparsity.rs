//! Compressed-column sparsity patterns.
//!
//! A [`Sparsity`] records which `(row, col)` positions of a matrix are
//! structurally nonzero and gives every occupied position a dense *nonzero
//! index*: its position in column-major order. The linear element index of
//! `(row, col)` is `row + col * nrow`.
//!
//! Patterns are immutable and reference counted, so nodes with the same
//! structure share one allocation and cloning is O(1).

use std::fmt;
use std::sync::Arc;

use crate::error::GraphError;

/// Reported by [`Sparsity::get_nz_inplace`] for elements that are not stored.
pub const NOT_FOUND: i64 = -1;

#[derive(Debug, PartialEq, Eq, Hash)]
struct Pattern {
    nrow: usize,
    ncol: usize,
    /// Column offsets into `row` (length `ncol + 1`).
    colind: Vec<usize>,
    /// Row of every nonzero, strictly ascending within each column.
    row: Vec<usize>,
}

/// Structural nonzero pattern of a matrix in compressed-column form.
#[derive(Clone, Hash)]
pub struct Sparsity(Arc<Pattern>);

impl PartialEq for Sparsity {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl Eq for Sparsity {}

impl Sparsity {
    /// Build a pattern from its compressed-column arrays, validating them.
    pub fn new(
        nrow: usize,
        ncol: usize,
        colind: Vec<usize>,
        row: Vec<usize>,
    ) -> Result<Self, GraphError> {
        if colind.len() != ncol + 1 {
            return Err(GraphError::InvalidSparsity(format!(
                "colind has length {}, expected {}",
                colind.len(),
                ncol + 1
            )));
        }
        if colind[0] != 0 || colind[ncol] != row.len() {
            return Err(GraphError::InvalidSparsity(format!(
                "colind must run from 0 to {} (the number of rows entries)",
                row.len()
            )));
        }
        if let Some(c) = colind.windows(2).position(|w| w[1] < w[0]) {
            return Err(GraphError::InvalidSparsity(format!(
                "colind decreases at column {c}"
            )));
        }
        for c in 0..ncol {
            let rows = &row[colind[c]..colind[c + 1]];
            if rows.iter().any(|&r| r >= nrow) {
                return Err(GraphError::InvalidSparsity(format!(
                    "row index out of range in column {c}"
                )));
            }
            if rows.windows(2).any(|w| w[0] >= w[1]) {
                return Err(GraphError::InvalidSparsity(format!(
                    "rows not strictly ascending in column {c}"
                )));
            }
        }
        Ok(Self::from_parts(nrow, ncol, colind, row))
    }

    fn from_parts(nrow: usize, ncol: usize, colind: Vec<usize>, row: Vec<usize>) -> Self {
        Sparsity(Arc::new(Pattern {
            nrow,
            ncol,
            colind,
            row,
        }))
    }

    /// Build a pattern from the (ascending) rows of every column.
    pub(crate) fn from_column_rows(nrow: usize, columns: Vec<Vec<usize>>) -> Self {
        let ncol = columns.len();
        let mut colind = Vec::with_capacity(ncol + 1);
        colind.push(0);
        let mut row = Vec::new();
        for rows in columns {
            row.extend(rows);
            colind.push(row.len());
        }
        Self::from_parts(nrow, ncol, colind, row)
    }

    /// Fully dense `nrow`-by-`ncol` pattern.
    pub fn dense(nrow: usize, ncol: usize) -> Self {
        let colind = (0..=ncol).map(|c| c * nrow).collect();
        let row = (0..ncol).flat_map(|_| 0..nrow).collect();
        Self::from_parts(nrow, ncol, colind, row)
    }

    /// Dense column vector of length `n`.
    pub fn column(n: usize) -> Self {
        Self::dense(n, 1)
    }

    /// Dense 1-by-1 pattern.
    pub fn scalar() -> Self {
        Self::dense(1, 1)
    }

    /// Pattern without any nonzeros.
    pub fn empty(nrow: usize, ncol: usize) -> Self {
        Self::from_parts(nrow, ncol, vec![0; ncol + 1], Vec::new())
    }

    /// Diagonal `n`-by-`n` pattern.
    pub fn diagonal(n: usize) -> Self {
        Self::from_parts(n, n, (0..=n).collect(), (0..n).collect())
    }

    /// Build a pattern from coordinate lists. Duplicates collapse.
    pub fn triplet(
        nrow: usize,
        ncol: usize,
        rows: &[usize],
        cols: &[usize],
    ) -> Result<Self, GraphError> {
        Self::triplet_with_mapping(nrow, ncol, rows, cols).map(|(sp, _)| sp)
    }

    /// Like [`triplet`](Self::triplet), also returning for every input
    /// coordinate the nonzero index it landed on.
    pub fn triplet_with_mapping(
        nrow: usize,
        ncol: usize,
        rows: &[usize],
        cols: &[usize],
    ) -> Result<(Self, Vec<usize>), GraphError> {
        if rows.len() != cols.len() {
            return Err(GraphError::InvalidSparsity(format!(
                "{} row indices but {} column indices",
                rows.len(),
                cols.len()
            )));
        }
        if let Some(k) = (0..rows.len()).find(|&k| rows[k] >= nrow || cols[k] >= ncol) {
            return Err(GraphError::InvalidSparsity(format!(
                "entry ({}, {}) outside a {nrow}-by-{ncol} matrix",
                rows[k], cols[k]
            )));
        }

        let mut order: Vec<usize> = (0..rows.len()).collect();
        order.sort_by_key(|&k| (cols[k], rows[k]));

        let mut colind = vec![0usize; ncol + 1];
        let mut row = Vec::with_capacity(rows.len());
        let mut mapping = vec![0usize; rows.len()];
        let mut last = None;
        for &k in &order {
            let key = (cols[k], rows[k]);
            if last != Some(key) {
                row.push(rows[k]);
                colind[cols[k] + 1] += 1;
                last = Some(key);
            }
            mapping[k] = row.len() - 1;
        }
        for c in 0..ncol {
            colind[c + 1] += colind[c];
        }
        Ok((Self::from_parts(nrow, ncol, colind, row), mapping))
    }

    // ── Queries ──

    #[inline]
    pub fn nrow(&self) -> usize {
        self.0.nrow
    }

    #[inline]
    pub fn ncol(&self) -> usize {
        self.0.ncol
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.0.nrow, self.0.ncol)
    }

    /// Number of structural nonzeros.
    #[inline]
    pub fn nnz(&self) -> usize {
        self.0.row.len()
    }

    /// Number of elements, `nrow * ncol`.
    #[inline]
    pub fn numel(&self) -> usize {
        self.0.nrow * self.0.ncol
    }

    pub fn is_dense(&self) -> bool {
        self.nnz() == self.numel()
    }

    /// True if the pattern has no nonzeros.
    pub fn is_empty(&self) -> bool {
        self.0.row.is_empty()
    }

    pub fn is_scalar(&self) -> bool {
        self.0.nrow == 1 && self.0.ncol == 1
    }

    /// True for a square pattern with exactly the diagonal stored.
    pub fn is_diagonal(&self) -> bool {
        let p = &*self.0;
        p.nrow == p.ncol
            && p.row.len() == p.ncol
            && (0..p.ncol).all(|c| p.colind[c] == c && p.row[c] == c)
    }

    #[inline]
    pub fn colind(&self) -> &[usize] {
        &self.0.colind
    }

    /// Row of every nonzero.
    #[inline]
    pub fn row(&self) -> &[usize] {
        &self.0.row
    }

    /// Column of every nonzero.
    pub fn col_of_nonzeros(&self) -> Vec<usize> {
        let p = &*self.0;
        let mut col = Vec::with_capacity(p.row.len());
        for c in 0..p.ncol {
            col.extend(std::iter::repeat(c).take(p.colind[c + 1] - p.colind[c]));
        }
        col
    }

    /// `(row, col)` of nonzero `k`.
    pub fn row_col(&self, k: usize) -> (usize, usize) {
        let c = self.0.colind.partition_point(|&x| x <= k) - 1;
        (self.0.row[k], c)
    }

    /// Linear element index `row + col * nrow` of nonzero `k`.
    pub fn element(&self, k: usize) -> usize {
        let (r, c) = self.row_col(k);
        r + c * self.0.nrow
    }

    /// Linear element indices of all nonzeros, in nonzero order.
    pub fn elements(&self) -> Vec<usize> {
        let nrow = self.0.nrow;
        self.0
            .row
            .iter()
            .zip(self.col_of_nonzeros())
            .map(|(&r, c)| r + c * nrow)
            .collect()
    }

    /// Nonzero index of `(row, col)`, or `None` if the position is not stored.
    pub fn get_nz(&self, row: usize, col: usize) -> Option<usize> {
        let p = &*self.0;
        if row >= p.nrow || col >= p.ncol {
            return None;
        }
        let start = p.colind[col];
        p.row[start..p.colind[col + 1]]
            .binary_search(&row)
            .ok()
            .map(|i| start + i)
    }

    /// Batch lookup: replaces every linear element index in `elements` by its
    /// nonzero index, or by [`NOT_FOUND`] when the element is not stored or
    /// lies outside the matrix.
    pub fn get_nz_inplace(&self, elements: &mut [i64]) {
        let nrow = self.0.nrow;
        let numel = self.numel() as i64;
        for el in elements.iter_mut() {
            if *el < 0 || *el >= numel {
                *el = NOT_FOUND;
                continue;
            }
            let e = *el as usize;
            *el = self
                .get_nz(e % nrow, e / nrow)
                .map_or(NOT_FOUND, |k| k as i64);
        }
    }

    /// True if every nonzero of `self` is also stored in `other` (same shape required).
    pub fn is_subset(&self, other: &Sparsity) -> bool {
        if self == other {
            return true;
        }
        if self.shape() != other.shape() {
            return false;
        }
        let col = self.col_of_nonzeros();
        self.0
            .row
            .iter()
            .zip(col)
            .all(|(&r, c)| other.get_nz(r, c).is_some())
    }

    pub(crate) fn check_same_shape(&self, other: &Sparsity) -> Result<(), GraphError> {
        if self.shape() == other.shape() {
            Ok(())
        } else {
            Err(GraphError::ShapeMismatch {
                lhs_rows: self.nrow(),
                lhs_cols: self.ncol(),
                rhs_rows: other.nrow(),
                rhs_cols: other.ncol(),
            })
        }
    }

    // ── Set operations ──

    /// Union of two patterns of the same shape.
    pub fn union(&self, other: &Sparsity) -> Result<Sparsity, GraphError> {
        self.union_with_mapping(other).map(|(sp, _, _)| sp)
    }

    /// Intersection of two patterns of the same shape.
    pub fn intersection(&self, other: &Sparsity) -> Result<Sparsity, GraphError> {
        self.intersection_with_mapping(other).map(|(sp, _, _)| sp)
    }

    /// Union, plus the output nonzero that every nonzero of `self` and of
    /// `other` lands on.
    pub(crate) fn union_with_mapping(
        &self,
        other: &Sparsity,
    ) -> Result<(Sparsity, Vec<usize>, Vec<usize>), GraphError> {
        self.check_same_shape(other)?;
        if self == other {
            let id: Vec<usize> = (0..self.nnz()).collect();
            return Ok((self.clone(), id.clone(), id));
        }
        let (a, b) = (&*self.0, &*other.0);
        let mut colind = Vec::with_capacity(a.ncol + 1);
        colind.push(0);
        let mut row = Vec::with_capacity(a.row.len().max(b.row.len()));
        let mut lhs = Vec::with_capacity(a.row.len());
        let mut rhs = Vec::with_capacity(b.row.len());
        for c in 0..a.ncol {
            let (mut i, ie) = (a.colind[c], a.colind[c + 1]);
            let (mut j, je) = (b.colind[c], b.colind[c + 1]);
            while i < ie || j < je {
                let ra = if i < ie { a.row[i] } else { usize::MAX };
                let rb = if j < je { b.row[j] } else { usize::MAX };
                let k = row.len();
                if ra <= rb {
                    lhs.push(k);
                    i += 1;
                }
                if rb <= ra {
                    rhs.push(k);
                    j += 1;
                }
                row.push(ra.min(rb));
            }
            colind.push(row.len());
        }
        Ok((Self::from_parts(a.nrow, a.ncol, colind, row), lhs, rhs))
    }

    /// Intersection, plus for every output nonzero the nonzero of `self` and
    /// of `other` it comes from.
    pub(crate) fn intersection_with_mapping(
        &self,
        other: &Sparsity,
    ) -> Result<(Sparsity, Vec<usize>, Vec<usize>), GraphError> {
        self.check_same_shape(other)?;
        if self == other {
            let id: Vec<usize> = (0..self.nnz()).collect();
            return Ok((self.clone(), id.clone(), id));
        }
        let (a, b) = (&*self.0, &*other.0);
        let mut colind = Vec::with_capacity(a.ncol + 1);
        colind.push(0);
        let mut row = Vec::new();
        let mut lhs = Vec::new();
        let mut rhs = Vec::new();
        for c in 0..a.ncol {
            let (mut i, ie) = (a.colind[c], a.colind[c + 1]);
            let (mut j, je) = (b.colind[c], b.colind[c + 1]);
            while i < ie && j < je {
                match a.row[i].cmp(&b.row[j]) {
                    std::cmp::Ordering::Less => i += 1,
                    std::cmp::Ordering::Greater => j += 1,
                    std::cmp::Ordering::Equal => {
                        row.push(a.row[i]);
                        lhs.push(i);
                        rhs.push(j);
                        i += 1;
                        j += 1;
                    }
                }
            }
            colind.push(row.len());
        }
        Ok((Self::from_parts(a.nrow, a.ncol, colind, row), lhs, rhs))
    }
}

impl fmt::Debug for Sparsity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sparsity({self})")
    }
}

impl fmt::Display for Sparsity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_dense() {
            "dense"
        } else if self.is_diagonal() {
            "diagonal"
        } else {
            "sparse"
        };
        write!(
            f,
            "{kind} {}-by-{} matrix, {} nonzeros",
            self.nrow(),
            self.ncol(),
            self.nnz()
        )
    }
}
