//! Hadamard-based sketches.
//!
//! Both operators share the form `S = scale · M · H · D · P` on the padded
//! source dimension `p = next_power_of_two(n)`: `P` zero-pads to `p`, `D` is
//! a random ±1 diagonal drawn once per binding, `H` is the unnormalized
//! Hadamard matrix and `M` is the per-update mixing stage. SRHT mixes by
//! selecting `compression_dim` distinct rows of `H`; FJLT by a sparse
//! Gaussian matrix. Left recipes have this shape; Right recipes are the
//! transpose. `S` is never materialized.
//!
//! The padded transform `scale · H · D · P` of the bound source is cached at
//! `complete` and recomputed only when `update` sees a different source
//! object or [`SrhtRecipe::refresh`] is called, so sketching the bound
//! source costs one `compression_dim`-sized remix per source line. Every
//! other operand is transformed line by line on each multiply.

use std::cell::RefCell;

use nalgebra::{DMatrix, DMatrixViewMut};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use super::{bound_shape, check_bound_source, shuffle_prefix, Cardinality, Compressor, CompressorConfig, Role};
use crate::errors::{RandNLAError, Result};
use crate::fwht::{fwht_unchecked, hadamard_entry, ifwht_unchecked};
use crate::operand::{from_f64, Element, Operand};

/// Subsampled randomized Hadamard transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Srht {
    pub cardinality: Cardinality,
    pub compression_dim: usize,
}

impl Default for Srht {
    fn default() -> Self {
        Self {
            cardinality: Cardinality::Left,
            compression_dim: 8,
        }
    }
}

/// Fast Johnson–Lindenstrauss transform. Each mixing entry is nonzero with
/// probability `sparsity`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fjlt {
    pub cardinality: Cardinality,
    pub compression_dim: usize,
    pub sparsity: f64,
}

impl Default for Fjlt {
    fn default() -> Self {
        Self {
            cardinality: Cardinality::Left,
            compression_dim: 8,
            sparsity: 0.1,
        }
    }
}

/// The `M` stage: a `compression_dim × p` map between the compact and the
/// padded space.
trait Mixing<T> {
    /// `out ← M · padded`
    fn gather(&self, padded: &[T], out: &mut [T]);

    /// `padded += Mᵀ · compact`
    fn scatter(&self, compact: &[T], padded: &mut [T]);

    fn for_each_mix<F: FnMut(usize, usize, T)>(&self, f: F);
}

#[derive(Debug, Clone, PartialEq)]
struct HadamardCore<T> {
    cardinality: Cardinality,
    compression_dim: usize,
    shape: (usize, usize),
    source_dim: usize,
    signs: Vec<T>,
    scale: T,
    padded: RefCell<Vec<T>>,
    compact: RefCell<Vec<T>>,
    /// `scale · H · D · P` applied along the source dimension of the bound
    /// source, one padded column per source line.
    transformed: DMatrix<T>,
    source_shape: (usize, usize),
    source_addr: usize,
}

/// Identity of an operand, used to recognize the bound source.
fn address<O: ?Sized>(source: &O) -> usize {
    source as *const O as *const () as usize
}

impl<T: Element> HadamardCore<T> {
    fn new<O, R>(
        cardinality: Cardinality,
        compression_dim: usize,
        source: &O,
        rng: &mut R,
        what: &'static str,
    ) -> Result<Self>
    where
        O: Operand<T> + ?Sized,
        R: Rng + ?Sized,
    {
        let shape = bound_shape(cardinality, compression_dim, source.shape(), what)?;
        let source_dim = match cardinality {
            Cardinality::Left => shape.1,
            _ => shape.0,
        };
        let p = source_dim.next_power_of_two();
        let signs = (0..p)
            .map(|_| if rng.gen::<bool>() { T::one() } else { -T::one() })
            .collect();
        Ok(Self {
            cardinality,
            compression_dim,
            shape,
            source_dim,
            signs,
            scale: T::one(),
            padded: RefCell::new(vec![T::zero(); p]),
            compact: RefCell::new(vec![T::zero(); compression_dim]),
            transformed: DMatrix::zeros(p, 0),
            source_shape: (0, 0),
            source_addr: 0,
        })
    }

    fn padded_size(&self) -> usize {
        self.signs.len()
    }

    fn check_source(&self, source_shape: (usize, usize), what: &'static str) -> Result<()> {
        check_bound_source(self.cardinality, self.shape, source_shape, what)
    }

    fn source_lines(&self, source_shape: (usize, usize)) -> usize {
        match self.cardinality {
            Cardinality::Left => source_shape.1,
            _ => source_shape.0,
        }
    }

    /// Recomputes the cached transform of `source` and binds it.
    fn transform_source<O: Operand<T> + ?Sized>(&mut self, source: &O) {
        let p = self.padded_size();
        let lines = self.source_lines(source.shape());
        if self.transformed.ncols() != lines {
            self.transformed = DMatrix::zeros(p, lines);
        }
        let by_columns = self.cardinality == Cardinality::Left;
        let n = self.source_dim;
        let padded = self.padded.get_mut();
        for line in 0..lines {
            padded.fill(T::zero());
            {
                let input = &mut padded[..n];
                if by_columns {
                    let mut view = DMatrixViewMut::from_slice(input, n, 1);
                    source.col_axpy(line, T::one(), &mut view, 0);
                } else {
                    let mut view = DMatrixViewMut::from_slice(input, 1, n);
                    source.row_axpy(line, T::one(), &mut view, 0);
                }
            }
            fwht_unchecked(&mut padded[..], Some(&self.signs[..]), self.scale);
            self.transformed.column_mut(line).copy_from_slice(&padded[..]);
        }
        self.source_shape = source.shape();
        self.source_addr = address(source);
    }

    /// Retransforms only when `source` is not the bound source object.
    fn track_source<O: Operand<T> + ?Sized>(&mut self, source: &O) {
        if address(source) != self.source_addr || source.shape() != self.source_shape {
            self.transform_source(source);
        }
    }

    /// Whether a forward multiply over `b`'s lines can read the cache.
    fn is_bound_source<O: Operand<T> + ?Sized>(&self, b: &O, by_columns: bool) -> bool {
        by_columns == (self.cardinality == Cardinality::Left)
            && address(b) == self.source_addr
            && b.shape() == self.source_shape
    }

    /// `c += alpha · M · cached line`, for every line of the bound source.
    fn apply_cached<M: Mixing<T>>(
        &self,
        mix: &M,
        by_columns: bool,
        alpha: T,
        c: &mut DMatrixViewMut<'_, T>,
    ) {
        let p = self.padded_size();
        let mut compact = self.compact.borrow_mut();
        let cached = self.transformed.as_slice();
        for line in 0..self.transformed.ncols() {
            mix.gather(&cached[line * p..(line + 1) * p], &mut compact);
            for (i, v) in compact.iter().enumerate() {
                if by_columns {
                    c[(i, line)] += alpha * *v;
                } else {
                    c[(line, i)] += alpha * *v;
                }
            }
        }
    }

    /// Whether a left or right multiply applies the Left-shaped operator
    /// (`n → compression_dim`) or its transpose.
    fn forward(&self, role: Role, left_multiply: bool) -> bool {
        let left_shaped = self.cardinality == Cardinality::Left;
        let plain = role == Role::Plain;
        if left_multiply {
            left_shaped == plain
        } else {
            left_shaped != plain
        }
    }

    /// Transforms every column (`by_columns`) or row of `b` and accumulates
    /// `alpha` times the result into the matching line of `c`.
    fn apply<M, O>(
        &self,
        mix: &M,
        forward: bool,
        by_columns: bool,
        alpha: T,
        b: &O,
        c: &mut DMatrixViewMut<'_, T>,
    ) where
        M: Mixing<T>,
        O: Operand<T> + ?Sized,
    {
        if forward && self.is_bound_source(b, by_columns) {
            self.apply_cached(mix, by_columns, alpha, c);
            return;
        }
        let mut padded = self.padded.borrow_mut();
        let mut compact = self.compact.borrow_mut();
        let (in_len, out_len) = if forward {
            (self.source_dim, self.compression_dim)
        } else {
            (self.compression_dim, self.source_dim)
        };
        let lines = if by_columns { b.ncols() } else { b.nrows() };

        for line in 0..lines {
            padded.fill(T::zero());
            compact.fill(T::zero());
            {
                let input = if forward { &mut padded[..in_len] } else { &mut compact[..in_len] };
                if by_columns {
                    let mut view = DMatrixViewMut::from_slice(input, in_len, 1);
                    b.col_axpy(line, T::one(), &mut view, 0);
                } else {
                    let mut view = DMatrixViewMut::from_slice(input, 1, in_len);
                    b.row_axpy(line, T::one(), &mut view, 0);
                }
            }

            let output: &[T] = if forward {
                fwht_unchecked(&mut padded, Some(&self.signs[..]), self.scale);
                mix.gather(&padded, &mut compact);
                &compact[..out_len]
            } else {
                mix.scatter(&compact, &mut padded);
                ifwht_unchecked(&mut padded, Some(&self.signs[..]), self.scale);
                &padded[..out_len]
            };

            for (i, v) in output.iter().enumerate() {
                if by_columns {
                    c[(i, line)] += alpha * *v;
                } else {
                    c[(line, i)] += alpha * *v;
                }
            }
        }
    }

    fn for_each_entry<M, F>(&self, mix: &M, mut f: F)
    where
        M: Mixing<T>,
        F: FnMut(usize, usize, T),
    {
        let left = self.cardinality == Cardinality::Left;
        mix.for_each_mix(|i, h_row, m| {
            for j in 0..self.source_dim {
                let v = self.scale * m * hadamard_entry::<T>(h_row, j) * self.signs[j];
                if left {
                    f(i, j, v);
                } else {
                    f(j, i, v);
                }
            }
        });
    }
}

#[derive(Debug, Clone, PartialEq)]
struct RowSelection {
    rows: Vec<usize>,
    perm: Vec<usize>,
}

impl<T: Element> Mixing<T> for RowSelection {
    fn gather(&self, padded: &[T], out: &mut [T]) {
        for (o, &r) in out.iter_mut().zip(&self.rows) {
            *o = padded[r];
        }
    }

    fn scatter(&self, compact: &[T], padded: &mut [T]) {
        for (v, &r) in compact.iter().zip(&self.rows) {
            padded[r] += *v;
        }
    }

    fn for_each_mix<F: FnMut(usize, usize, T)>(&self, mut f: F) {
        for (i, &r) in self.rows.iter().enumerate() {
            f(i, r, T::one());
        }
    }
}

/// Sparse `compression_dim × p` mixing matrix in row-compressed form.
#[derive(Debug, Clone, PartialEq)]
struct SparseMix<T> {
    row_ptrs: Vec<usize>,
    cols: Vec<usize>,
    vals: Vec<T>,
}

impl<T: Element> SparseMix<T> {
    fn draw<R: Rng + ?Sized>(&mut self, rows: usize, p: usize, sparsity: f64, rng: &mut R) {
        self.row_ptrs.clear();
        self.cols.clear();
        self.vals.clear();
        self.row_ptrs.push(0);
        for _ in 0..rows {
            let start = self.cols.len();
            for col in 0..p {
                if rng.gen_bool(sparsity) {
                    let z: f64 = StandardNormal.sample(rng);
                    self.cols.push(col);
                    self.vals.push(from_f64(z));
                }
            }
            if self.cols.len() == start {
                let z: f64 = StandardNormal.sample(rng);
                self.cols.push(rng.gen_range(0..p));
                self.vals.push(from_f64(z));
            }
            self.row_ptrs.push(self.cols.len());
        }
    }
}

impl<T: Element> Mixing<T> for SparseMix<T> {
    fn gather(&self, padded: &[T], out: &mut [T]) {
        for (i, o) in out.iter_mut().enumerate() {
            let span = self.row_ptrs[i]..self.row_ptrs[i + 1];
            *o = self.cols[span.clone()]
                .iter()
                .zip(&self.vals[span])
                .fold(T::zero(), |acc, (&col, &v)| acc + v * padded[col]);
        }
    }

    fn scatter(&self, compact: &[T], padded: &mut [T]) {
        for (i, y) in compact.iter().enumerate() {
            let span = self.row_ptrs[i]..self.row_ptrs[i + 1];
            for (&col, &v) in self.cols[span.clone()].iter().zip(&self.vals[span]) {
                padded[col] += v * *y;
            }
        }
    }

    fn for_each_mix<F: FnMut(usize, usize, T)>(&self, mut f: F) {
        for i in 0..self.row_ptrs.len().saturating_sub(1) {
            for idx in self.row_ptrs[i]..self.row_ptrs[i + 1] {
                f(i, self.cols[idx], self.vals[idx]);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SrhtRecipe<T> {
    core: HadamardCore<T>,
    selection: RowSelection,
}

impl<T: Element> SrhtRecipe<T> {
    pub fn padded_size(&self) -> usize {
        self.core.padded_size()
    }

    pub fn signs(&self) -> &[T] {
        &self.core.signs
    }

    /// Recomputes the cached transform after `source` changed in place.
    /// `update` alone only notices a different source object.
    pub fn refresh<O: Operand<T> + ?Sized>(&mut self, source: &O) -> Result<()> {
        self.core.check_source(source.shape(), "SRHT refresh")?;
        self.core.transform_source(source);
        Ok(())
    }

    /// Hadamard rows selected by the current draw.
    pub fn rows(&self) -> &[usize] {
        &self.selection.rows
    }

    fn draw<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let k = self.core.compression_dim;
        shuffle_prefix(&mut self.selection.perm, k, rng);
        self.selection.rows.copy_from_slice(&self.selection.perm[..k]);
    }
}

impl<T: Element> CompressorConfig<T> for Srht {
    type Recipe = SrhtRecipe<T>;

    fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    fn compression_dim(&self) -> usize {
        self.compression_dim
    }

    fn complete_for<O, R>(&self, cardinality: Cardinality, source: &O, rng: &mut R) -> Result<SrhtRecipe<T>>
    where
        O: Operand<T> + ?Sized,
        R: Rng + ?Sized,
    {
        let mut core = HadamardCore::new(cardinality, self.compression_dim, source, rng, "SRHT")?;
        let p = core.padded_size();
        if self.compression_dim > p {
            return Err(RandNLAError::invalid_argument(
                "compression_dim",
                format!(
                    "SRHT selects at most {} distinct Hadamard rows, asked for {}",
                    p, self.compression_dim
                ),
            ));
        }
        let k = self.compression_dim as f64;
        core.scale = from_f64((p as f64 / k).sqrt() / (p as f64).sqrt());
        core.transform_source(source);
        let mut recipe = SrhtRecipe {
            core,
            selection: RowSelection {
                rows: vec![0; self.compression_dim],
                perm: (0..p).collect(),
            },
        };
        recipe.draw(rng);
        Ok(recipe)
    }
}

impl<T: Element> Compressor<T> for SrhtRecipe<T> {
    fn cardinality(&self) -> Cardinality {
        self.core.cardinality
    }

    fn compression_dim(&self) -> usize {
        self.core.compression_dim
    }

    fn shape(&self) -> (usize, usize) {
        self.core.shape
    }

    fn update<O, R>(&mut self, source: &O, rng: &mut R) -> Result<()>
    where
        O: Operand<T> + ?Sized,
        R: Rng + ?Sized,
    {
        self.core.check_source(source.shape(), "SRHT update")?;
        self.core.track_source(source);
        self.draw(rng);
        Ok(())
    }

    fn for_each_entry<F: FnMut(usize, usize, T)>(&self, f: F) {
        self.core.for_each_entry(&self.selection, f);
    }

    fn apply_left<O: Operand<T> + ?Sized>(&self, role: Role, alpha: T, b: &O, c: &mut DMatrixViewMut<'_, T>) {
        let forward = self.core.forward(role, true);
        self.core.apply(&self.selection, forward, true, alpha, b, c);
    }

    fn apply_right<O: Operand<T> + ?Sized>(&self, role: Role, alpha: T, b: &O, c: &mut DMatrixViewMut<'_, T>) {
        let forward = self.core.forward(role, false);
        self.core.apply(&self.selection, forward, false, alpha, b, c);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FjltRecipe<T> {
    core: HadamardCore<T>,
    sparsity: f64,
    mix: SparseMix<T>,
}

impl<T: Element> FjltRecipe<T> {
    pub fn padded_size(&self) -> usize {
        self.core.padded_size()
    }

    pub fn signs(&self) -> &[T] {
        &self.core.signs
    }

    /// See [`SrhtRecipe::refresh`].
    pub fn refresh<O: Operand<T> + ?Sized>(&mut self, source: &O) -> Result<()> {
        self.core.check_source(source.shape(), "FJLT refresh")?;
        self.core.transform_source(source);
        Ok(())
    }

    /// Stored entries of the current mixing matrix.
    pub fn mixing_nnz(&self) -> usize {
        self.mix.vals.len()
    }

    /// Stored entries in mixing row `i`.
    pub fn mixing_row_nnz(&self, i: usize) -> usize {
        self.mix.row_ptrs[i + 1] - self.mix.row_ptrs[i]
    }

    fn draw<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let p = self.core.padded_size();
        self.mix.draw(self.core.compression_dim, p, self.sparsity, rng);
    }
}

impl<T: Element> CompressorConfig<T> for Fjlt {
    type Recipe = FjltRecipe<T>;

    fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    fn compression_dim(&self) -> usize {
        self.compression_dim
    }

    fn complete_for<O, R>(&self, cardinality: Cardinality, source: &O, rng: &mut R) -> Result<FjltRecipe<T>>
    where
        O: Operand<T> + ?Sized,
        R: Rng + ?Sized,
    {
        if !(self.sparsity > 0.0 && self.sparsity <= 1.0) {
            return Err(RandNLAError::invalid_argument(
                "sparsity",
                format!("sparsity must lie in (0, 1], found {}", self.sparsity),
            ));
        }
        let mut core = HadamardCore::new(cardinality, self.compression_dim, source, rng, "FJLT")?;
        let p = core.padded_size() as f64;
        core.scale = from_f64(1.0 / (p * self.compression_dim as f64 * self.sparsity).sqrt());
        core.transform_source(source);
        let mut recipe = FjltRecipe {
            core,
            sparsity: self.sparsity,
            mix: SparseMix {
                row_ptrs: Vec::with_capacity(self.compression_dim + 1),
                cols: Vec::new(),
                vals: Vec::new(),
            },
        };
        recipe.draw(rng);
        Ok(recipe)
    }
}

impl<T: Element> Compressor<T> for FjltRecipe<T> {
    fn cardinality(&self) -> Cardinality {
        self.core.cardinality
    }

    fn compression_dim(&self) -> usize {
        self.core.compression_dim
    }

    fn shape(&self) -> (usize, usize) {
        self.core.shape
    }

    fn update<O, R>(&mut self, source: &O, rng: &mut R) -> Result<()>
    where
        O: Operand<T> + ?Sized,
        R: Rng + ?Sized,
    {
        self.core.check_source(source.shape(), "FJLT update")?;
        self.core.track_source(source);
        self.draw(rng);
        Ok(())
    }

    fn for_each_entry<F: FnMut(usize, usize, T)>(&self, f: F) {
        self.core.for_each_entry(&self.mix, f);
    }

    fn apply_left<O: Operand<T> + ?Sized>(&self, role: Role, alpha: T, b: &O, c: &mut DMatrixViewMut<'_, T>) {
        let forward = self.core.forward(role, true);
        self.core.apply(&self.mix, forward, true, alpha, b, c);
    }

    fn apply_right<O: Operand<T> + ?Sized>(&self, role: Role, alpha: T, b: &O, c: &mut DMatrixViewMut<'_, T>) {
        let forward = self.core.forward(role, false);
        self.core.apply(&self.mix, forward, false, alpha, b, c);
    }
}
