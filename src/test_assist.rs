use nalgebra::{Complex, DMatrix, DVector};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

/// Generates a random matrix of size (rows, cols) with normally distributed elems
pub fn generate_random_matrix<R: Rng + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> DMatrix<f64> {
    let data: Vec<f64> = (0..rows * cols).map(|_| StandardNormal.sample(rng)).collect();
    DMatrix::from_vec(rows, cols, data)
}

/// Generates a random vector of length n with normally distributed elems
pub fn generate_random_vector<R: Rng + ?Sized>(n: usize, rng: &mut R) -> DVector<f64> {
    DVector::from_iterator(n, (0..n).map(|_| StandardNormal.sample(rng)))
}

/// Generates a complex matrix whose real and imaginary parts are independent normals
pub fn generate_random_complex_matrix<R: Rng + ?Sized>(
    rows: usize,
    cols: usize,
    rng: &mut R,
) -> DMatrix<Complex<f64>> {
    DMatrix::from_fn(rows, cols, |_, _| {
        Complex::new(StandardNormal.sample(rng), StandardNormal.sample(rng))
    })
}

/// Builds a consistent system `b = A x` with a normal `A` of size (rows, cols)
pub fn generate_consistent_system<R: Rng + ?Sized>(
    rows: usize,
    cols: usize,
    rng: &mut R,
) -> (DMatrix<f64>, DVector<f64>, DVector<f64>) {
    let a = generate_random_matrix(rows, cols, rng);
    let x = generate_random_vector(cols, rng);
    let b = &a * &x;
    (a, x, b)
}

pub fn check_approx_equal(a: &DMatrix<f64>, b: &DMatrix<f64>, tolerance: f64) -> bool {
    if a.shape() != b.shape() {
        return false;
    }

    for i in 0..a.nrows() {
        for j in 0..a.ncols() {
            if (a[(i, j)] - b[(i, j)]).abs() > tolerance {
                return false;
            }
        }
    }

    true
}

/// Entrywise modulus check for complex matrices
pub fn check_approx_equal_complex(
    a: &DMatrix<Complex<f64>>,
    b: &DMatrix<Complex<f64>>,
    tolerance: f64,
) -> bool {
    a.shape() == b.shape() && a.iter().zip(b.iter()).all(|(x, y)| (x - y).norm() <= tolerance)
}
