use crate::errors::{RandNLAError, Result};
use crate::operand::Element;

fn check_lengths<T>(x: &[T], signs: Option<&[T]>) -> Result<()> {
    let n = x.len();
    if !n.is_power_of_two() {
        return Err(RandNLAError::InvalidDimensions(format!(
            "Hadamard transform needs a power-of-two length, found {}",
            n
        )));
    }
    if let Some(signs) = signs {
        if signs.len() != n {
            return Err(RandNLAError::mismatch(
                "Hadamard transform",
                "sign vector length",
                signs.len(),
                "input length",
                n,
            ));
        }
    }
    Ok(())
}

/// Unnormalized butterfly passes, `x ← H x`.
fn butterfly<T: Element>(x: &mut [T]) {
    let n = x.len();
    let mut h = 1;
    while h < n {
        for start in (0..n).step_by(2 * h) {
            for j in start..start + h {
                let a = x[j];
                let b = x[j + h];
                x[j] = a + b;
                x[j + h] = a - b;
            }
        }
        h *= 2;
    }
}

fn rescale<T: Element>(x: &mut [T], scale: T) {
    if scale != T::one() {
        for v in x.iter_mut() {
            *v *= scale;
        }
    }
}

/**
Fast Walsh–Hadamard transform, in place.

* Inputs:
`x` has power-of-two length `n`,
`signs` is an optional ±1 vector of length `n` applied before the transform,
`scale` multiplies the result.

* Output:
`x ← scale · H · diag(signs) · x` where `H` is the unnormalized Sylvester
Hadamard matrix, `H[i, j] = (-1)^popcount(i & j)`.

* Inverse:
Without signs the transform inverts itself up to scale,
`fwht(fwht(x, None, 1), None, 1/n) = x`. With signs it does not, because
the flip happens before `H` on both passes: `fwht(fwht(x, s, 1), s, 1/n)`
is `diag(s) · H · diag(s) · H · x / n`. Undo a signed transform with
[`ifwht`], which flips after `H`.
 */
pub fn fwht<T: Element>(x: &mut [T], signs: Option<&[T]>, scale: T) -> Result<()> {
    check_lengths(x, signs)?;
    fwht_unchecked(x, signs, scale);
    Ok(())
}

/// [`fwht`] for callers that already hold a valid length.
pub(crate) fn fwht_unchecked<T: Element>(x: &mut [T], signs: Option<&[T]>, scale: T) {
    if let Some(signs) = signs {
        for (v, s) in x.iter_mut().zip(signs) {
            *v *= *s;
        }
    }
    butterfly(x);
    rescale(x, scale);
}

/// Inverse companion of [`fwht`]: `x ← diag(signs) · scale · H · x`.
///
/// Since `H·H = n·I`, `ifwht(fwht(x, s, 1), s, 1/n)` returns `x`.
pub fn ifwht<T: Element>(x: &mut [T], signs: Option<&[T]>, scale: T) -> Result<()> {
    check_lengths(x, signs)?;
    ifwht_unchecked(x, signs, scale);
    Ok(())
}

pub(crate) fn ifwht_unchecked<T: Element>(x: &mut [T], signs: Option<&[T]>, scale: T) {
    butterfly(x);
    rescale(x, scale);
    if let Some(signs) = signs {
        for (v, s) in x.iter_mut().zip(signs) {
            *v *= *s;
        }
    }
}

/// Entry `(row, col)` of the unnormalized Hadamard matrix.
pub fn hadamard_entry<T: Element>(row: usize, col: usize) -> T {
    if (row & col).count_ones() % 2 == 0 {
        T::one()
    } else {
        -T::one()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Complex;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_matches_explicit_hadamard() {
        let x = [1.0, 2.0, -1.0, 0.5, 3.0, 0.0, -2.0, 1.0];
        let mut y = x;
        fwht(&mut y, None, 1.0).unwrap();
        for i in 0..8 {
            let expected: f64 = (0..8).map(|j| hadamard_entry::<f64>(i, j) * x[j]).sum();
            assert_relative_eq!(y[i], expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_round_trip_with_signs() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for &n in &[1usize, 2, 16, 256] {
            let x: Vec<f64> = (0..n).map(|_| rng.gen_range(-5.0..5.0)).collect();
            let signs: Vec<f64> = (0..n).map(|_| if rng.gen::<bool>() { 1.0 } else { -1.0 }).collect();
            let mut y = x.clone();
            fwht(&mut y, Some(&signs[..]), 1.0).unwrap();
            ifwht(&mut y, Some(&signs[..]), 1.0 / n as f64).unwrap();
            for (a, b) in x.iter().zip(&y) {
                assert_relative_eq!(*a, *b, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn test_unsigned_transform_is_involution_up_to_scale() {
        let x = [Complex::new(1.0, -1.0), Complex::new(0.0, 2.0), Complex::new(3.0, 0.0), Complex::new(-1.0, 1.0)];
        let mut y = x;
        fwht(&mut y, None, Complex::new(1.0, 0.0)).unwrap();
        fwht(&mut y, None, Complex::new(0.25, 0.0)).unwrap();
        for (a, b) in x.iter().zip(&y) {
            assert_relative_eq!(a.re, b.re, epsilon = 1e-12);
            assert_relative_eq!(a.im, b.im, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_signed_transform_is_not_its_own_inverse() {
        let signs = [1.0, -1.0];
        let mut y = [1.0, 0.0];
        fwht(&mut y, Some(&signs[..]), 1.0).unwrap();
        fwht(&mut y, Some(&signs[..]), 0.5).unwrap();
        assert_eq!(y, [0.0, 1.0]);

        let mut y = [1.0, 0.0];
        fwht(&mut y, Some(&signs[..]), 1.0).unwrap();
        ifwht(&mut y, Some(&signs[..]), 0.5).unwrap();
        assert_eq!(y, [1.0, 0.0]);
    }

    #[test]
    fn test_non_power_of_two_fails() {
        let mut x = vec![1.0; 6];
        let err = fwht(&mut x, None, 1.0).unwrap_err();
        assert!(err.is_dimension_error());
        let mut empty: Vec<f64> = Vec::new();
        assert!(fwht(&mut empty, None, 1.0).is_err());
    }

    #[test]
    fn test_sign_length_mismatch_fails() {
        let mut x = vec![1.0; 8];
        let signs = vec![1.0; 4];
        let err = fwht(&mut x, Some(&signs[..]), 1.0).unwrap_err();
        assert!(matches!(err, RandNLAError::DimensionMismatch { left: 4, right: 8, .. }));
        assert!(ifwht(&mut x, Some(&signs[..]), 1.0).is_err());
    }
}
