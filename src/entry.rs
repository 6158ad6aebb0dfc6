use std::fmt::Debug;
use std::ops::Neg;

use num_complex::Complex;
use num_traits::NumAssign;

/// Scalar kinds the factorization runs over: real or complex, single or
/// double precision. The numeric phase is monomorphized per kind; pivot
/// comparisons go through [`Entry::modulus`].
pub trait Entry:
    NumAssign + Neg<Output = Self> + Copy + Send + Sync + PartialEq + Debug + 'static
{
    /// Magnitude used for threshold pivot selection.
    fn modulus(self) -> f64;
}

impl Entry for f32 {
    fn modulus(self) -> f64 {
        self.abs() as f64
    }
}

impl Entry for f64 {
    fn modulus(self) -> f64 {
        self.abs()
    }
}

impl Entry for Complex<f32> {
    fn modulus(self) -> f64 {
        self.norm() as f64
    }
}

impl Entry for Complex<f64> {
    fn modulus(self) -> f64 {
        self.norm()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modulus_matches_absolute_value() {
        assert_eq!((-3.0f64).modulus(), 3.0);
        assert_eq!(2.5f32.modulus(), 2.5);
        let z = Complex::new(3.0f64, 4.0f64);
        assert!((z.modulus() - 5.0).abs() < 1e-15);
    }
}
