//! # GF(2^8) Arithmetic
//!
//! Byte-wise arithmetic in the Rijndael field: GF(2)[x] modulo the
//! irreducible polynomial `x^8 + x^4 + x^3 + x + 1` (0x11B). Every byte is a
//! field element, which is exactly what secret sharing over raw key bytes
//! needs.
//!
//! ## Operations
//!
//! - Addition is XOR. Subtraction is also XOR (characteristic 2), so
//!   `add(a, a) == 0` and `x - x_m` in a Lagrange basis is just `x ^ x_m`.
//! - Multiplication is carry-less shift-and-add with reduction by 0x1B every
//!   time a bit falls off the top of the byte. No lookup tables, no
//!   secret-dependent memory access.
//! - The multiplicative group has order 255, so `a^254 == a^-1` for any
//!   non-zero `a`. Division multiplies by that inverse.

use thiserror::Error;

/// Low byte of the reduction polynomial. The x^8 term is implicit: it is the
/// bit that overflows out of the byte.
const REDUCTION: u8 = 0x1B;

/// Errors from field arithmetic.
///
/// There is exactly one: dividing by zero. Reaching it means the caller fed
/// the field a degenerate input (for example two shares with the same
/// x-coordinate), which is a bug upstream, not a runtime condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("division by zero in GF(256)")]
    DivisionByZero,
}

/// Add two field elements. Addition in GF(2^8) is XOR.
#[inline]
pub fn add(a: u8, b: u8) -> u8 {
    a ^ b
}

/// Subtract two field elements. Same as [`add`].
#[inline]
pub fn sub(a: u8, b: u8) -> u8 {
    a ^ b
}

/// Multiply two field elements.
///
/// Runs a fixed eight rounds regardless of the operands: for each bit of
/// `b`, conditionally accumulate `a`, then double `a` (shift left) and reduce
/// by 0x1B if the high bit carried out.
pub fn mul(a: u8, b: u8) -> u8 {
    let mut a = a;
    let mut b = b;
    let mut product = 0u8;

    for _ in 0..8 {
        if b & 1 != 0 {
            product ^= a;
        }
        let carry = a & 0x80 != 0;
        a <<= 1;
        if carry {
            a ^= REDUCTION;
        }
        b >>= 1;
    }

    product
}

/// Raise `a` to the power `exponent` by square-and-multiply.
///
/// `pow(a, 0) == 1` for every `a`, including zero.
pub fn pow(a: u8, exponent: u8) -> u8 {
    let mut result = 1u8;
    let mut base = a;
    let mut exp = exponent;

    while exp > 0 {
        if exp & 1 == 1 {
            result = mul(result, base);
        }
        base = mul(base, base);
        exp >>= 1;
    }

    result
}

/// Multiplicative inverse of a non-zero element, computed as `a^254`.
///
/// Zero has no inverse. Calling this with zero is a programming error: debug
/// builds assert, release builds return 0. Use [`div`] when the divisor is
/// not known to be non-zero.
pub fn inverse(a: u8) -> u8 {
    debug_assert!(a != 0, "zero has no multiplicative inverse in GF(256)");
    pow(a, 254)
}

/// Divide `a` by `b`.
pub fn div(a: u8, b: u8) -> Result<u8, FieldError> {
    if b == 0 {
        return Err(FieldError::DivisionByZero);
    }
    Ok(mul(a, inverse(b)))
}

/// Evaluate a polynomial at point `x` using Horner's method.
///
/// `coefficients[0]` is the constant term (the secret byte), `coefficients[1]`
/// is the x^1 coefficient, and so on.
pub fn eval_polynomial(coefficients: &[u8], x: u8) -> u8 {
    coefficients
        .iter()
        .rev()
        .fold(0u8, |acc, &coeff| add(mul(acc, x), coeff))
}

/// Lagrange interpolation at x = 0.
///
/// Given points `(xs[j], ys[j])`, returns
/// `sum_j ys[j] * prod_{m != j} xs[m] / (xs[j] ^ xs[m])`.
///
/// Fails with [`FieldError::DivisionByZero`] if two x-coordinates coincide.
pub fn lagrange_interpolate_at_zero(xs: &[u8], ys: &[u8]) -> Result<u8, FieldError> {
    debug_assert_eq!(xs.len(), ys.len());
    let mut value = 0u8;

    for (j, (&xj, &yj)) in xs.iter().zip(ys).enumerate() {
        let mut numerator = 1u8;
        let mut denominator = 1u8;

        for (m, &xm) in xs.iter().enumerate() {
            if m == j {
                continue;
            }
            // (0 - x_m) == x_m in characteristic 2.
            numerator = mul(numerator, xm);
            denominator = mul(denominator, sub(xj, xm));
        }

        let basis = div(numerator, denominator)?;
        value = add(value, mul(yj, basis));
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_xor() {
        assert_eq!(add(0xFF, 0xFF), 0);
        assert_eq!(add(0xAB, 0x00), 0xAB);
        for a in 0..=255u8 {
            assert_eq!(add(a, a), 0);
        }
    }

    #[test]
    fn mul_known_vectors() {
        // FIPS-197 section 4.2 worked example: {57} * {83} = {c1}.
        assert_eq!(mul(0x57, 0x83), 0xC1);
        // {57} * {13} = {fe}.
        assert_eq!(mul(0x57, 0x13), 0xFE);
        assert_eq!(mul(0x02, 0x80), 0x1B);
    }

    #[test]
    fn mul_identity_and_zero() {
        for i in 0..=255u8 {
            assert_eq!(mul(i, 1), i);
            assert_eq!(mul(1, i), i);
            assert_eq!(mul(i, 0), 0);
            assert_eq!(mul(0, i), 0);
        }
    }

    #[test]
    fn mul_is_commutative_and_distributive() {
        for a in (0..=255u8).step_by(7) {
            for b in (0..=255u8).step_by(11) {
                assert_eq!(mul(a, b), mul(b, a));
                for c in [0x00, 0x01, 0x53, 0xCA, 0xFF] {
                    assert_eq!(mul(a, add(b, c)), add(mul(a, b), mul(a, c)));
                    assert_eq!(mul(mul(a, b), c), mul(a, mul(b, c)));
                }
            }
        }
    }

    #[test]
    fn generator_three_has_order_255() {
        // 0x03 generates the whole multiplicative group: its powers hit every
        // non-zero element exactly once before cycling back to 1.
        let mut seen = [false; 256];
        let mut value = 1u8;
        for _ in 0..255 {
            assert!(!seen[value as usize], "cycle shorter than 255");
            seen[value as usize] = true;
            value = mul(value, 0x03);
        }
        assert_eq!(value, 1);
        assert!(!seen[0]);
    }

    #[test]
    fn pow_basics() {
        for a in 0..=255u8 {
            assert_eq!(pow(a, 0), 1);
            assert_eq!(pow(a, 1), a);
            assert_eq!(pow(a, 2), mul(a, a));
        }
    }

    #[test]
    fn inverse_round_trips() {
        assert_eq!(inverse(0x53), 0xCA);
        for a in 1..=255u8 {
            assert_eq!(mul(a, inverse(a)), 1, "inverse failed for {a:#04x}");
        }
    }

    #[test]
    fn mul_div_inverse() {
        for a in 0..=255u8 {
            for b in 1..=255u8 {
                let product = mul(a, b);
                assert_eq!(div(product, b).unwrap(), a);
            }
        }
    }

    #[test]
    fn div_by_zero_is_an_error() {
        assert_eq!(div(0x42, 0), Err(FieldError::DivisionByZero));
        assert_eq!(div(0, 0), Err(FieldError::DivisionByZero));
    }

    #[test]
    fn polynomial_eval_constant() {
        assert_eq!(eval_polynomial(&[42], 1), 42);
        assert_eq!(eval_polynomial(&[42], 100), 42);
        assert_eq!(eval_polynomial(&[], 7), 0);
    }

    #[test]
    fn polynomial_eval_linear() {
        // f(x) = 5 + 3x, f(2) = 5 ^ mul(3, 2) = 5 ^ 6 = 3
        assert_eq!(eval_polynomial(&[5, 3], 2), 3);
        assert_eq!(eval_polynomial(&[5, 3], 0), 5);
    }

    #[test]
    fn lagrange_recovers_constant() {
        let xs = [1, 2, 3];
        let ys = [42, 42, 42];
        assert_eq!(lagrange_interpolate_at_zero(&xs, &ys).unwrap(), 42);
    }

    #[test]
    fn lagrange_recovers_quadratic() {
        let coefficients = [0x9A, 0x11, 0xE4];
        let xs = [3u8, 17, 200];
        let ys: Vec<u8> = xs.iter().map(|&x| eval_polynomial(&coefficients, x)).collect();
        assert_eq!(lagrange_interpolate_at_zero(&xs, &ys).unwrap(), 0x9A);
    }

    #[test]
    fn lagrange_duplicate_x_is_division_by_zero() {
        assert_eq!(
            lagrange_interpolate_at_zero(&[4, 4], &[1, 2]),
            Err(FieldError::DivisionByZero)
        );
    }
}
