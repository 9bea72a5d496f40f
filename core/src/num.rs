use std::fmt;
use std::ops::Neg;

use lazy_static::lazy_static;
use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{Signed, ToPrimitive, Zero};

use crate::error::{VmError, VmResult};

lazy_static! {
    static ref INT257_MAX: BigInt = (BigInt::from(1) << 256) - 1;
    static ref INT257_MIN: BigInt = -(BigInt::from(1) << 256u32);
}

/// Rounding mode for division and right shifts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Round {
    Floor,
    Ceil,
    Nearest,
}

/// A signed integer fitting 257 bits, with a NaN sentinel produced by
/// overflowing operations. Pushing a NaN through a non-quiet opcode raises
/// an integer-overflow exception; quiet opcodes let it flow.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Int257(Option<BigInt>);

impl Int257 {
    pub fn nan() -> Self {
        Int257(None)
    }

    pub fn zero() -> Self {
        Int257(Some(BigInt::zero()))
    }

    pub fn minus_one() -> Self {
        Int257(Some(BigInt::from(-1)))
    }

    /// Clamps an arbitrary big integer into the 257-bit domain, NaN on
    /// overflow.
    pub fn from_bigint(value: BigInt) -> Self {
        if value > *INT257_MAX || value < *INT257_MIN {
            Int257(None)
        } else {
            Int257(Some(value))
        }
    }

    pub fn from_bool(value: bool) -> Self {
        if value {
            Int257::minus_one()
        } else {
            Int257::zero()
        }
    }

    pub fn is_nan(&self) -> bool {
        self.0.is_none()
    }

    pub fn is_zero(&self) -> bool {
        matches!(&self.0, Some(v) if v.is_zero())
    }

    pub fn as_bigint(&self) -> Option<&BigInt> {
        self.0.as_ref()
    }

    /// The underlying integer, or an integer-overflow error for NaN.
    pub fn finite(&self) -> VmResult<&BigInt> {
        self.0
            .as_ref()
            .ok_or_else(|| VmError::int_ov("expected a finite integer, got NaN"))
    }

    pub fn into_finite(self) -> VmResult<BigInt> {
        self.0
            .ok_or_else(|| VmError::int_ov("expected a finite integer, got NaN"))
    }

    pub fn to_i64(&self) -> Option<i64> {
        self.0.as_ref().and_then(|v| v.to_i64())
    }

    pub fn to_u64(&self) -> Option<u64> {
        self.0.as_ref().and_then(|v| v.to_u64())
    }

    pub fn to_usize(&self) -> Option<usize> {
        self.0.as_ref().and_then(|v| v.to_usize())
    }

    pub fn is_true(&self) -> bool {
        !self.is_zero() && !self.is_nan()
    }

    fn binop(&self, other: &Int257, f: impl FnOnce(&BigInt, &BigInt) -> BigInt) -> Int257 {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => Int257::from_bigint(f(a, b)),
            _ => Int257::nan(),
        }
    }

    pub fn add(&self, other: &Int257) -> Int257 {
        self.binop(other, |a, b| a + b)
    }

    pub fn sub(&self, other: &Int257) -> Int257 {
        self.binop(other, |a, b| a - b)
    }

    pub fn mul(&self, other: &Int257) -> Int257 {
        self.binop(other, |a, b| a * b)
    }

    pub fn negate(&self) -> Int257 {
        match &self.0 {
            Some(v) => Int257::from_bigint(v.clone().neg()),
            None => Int257::nan(),
        }
    }

    pub fn abs(&self) -> Int257 {
        match &self.0 {
            Some(v) => Int257::from_bigint(v.abs()),
            None => Int257::nan(),
        }
    }

    pub fn bit_and(&self, other: &Int257) -> Int257 {
        self.binop(other, |a, b| a & b)
    }

    pub fn bit_or(&self, other: &Int257) -> Int257 {
        self.binop(other, |a, b| a | b)
    }

    pub fn bit_xor(&self, other: &Int257) -> Int257 {
        self.binop(other, |a, b| a ^ b)
    }

    pub fn bit_not(&self) -> Int257 {
        match &self.0 {
            Some(v) => Int257::from_bigint(!v),
            None => Int257::nan(),
        }
    }

    /// Left shift by `n` (0..=1023); NaN on 257-bit overflow.
    pub fn lshift(&self, n: usize) -> Int257 {
        match &self.0 {
            Some(v) => Int257::from_bigint(v << n),
            None => Int257::nan(),
        }
    }

    pub fn rshift(&self, n: usize, round: Round) -> Int257 {
        match &self.0 {
            Some(v) => {
                let divisor = BigInt::from(1) << n;
                match div_round(v, &divisor, round) {
                    Some((q, _)) => Int257::from_bigint(q),
                    None => Int257::nan(),
                }
            }
            None => Int257::nan(),
        }
    }

    /// Rounded division; both results are NaN for a zero divisor or NaN
    /// operands.
    pub fn div_rem(&self, other: &Int257, round: Round) -> (Int257, Int257) {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => match div_round(a, b, round) {
                Some((q, r)) => (Int257::from_bigint(q), Int257::from_bigint(r)),
                None => (Int257::nan(), Int257::nan()),
            },
            _ => (Int257::nan(), Int257::nan()),
        }
    }

    /// `(self * mul) / div` with the product computed exactly.
    pub fn mul_div_rem(&self, mul: &Int257, div: &Int257, round: Round) -> (Int257, Int257) {
        match (&self.0, &mul.0, &div.0) {
            (Some(a), Some(b), Some(d)) => match div_round(&(a * b), d, round) {
                Some((q, r)) => (Int257::from_bigint(q), Int257::from_bigint(r)),
                None => (Int257::nan(), Int257::nan()),
            },
            _ => (Int257::nan(), Int257::nan()),
        }
    }

    /// `(self << shift) / div`.
    pub fn lshift_div_rem(&self, shift: usize, div: &Int257, round: Round) -> (Int257, Int257) {
        match (&self.0, &div.0) {
            (Some(a), Some(d)) => match div_round(&(a << shift), d, round) {
                Some((q, r)) => (Int257::from_bigint(q), Int257::from_bigint(r)),
                None => (Int257::nan(), Int257::nan()),
            },
            _ => (Int257::nan(), Int257::nan()),
        }
    }

    /// `(self * mul) >> shift`.
    pub fn mul_rshift_rem(&self, mul: &Int257, shift: usize, round: Round) -> (Int257, Int257) {
        match (&self.0, &mul.0) {
            (Some(a), Some(b)) => {
                let divisor = BigInt::from(1) << shift;
                match div_round(&(a * b), &divisor, round) {
                    Some((q, r)) => (Int257::from_bigint(q), Int257::from_bigint(r)),
                    None => (Int257::nan(), Int257::nan()),
                }
            }
            _ => (Int257::nan(), Int257::nan()),
        }
    }

    /// True iff the value fits `bits` signed bits (two's complement).
    pub fn signed_fits(&self, bits: u64) -> bool {
        match &self.0 {
            Some(v) => {
                if bits == 0 {
                    return v.is_zero();
                }
                let half = BigInt::from(1) << (bits - 1);
                *v < half && *v >= -&half
            }
            None => false,
        }
    }

    pub fn unsigned_fits(&self, bits: u64) -> bool {
        match &self.0 {
            Some(v) => !v.is_negative() && *v < (BigInt::from(1) << bits),
            None => false,
        }
    }

    /// Minimal number of bits needed to represent the value (signed or
    /// unsigned); `None` for NaN or a negative value in unsigned mode.
    pub fn bit_size(&self, signed: bool) -> Option<u64> {
        let v = self.0.as_ref()?;
        if signed {
            let mut bits = 0;
            while !self.signed_fits(bits) {
                bits += 1;
            }
            Some(bits)
        } else {
            if v.is_negative() {
                return None;
            }
            Some(v.bits())
        }
    }

    pub fn sign(&self) -> Option<i32> {
        self.0.as_ref().map(|v| match v.sign() {
            Sign::Minus => -1,
            Sign::NoSign => 0,
            Sign::Plus => 1,
        })
    }

    pub fn cmp_finite(&self, other: &Int257) -> Option<std::cmp::Ordering> {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Unsigned big-endian bytes of the value; `None` for NaN, negatives or
    /// values wider than `bytes`.
    pub fn to_unsigned_bytes(&self, bytes: usize) -> Option<Vec<u8>> {
        let v = self.0.as_ref()?;
        let unsigned: BigUint = v.to_biguint()?;
        let raw = unsigned.to_bytes_be();
        if raw.len() > bytes {
            return None;
        }
        let mut out = vec![0u8; bytes - raw.len()];
        out.extend_from_slice(&raw);
        Some(out)
    }

    pub fn from_unsigned_bytes(bytes: &[u8]) -> Int257 {
        Int257::from_bigint(BigInt::from_biguint(
            Sign::Plus,
            BigUint::from_bytes_be(bytes),
        ))
    }
}

impl From<i64> for Int257 {
    fn from(value: i64) -> Self {
        Int257(Some(BigInt::from(value)))
    }
}

impl From<u64> for Int257 {
    fn from(value: u64) -> Self {
        Int257(Some(BigInt::from(value)))
    }
}

impl From<i32> for Int257 {
    fn from(value: i32) -> Self {
        Int257(Some(BigInt::from(value)))
    }
}

impl From<BigInt> for Int257 {
    fn from(value: BigInt) -> Self {
        Int257::from_bigint(value)
    }
}

impl fmt::Display for Int257 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(v) => write!(f, "{v}"),
            None => write!(f, "NaN"),
        }
    }
}

/// Truncated division, quotient toward zero; remainder takes the dividend's
/// sign.
fn div_rem_trunc(a: &BigInt, b: &BigInt) -> (BigInt, BigInt) {
    (a / b, a % b)
}

/// Rounded division; `None` for a zero divisor. The remainder always
/// satisfies `a == q*b + r`.
fn div_round(a: &BigInt, b: &BigInt, round: Round) -> Option<(BigInt, BigInt)> {
    if b.is_zero() {
        return None;
    }
    match round {
        Round::Floor => {
            let (mut q, mut r) = div_rem_trunc(a, b);
            if !r.is_zero() && r.sign() != b.sign() {
                q -= 1;
                r += b;
            }
            Some((q, r))
        }
        Round::Ceil => {
            let (mut q, mut r) = div_rem_trunc(a, b);
            if !r.is_zero() && r.sign() == b.sign() {
                q += 1;
                r -= b;
            }
            Some((q, r))
        }
        Round::Nearest => {
            // Round to nearest, ties toward +infinity:
            // q = floor((2a + b) / 2b).
            let (q, _) = div_round(&(a * 2 + b), &(b * 2), Round::Floor)?;
            let r = a - &q * b;
            Some((q, r))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(v: i64) -> Int257 {
        Int257::from(v)
    }

    #[test]
    fn overflow_becomes_nan() {
        let max = Int257::from_bigint((BigInt::from(1) << 256) - 1);
        assert!(!max.is_nan());
        assert!(max.add(&int(1)).is_nan());
        let min = Int257::from_bigint(-(BigInt::from(1) << 256u32));
        assert!(!min.is_nan());
        assert!(min.sub(&int(1)).is_nan());
        assert!(min.negate().is_nan());
    }

    #[test]
    fn division_roundings() {
        // 7 / 2
        assert_eq!(int(7).div_rem(&int(2), Round::Floor).0, int(3));
        assert_eq!(int(7).div_rem(&int(2), Round::Ceil).0, int(4));
        assert_eq!(int(7).div_rem(&int(2), Round::Nearest).0, int(4));
        // -7 / 2
        assert_eq!(int(-7).div_rem(&int(2), Round::Floor).0, int(-4));
        assert_eq!(int(-7).div_rem(&int(2), Round::Ceil).0, int(-3));
        assert_eq!(int(-7).div_rem(&int(2), Round::Nearest).0, int(-3));
        // Ties round toward +infinity.
        assert_eq!(int(1).div_rem(&int(2), Round::Nearest).0, int(1));
        assert_eq!(int(-1).div_rem(&int(2), Round::Nearest).0, int(0));
        // Remainder identity holds.
        for a in [-9i64, -2, 0, 5, 13] {
            for b in [-4i64, -1, 3, 7] {
                for round in [Round::Floor, Round::Ceil, Round::Nearest] {
                    let (q, r) = int(a).div_rem(&int(b), round);
                    let back = q.mul(&int(b)).add(&r);
                    assert_eq!(back, int(a), "{a}/{b} {round:?}");
                }
            }
        }
    }

    #[test]
    fn zero_divisor_is_nan() {
        let (q, r) = int(5).div_rem(&int(0), Round::Floor);
        assert!(q.is_nan() && r.is_nan());
        let (q, _) = int(0).div_rem(&int(0), Round::Nearest);
        assert!(q.is_nan());
    }

    #[test]
    fn muldiv_is_exact_in_the_middle() {
        // (2^200 * 2^100) / 2^250 does not overflow the intermediate.
        let a = Int257::from_bigint(BigInt::from(1) << 200);
        let b = Int257::from_bigint(BigInt::from(1) << 100);
        let d = Int257::from_bigint(BigInt::from(1) << 250);
        let (q, r) = a.mul_div_rem(&b, &d, Round::Floor);
        assert_eq!(q, Int257::from_bigint(BigInt::from(1) << 50));
        assert!(r.is_zero());
    }

    #[test]
    fn fits_bounds() {
        assert!(int(127).signed_fits(8));
        assert!(!int(128).signed_fits(8));
        assert!(int(-128).signed_fits(8));
        assert!(!int(-129).signed_fits(8));
        assert!(int(255).unsigned_fits(8));
        assert!(!int(256).unsigned_fits(8));
        assert!(!int(-1).unsigned_fits(8));
        assert!(Int257::nan().signed_fits(300) == false);
    }

    #[test]
    fn bit_sizes() {
        assert_eq!(int(0).bit_size(true), Some(0));
        assert_eq!(int(0).bit_size(false), Some(0));
        assert_eq!(int(1).bit_size(true), Some(2));
        assert_eq!(int(1).bit_size(false), Some(1));
        assert_eq!(int(-1).bit_size(true), Some(1));
        assert_eq!(int(-1).bit_size(false), None);
    }
}
