/*
   Copyright 2018 Ilya Epifanov

   Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
   http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
   http://opensource.org/licenses/MIT>, at your option. This file may not be
   copied, modified, or distributed except according to those terms.
*/
//! Exact fractions and their `a + b/c` register decomposition.

use core::cmp::Ordering;
use core::fmt;

/// Decimal digits kept from the fractional part of an `f64` before reduction.
const PRECISION_DIGITS: u32 = 9;
const PRECISION_SCALE: u64 = 1_000_000_000;

/// Greatest common divisor, Euclid.
pub fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// A non-negative fraction, always kept in lowest terms so that derived
/// equality compares values.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Fraction {
    num: u64,
    den: u64,
}

impl Fraction {
    pub fn new(num: u64, den: u64) -> Self {
        debug_assert!(den != 0);
        let g = gcd(num, den).max(1);
        Fraction {
            num: num / g,
            den: den / g,
        }
    }

    pub const fn from_integer(value: u64) -> Self {
        Fraction { num: value, den: 1 }
    }

    pub fn numer(&self) -> u64 {
        self.num
    }

    pub fn denom(&self) -> u64 {
        self.den
    }

    pub fn is_integer(&self) -> bool {
        self.den == 1
    }

    pub fn floor(&self) -> u64 {
        self.num / self.den
    }

    pub fn ceil(&self) -> u64 {
        (self.num + self.den - 1) / self.den
    }

    /// `self * k`
    pub fn scale(&self, k: u64) -> Self {
        Fraction::new(self.num * k, self.den)
    }

    pub fn to_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// `lo <= self <= hi`
    pub fn within(&self, lo: u64, hi: u64) -> bool {
        self.num >= lo * self.den && self.num <= hi * self.den
    }
}

impl Ord for Fraction {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.num as u128 * other.den as u128;
        let rhs = other.num as u128 * self.den as u128;
        lhs.cmp(&rhs)
    }
}

impl PartialOrd for Fraction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<u64> for Fraction {
    fn from(value: u64) -> Self {
        Fraction::from_integer(value)
    }
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let int = self.floor();
        let rem = self.num % self.den;
        if rem == 0 {
            write!(f, "{}", int)
        } else {
            write!(f, "{}+{}/{}", int, rem, self.den)
        }
    }
}

/// Register-ready `a + b/c` with `0 <= b < c <= max_denominator`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RationalTriple {
    pub a: u32,
    pub b: u32,
    pub c: u32,
}

impl RationalTriple {
    /// Decomposes an exact fraction. When the reduced denominator does not
    /// fit, numerator and denominator are scaled down together so that
    /// `c == max_denominator`, losing at most `1/max_denominator`.
    pub fn from_fraction(value: Fraction, max_denominator: u32) -> Self {
        let rem = value.num % value.den;
        split(value.floor() as u32, rem, value.den, max_denominator)
    }

    pub fn to_f64(&self) -> f64 {
        self.a as f64 + self.b as f64 / self.c as f64
    }
}

/// Splits a non-negative real into `a + b/c` with `c <= max_denominator`.
///
/// Only the first nine decimal places of the fractional part are
/// considered. Values must be finite and below 2^32.
pub fn approximate(value: f64, max_denominator: u32) -> RationalTriple {
    let a = value as u64;
    let rest = value - a as f64;
    if rest <= 0.0 {
        return RationalTriple {
            a: a as u32,
            b: 0,
            c: 1,
        };
    }

    debug_assert_eq!(PRECISION_SCALE, 10u64.pow(PRECISION_DIGITS));
    let b = (rest * PRECISION_SCALE as f64) as u64;
    split(a as u32, b.min(PRECISION_SCALE - 1), PRECISION_SCALE, max_denominator)
}

fn split(a: u32, b: u64, c: u64, max_denominator: u32) -> RationalTriple {
    if b == 0 {
        return RationalTriple { a, b: 0, c: 1 };
    }

    let g = gcd(b, c);
    let (b, c) = (b / g, c / g);
    let max = max_denominator.max(1) as u64;

    if c <= max {
        return RationalTriple {
            a,
            b: b as u32,
            c: c as u32,
        };
    }

    // b < c, so b * max / c < max
    let b = (b as u128 * max as u128 / c as u128) as u32;
    RationalTriple {
        a,
        b,
        c: max as u32,
    }
}
