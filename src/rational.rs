//! Exact rational arithmetic for beat positions and durations.
//!
//! Positions in a Symi song stay exact `p/q` rationals (normalized, `q>0`)
//! from the parser all the way to the time resolver; only the final
//! beats-to-seconds conversion touches floating point. Float beat math
//! drifts audibly over long pieces with odd time signatures.

use num_rational::Ratio;

pub type Rational = Ratio<i64>;

pub fn rational(num: i64, den: i64) -> Rational {
    Ratio::new(num, den)
}

/// `(numerator, denominator)` of a rational already in lowest terms.
pub fn as_pair(r: Rational) -> (i64, i64) {
    (*r.numer(), *r.denom())
}
