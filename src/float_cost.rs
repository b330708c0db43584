//! Floating point costs that can live in a heap.

use std::fmt::Debug;

use derive_more::Display;
use num_traits::One;
use num_traits::SaturatingAdd;
use num_traits::ToPrimitive;
use num_traits::Zero;
use num_traits::bounds::UpperBounded;
use ordered_float::FloatCore;
use ordered_float::OrderedFloat;

use crate::cost::Cost;

/// A totally ordered float cost.
///
/// Infinity is the upper bound, so it can be used as the "undiscovered" and
/// "dead end" sentinel like integer costs use `MAX`.
#[derive(Copy, Clone, Default, Debug, Display)]
#[repr(transparent)]
#[display("${_0}")]
pub struct FloatCost<F: FloatCore>(pub OrderedFloat<F>);

// Ordering is forwarded to `OrderedFloat`, deriving would demand `F: Ord`.
impl<F: FloatCore> PartialEq for FloatCost<F> {
    #[inline(always)]
    fn eq(&self, other: &Self) -> bool {
        self.0.eq(&other.0)
    }
}
impl<F: FloatCore> Eq for FloatCost<F> {}
impl<F: FloatCore> PartialOrd for FloatCost<F> {
    #[inline(always)]
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<F: FloatCore> Ord for FloatCost<F> {
    #[inline(always)]
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl<F> Cost for FloatCost<F> where F: FloatCore + std::fmt::Display + Debug {}

impl<F: FloatCore> FloatCost<F> {
    pub fn new(f: F) -> Self {
        Self(OrderedFloat(f))
    }

    #[inline(always)]
    pub fn get(&self) -> F {
        self.0.0
    }
}

macro_rules! forward_binop {
    ($trait:ident, $method:ident, $op:tt) => {
        impl<F: FloatCore> std::ops::$trait for FloatCost<F> {
            type Output = Self;
            #[inline(always)]
            fn $method(self, rhs: Self) -> Self::Output {
                Self::new(self.get() $op rhs.get())
            }
        }
    };
}
forward_binop!(Add, add, +);
forward_binop!(Sub, sub, -);
forward_binop!(Mul, mul, *);

impl<F: FloatCore> std::ops::AddAssign for FloatCost<F> {
    #[inline(always)]
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// Float addition already saturates at infinity.
impl<F: FloatCore> SaturatingAdd for FloatCost<F> {
    #[inline(always)]
    fn saturating_add(&self, rhs: &Self) -> Self {
        *self + *rhs
    }
}

impl<F: FloatCore> Zero for FloatCost<F> {
    #[inline(always)]
    fn zero() -> Self {
        Self::new(F::zero())
    }
    #[inline(always)]
    fn is_zero(&self) -> bool {
        self.get() == F::zero()
    }
}

impl<F: FloatCore> One for FloatCost<F> {
    #[inline(always)]
    fn one() -> Self {
        Self::new(F::one())
    }
}

impl<F: FloatCore> UpperBounded for FloatCost<F> {
    #[inline(always)]
    fn max_value() -> Self {
        Self::new(F::infinity())
    }
}

impl<F: FloatCore> ToPrimitive for FloatCost<F> {
    fn to_i64(&self) -> Option<i64> {
        self.get().to_i64()
    }
    fn to_u64(&self) -> Option<u64> {
        self.get().to_u64()
    }
    fn to_f64(&self) -> Option<f64> {
        self.get().to_f64()
    }
}
