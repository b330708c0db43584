/// Edge and path costs.
///
/// `max_value()` doubles as "infinity": undiscovered g-values start there and
/// dead-end heuristics are raised to it. Additions saturate so an infinite
/// operand stays infinite.
pub trait Cost:
    Copy
    + std::fmt::Debug
    + std::fmt::Display
    + PartialEq
    + core::cmp::Eq
    + PartialOrd
    + Ord
    + num_traits::SaturatingAdd
    + num_traits::bounds::UpperBounded
    + num_traits::Zero
    + num_traits::One
    + num_traits::ToPrimitive
    + std::ops::Add<Self, Output = Self>
    + std::ops::AddAssign
{
    #[inline(always)]
    #[must_use]
    fn infinity() -> Self {
        num_traits::bounds::UpperBounded::max_value()
    }

    /// Whether this is a finite cost.
    #[inline(always)]
    fn valid(&self) -> bool {
        *self != num_traits::bounds::UpperBounded::max_value()
    }

    /// Lossy conversion used for weighted priorities.
    ///
    /// Infinite costs map to `f64::INFINITY`.
    #[inline(always)]
    fn as_f64(&self) -> f64 {
        if !self.valid() {
            return f64::INFINITY;
        }
        self.to_f64().unwrap_or(f64::INFINITY)
    }
}

impl Cost for u32 {}
impl Cost for u64 {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturating_infinity() {
        let inf = <u32 as Cost>::infinity();
        assert!(!inf.valid());
        assert_eq!(num_traits::SaturatingAdd::saturating_add(&inf, &1u32), inf);
        assert!(3u32.valid());
    }

    #[test]
    fn as_f64() {
        assert_eq!(7u32.as_f64(), 7.0);
        assert_eq!(<u32 as Cost>::infinity().as_f64(), f64::INFINITY);
    }
}
