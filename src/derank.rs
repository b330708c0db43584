// Arg-min over a handful of siblings.
//
// Sifting down a d-ary heap needs the best child out of up to `d` of them.
// Running it as a tournament instead of a left-to-right fold keeps the
// comparisons independent of each other, which helps when `d` is a
// cache-line's worth of nodes.
//
// 0   1 2   3
// *   * *   *
//  \ /   \ /
//   *     *
//    \   /
//      *
//
// The comparison is supplied by the caller as heap elements are only handles
// and the actual ranking data lives elsewhere.

/// Core comparison and index selection
///
/// Ties go to the left, so the result matches a linear scan.
#[inline(always)]
#[must_use]
fn fight<T, F>(a: &[T], l: usize, r: usize, le: &F) -> usize
where
    F: Fn(&T, &T) -> bool,
{
    if le(&a[l], &a[r]) { l } else { r }
}

#[inline(always)]
#[must_use]
fn tournament<T, F>(a: &[T], from: usize, to: usize, le: &F) -> usize
where
    F: Fn(&T, &T) -> bool,
{
    debug_assert!(from < to);
    match to - from {
        1 => from,
        2 => fight(a, from, from + 1, le),
        n => {
            let mid = from + n.div_ceil(2);
            fight(
                a, //
                tournament(a, from, mid, le),
                tournament(a, mid, to, le),
                le,
            )
        }
    }
}

/// Index of the smallest element in `a`, given a `<=` predicate.
#[inline(always)]
#[must_use]
pub fn derank_by<T, F>(a: &[T], le: F) -> usize
where
    F: Fn(&T, &T) -> bool,
{
    debug_assert!(!a.is_empty(), "There's no best of nothing");
    tournament(a, 0, a.len(), &le)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_min_index_by<T, F>(xs: &[T], le: F) -> usize
    where
        F: Fn(&T, &T) -> bool,
    {
        let mut min_i = 0;
        for (i, x) in xs.iter().enumerate() {
            if !le(&xs[min_i], x) {
                min_i = i;
            }
        }
        min_i
    }

    fn le(l: &u8, r: &u8) -> bool {
        l <= r
    }

    #[test]
    fn verify_small() {
        let a = vec![1u8, 0u8, 4u8, 3u8, 2u8];
        for n in 1..=a.len() {
            assert_eq!(derank_by(&a[..n], le), linear_min_index_by(&a[..n], le));
        }
    }

    #[test]
    fn verify_08() {
        let a = vec![1u8, 5u8, 0u8, 4u8, 6u8, 3u8, 7u8, 2u8];
        assert_eq!(derank_by(&a, le), 2);
        assert_eq!(derank_by(&a, le), linear_min_index_by(&a, le));
    }

    #[test]
    fn verify_16() {
        let a = vec![
            1u8, 5u8, 3u8, 5u8, 9u8, 4u8, 4u8, 6u8, 3u8, 7u8, 2u8, 1u8, 0u8, 3u8, 7u8, 2u8,
        ];
        assert_eq!(derank_by(&a, le), 12);
        assert_eq!(derank_by(&a, le), linear_min_index_by(&a, le));
    }

    #[test]
    fn ties_go_left() {
        let a = vec![3u8, 1u8, 2u8, 1u8, 1u8];
        assert_eq!(derank_by(&a, le), 1);
        assert_eq!(linear_min_index_by(&a, le), 1);
    }

    #[test]
    fn custom_order() {
        // Largest first
        let a = vec![3u8, 9u8, 2u8];
        assert_eq!(derank_by(&a, |l, r| l >= r), 1);
    }
}
