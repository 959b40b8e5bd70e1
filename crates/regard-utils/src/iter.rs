//! Iterator adapters.

use std::iter::Zip;

/// Zips two iterators of known, equal length.
///
/// # Panics
///
/// Panics if the iterators report different lengths.
pub fn zip_exact<L, R>(left: L, right: R) -> Zip<L::IntoIter, R::IntoIter>
where
    L: IntoIterator,
    L::IntoIter: ExactSizeIterator,
    R: IntoIterator,
    R::IntoIter: ExactSizeIterator,
{
    let left = left.into_iter();
    let right = right.into_iter();
    assert_eq!(left.len(), right.len(), "zip_exact: iterator lengths differ");
    left.zip(right)
}
