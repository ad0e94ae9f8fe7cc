//! Shuffled train/validation/test partition.

use super::Dataset;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::info;

/// Share of examples used for validation (when enabled).
pub const VAL_FRACTION: f64 = 0.2;

/// Share of examples used for testing.
pub const TEST_FRACTION: f64 = 0.3;

/// Disjoint partition of a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    /// Training rows.
    pub train: Dataset,
    /// Validation rows (empty when validation is disabled).
    pub val: Dataset,
    /// Test rows.
    pub test: Dataset,
}

/// Number of rows that go to `(val, test, train)` for `n` examples.
///
/// # Examples
///
/// ```rust
/// use fairshare::dataset::split::split_sizes;
///
/// assert_eq!(split_sizes(10, true), (2, 3, 5));
/// assert_eq!(split_sizes(10, false), (0, 3, 7));
/// ```
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn split_sizes(n: usize, use_val: bool) -> (usize, usize, usize) {
    let fraction = |f: f64| ((n as f64 * f).round() as usize).min(n);
    let val = if use_val { fraction(VAL_FRACTION) } else { 0 };
    let test = fraction(TEST_FRACTION).min(n - val);
    (val, test, n - val - test)
}

/// Shuffle `dataset` once and cut it into validation, test and training
/// rows, in that order.
pub fn split<R: Rng + ?Sized>(dataset: &Dataset, use_val: bool, rng: &mut R) -> Split {
    let mut order: Vec<usize> = (0..dataset.len()).collect();
    order.shuffle(rng);
    let shuffled = dataset.permuted(&order);

    let (val, test, train) = split_sizes(dataset.len(), use_val);
    let split = Split {
        val: shuffled.slice_rows(0..val),
        test: shuffled.slice_rows(val..val + test),
        train: shuffled.slice_rows(val + test..val + test + train),
    };
    info!(
        "Split {} examples: train {}, val {}, test {}",
        dataset.len(),
        split.train.len(),
        split.val.len(),
        split.test.len()
    );
    split
}
