//! Seeded stratified hold-out splits

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Row indices of a two-way split, each sorted ascending
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Split `rows` so that every class keeps its share in both parts.
///
/// A class with `n >= 2` rows sends `round(n * test_fraction)` of them to
/// the test part, clamped to `1..=n-1`; a singleton class stays in train.
pub fn stratified_split(rows: &[usize], y: &[usize], test_fraction: f64, seed: u64) -> Split {
    let n_classes = rows.iter().map(|&r| y[r] + 1).max().unwrap_or(0);
    let mut by_class: Vec<Vec<usize>> = vec![Vec::new(); n_classes];
    for &row in rows {
        by_class[y[row]].push(row);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut split = Split {
        train: Vec::with_capacity(rows.len()),
        test: Vec::new(),
    };

    for mut members in by_class {
        let n = members.len();
        let n_test = if n >= 2 {
            ((n as f64 * test_fraction).round() as usize).clamp(1, n - 1)
        } else {
            0
        };

        members.shuffle(&mut rng);
        split.test.extend_from_slice(&members[..n_test]);
        split.train.extend_from_slice(&members[n_test..]);
    }

    split.train.sort_unstable();
    split.test.sort_unstable();
    split
}
