//! Property-based test generators using proptest.

use proptest::prelude::*;
use tessera::Datatype;

/// Strategy for datatypes that have a concrete element type.
pub fn datatype_strategy() -> impl Strategy<Value = Datatype> {
    prop::sample::select(
        Datatype::ALL
            .iter()
            .copied()
            .filter(|dt| *dt != Datatype::Any)
            .collect::<Vec<_>>(),
    )
}

/// Strategy for an ordered `(start, end)` pair inside `[lo, hi]`.
pub fn ordered_pair_strategy(lo: i64, hi: i64) -> impl Strategy<Value = (i64, i64)> {
    (lo..=hi, lo..=hi).prop_map(|(a, b)| (a.min(b), a.max(b)))
}

/// Strategy for short ASCII strings, empty ones included.
pub fn label_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{0,8}").expect("Invalid regex")
}

/// Strategy for sparse cells: distinct coordinates in `[0, 999]` with a
/// label (or null) and a score each.
pub fn sparse_cells_strategy(
    max: usize,
) -> impl Strategy<Value = Vec<(i64, Option<String>, f64)>> {
    let cell = (prop::option::of(label_strategy()), -1e6f64..1e6);
    prop::collection::btree_map(0i64..1000, cell, 1..=max).prop_map(|cells| {
        cells
            .into_iter()
            .map(|(x, (label, score))| (x, label, score))
            .collect()
    })
}
