//! Property tests for the histogram merge laws.
//!
//! Merging is the whole point of the engine: months of per-segment
//! histograms get folded into one cumulative histogram, so merge order and
//! chunking must never change the result.

use excavator::Hist;
use ndarray::Array1;
use proptest::prelude::*;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

fn hist(x: &[f64], l2_nbin: u32) -> Hist {
    Hist::from_samples(Array1::from(x.to_vec()).view(), l2_nbin, None)
        .expect("finite well-scaled samples")
}

fn hist_hinted(x: &[f64], l2_nbin: u32, hint: &Hist) -> Hist {
    Hist::from_samples(Array1::from(x.to_vec()).view(), l2_nbin, Some(hint))
        .expect("finite well-scaled samples")
}

// Samples on a half-integer grid: duplicates and constant chunks come up
// often, and the overall range can never be small enough to push bin
// indices anywhere near the 2^53 guard.
fn samples() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec((-2000i32..2000).prop_map(|v| v as f64 * 0.5), 0..64)
}

// A month-of-segments style fold: many chunks merged one at a time with the
// cumulative histogram as span hint, compared against histogramming all the
// samples at once.
#[test]
fn long_hinted_fold_matches_single_pass() {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
    let chunks: Vec<Vec<f64>> = (0..40)
        .map(|_| (0..250).map(|_| rng.gen_range(-500.0..500.0)).collect())
        .collect();

    let mut cumulative = Hist::empty(8);
    for chunk in &chunks {
        let seg = hist_hinted(chunk, 8, &cumulative);
        cumulative = cumulative.merge(seg).unwrap();
    }

    let all: Vec<f64> = chunks.into_iter().flatten().collect();
    let whole = hist(&all, 8);
    assert_eq!(cumulative.total_count(), 10_000);
    assert_eq!(cumulative, whole);
}

proptest! {
    #[test]
    fn merge_is_commutative(a in samples(), b in samples(), l2_nbin in 2u32..7) {
        let ab = hist(&a, l2_nbin).merge(hist(&b, l2_nbin)).unwrap();
        let ba = hist(&b, l2_nbin).merge(hist(&a, l2_nbin)).unwrap();
        prop_assert_eq!(ab.total_count(), (a.len() + b.len()) as u64);
        prop_assert!(ab == ba);
    }

    #[test]
    fn merge_is_associative(
        a in samples(),
        b in samples(),
        c in samples(),
        l2_nbin in 2u32..7,
    ) {
        let left = hist(&a, l2_nbin)
            .merge(hist(&b, l2_nbin))
            .unwrap()
            .merge(hist(&c, l2_nbin))
            .unwrap();
        let right = hist(&a, l2_nbin)
            .merge(hist(&b, l2_nbin).merge(hist(&c, l2_nbin)).unwrap())
            .unwrap();
        prop_assert!(left == right);
    }

    #[test]
    fn chunked_merge_matches_single_pass(
        a in samples(),
        b in samples(),
        l2_nbin in 2u32..7,
    ) {
        let mut whole_samples = a.clone();
        whole_samples.extend_from_slice(&b);
        let whole = hist(&whole_samples, l2_nbin);

        let merged = hist(&a, l2_nbin).merge(hist(&b, l2_nbin)).unwrap();
        prop_assert_eq!(merged.total_count(), whole.total_count());
        prop_assert!(merged == whole);
    }

    #[test]
    fn span_hints_do_not_change_the_result(
        a in samples(),
        b in samples(),
        c in samples(),
        l2_nbin in 2u32..7,
    ) {
        let first = hist(&a, l2_nbin);
        let second = hist_hinted(&b, l2_nbin, &first);
        let hinted = first.merge(second).unwrap();
        let third = hist_hinted(&c, l2_nbin, &hinted);
        let hinted = hinted.merge(third).unwrap();

        let plain = hist(&a, l2_nbin)
            .merge(hist(&b, l2_nbin))
            .unwrap()
            .merge(hist(&c, l2_nbin))
            .unwrap();
        prop_assert!(hinted == plain);
    }

    #[test]
    fn empty_merge_is_identity(a in samples(), l2_nbin in 2u32..7) {
        let h = hist(&a, l2_nbin);
        let merged = h.clone().merge(Hist::empty(l2_nbin)).unwrap();
        prop_assert!(merged == h);
        let merged = Hist::empty(l2_nbin).merge(h.clone()).unwrap();
        prop_assert!(merged == h);
    }

    #[test]
    fn cdf_is_monotone_and_ends_at_one(a in samples(), l2_nbin in 2u32..7) {
        let h = hist(&a, l2_nbin);
        if let Some(cdf) = h.cdf() {
            for w in cdf.as_slice().unwrap().windows(2) {
                prop_assert!(w[0] <= w[1]);
            }
            prop_assert!((cdf[cdf.len() - 1] - 1.0).abs() < 1e-12);
        }
    }
}
