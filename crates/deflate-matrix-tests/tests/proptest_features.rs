//! Property-based tests for the CPU feature disable matrix.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p deflate-matrix-tests --test proptest_features
//! ```

use proptest::prelude::*;

use deflate_matrix::features::{generate, MARCH_NATIVE};
use deflate_matrix::{ArchFamily, FeatureDisableSet};

fn arch() -> impl Strategy<Value = ArchFamily> {
    prop_oneof![
        Just(ArchFamily::X86),
        Just(ArchFamily::Arm),
        Just(ArchFamily::Other),
    ]
}

/// Flags that do not pin the build to native capability.
fn ordinary_flag() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("-Werror".to_string()),
        Just("-DLIBDEFLATE_ENABLE_ASSERTIONS".to_string()),
        Just("-m32".to_string()),
        Just("-O2".to_string()),
        Just("-march=x86-64-v2".to_string()),
        "-f[a-z\\-]{1,20}",
    ]
}

// ============================================================================
// Cumulative Disablement
// ============================================================================

proptest! {
    /// Index 0 is empty and every set contains the one before it.
    #[test]
    fn sets_are_cumulative(
        arch in arch(),
        flags in prop::collection::vec(ordinary_flag(), 0..6)
    ) {
        let sets = generate(arch, &flags);
        prop_assert!(sets[0].is_empty());
        prop_assert_eq!(sets.len(), arch.feature_tokens().len() + 1);
        for pair in sets.windows(2) {
            prop_assert!(pair[0].is_subset_of(&pair[1]));
            prop_assert_eq!(pair[0].tokens().len() + 1, pair[1].tokens().len());
        }
    }

    /// The last set disables every token, in table order.
    #[test]
    fn last_set_disables_everything(arch in arch()) {
        let sets = generate(arch, &[]);
        let last = sets.last().unwrap();
        prop_assert_eq!(last.tokens(), arch.feature_tokens());
        prop_assert_eq!(last.env_value(), arch.feature_tokens().join(","));
    }

    /// A native-pinned build gets only the baseline, wherever the flag sits.
    #[test]
    fn march_native_yields_baseline_only(
        arch in arch(),
        mut flags in prop::collection::vec(ordinary_flag(), 0..6),
        position in any::<prop::sample::Index>()
    ) {
        let at = position.index(flags.len() + 1);
        flags.insert(at, MARCH_NATIVE.to_string());
        prop_assert_eq!(generate(arch, &flags), vec![FeatureDisableSet::empty()]);
    }

    /// Arbitrary machine names always classify without panicking.
    #[test]
    fn machine_classification_never_panics(machine in "[a-z0-9_]{0,12}") {
        let family = ArchFamily::from_machine(&machine);
        prop_assert!(generate(family, &[]).len() >= 1);
    }
}
