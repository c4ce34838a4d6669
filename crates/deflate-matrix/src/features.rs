//! CPU feature disable matrix.
//!
//! The library under test picks implementations at runtime from the
//! detected CPU features, and honours `LIBDEFLATE_DISABLE_CPU_FEATURES` to
//! pretend features are missing. Re-running the suite while disabling
//! features newest-first, cumulatively, reaches every dispatch target
//! without trying every subset.

use std::fmt;

/// Environment variable read by the library under test.
pub const DISABLE_CPU_FEATURES_VAR: &str = "LIBDEFLATE_DISABLE_CPU_FEATURES";

/// Flag that pins the build to the host's full feature set.
pub const MARCH_NATIVE: &str = "-march=native";

/// x86 feature tokens, newest first.
const X86_FEATURES: &[&str] = &[
    "zmm",
    "avx512vnni",
    "vpclmulqdq",
    "avx512vl",
    "avx512bw",
    "avxvnni",
    "avx2",
    "avx",
    "bmi2",
    "pclmulqdq",
    "sse2",
];

/// ARM feature tokens, newest first.
const ARM_FEATURES: &[&str] = &["dotprod", "sha3", "crc32", "pmull", "neon"];

/// CPU architecture families with dispatch-relevant features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchFamily {
    /// i386 and x86_64.
    X86,
    /// 32- and 64-bit ARM.
    Arm,
    /// Anything else; only the baseline run applies.
    Other,
}

impl ArchFamily {
    /// Classifies a machine name such as `x86_64`, `i686` or `aarch64`.
    pub fn from_machine(machine: &str) -> Self {
        match machine {
            "x86" | "x86_64" | "amd64" => ArchFamily::X86,
            m if m.len() == 4 && m.starts_with('i') && m.ends_with("86") => ArchFamily::X86,
            m if m.starts_with("arm") || m.starts_with("aarch") => ArchFamily::Arm,
            _ => ArchFamily::Other,
        }
    }

    /// The family of the host running the matrix.
    pub fn host() -> Self {
        Self::from_machine(std::env::consts::ARCH)
    }

    /// Feature tokens for this family, newest first.
    pub fn feature_tokens(self) -> &'static [&'static str] {
        match self {
            ArchFamily::X86 => X86_FEATURES,
            ArchFamily::Arm => ARM_FEATURES,
            ArchFamily::Other => &[],
        }
    }
}

impl fmt::Display for ArchFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArchFamily::X86 => "x86",
            ArchFamily::Arm => "arm",
            ArchFamily::Other => "other",
        })
    }
}

/// Feature tokens disabled for one test run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureDisableSet {
    tokens: Vec<&'static str>,
}

impl FeatureDisableSet {
    /// The baseline: nothing disabled.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Disabled tokens, in the order they were added.
    pub fn tokens(&self) -> &[&'static str] {
        &self.tokens
    }

    /// Whether nothing is disabled.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Whether every token of `self` is also in `other`.
    pub fn is_subset_of(&self, other: &FeatureDisableSet) -> bool {
        self.tokens.iter().all(|t| other.tokens.contains(t))
    }

    /// Value for [`DISABLE_CPU_FEATURES_VAR`].
    pub fn env_value(&self) -> String {
        self.tokens.join(",")
    }
}

impl fmt::Display for FeatureDisableSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", DISABLE_CPU_FEATURES_VAR, self.env_value())
    }
}

/// Whether `cflags` already pins the build to full native capability.
pub fn pins_native(cflags: &[String]) -> bool {
    cflags.iter().any(|flag| flag == MARCH_NATIVE)
}

/// Generates the disable sets for one build, in execution order.
///
/// The first set is always empty. Each later set adds the next token of
/// the family's table. A build pinned with `-march=native` gets only the
/// baseline, since disabling features cannot reach other code paths there.
pub fn generate(arch: ArchFamily, cflags: &[String]) -> Vec<FeatureDisableSet> {
    let mut sets = vec![FeatureDisableSet::empty()];
    if pins_native(cflags) {
        return sets;
    }
    let mut current = FeatureDisableSet::empty();
    for &token in arch.feature_tokens() {
        current.tokens.push(token);
        sets.push(current.clone());
    }
    sets
}
