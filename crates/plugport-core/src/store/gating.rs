//! Flag gating of extensions.

use crate::extension::ExtensionFlags;
use crate::flags::FeatureFlagVector;

/// Whether an extension with `flags` is active under `vector`.
///
/// Every required flag must be known and `true`, every disallowed flag known
/// and `false`. An unknown flag fails either check.
pub fn is_active(flags: &ExtensionFlags, vector: &FeatureFlagVector) -> bool {
    flags.required.iter().all(|name| vector.is_enabled(name))
        && flags.disallowed.iter().all(|name| vector.is_disabled(name))
}
