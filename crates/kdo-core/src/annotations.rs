//! Labels and annotations kdo reads and writes

/// Standard managed-by label
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// Value of the managed-by label on everything kdo writes for itself
pub const MANAGED_BY: &str = "kdo";

/// Marks a Secret as the persisted value of a jewel
pub const JEWEL: &str = "kdo.io/jewel";
/// `"true"` on a workload makes apply wait for its rollout
pub const ROLLOUT_STATUS: &str = "kdo.io/rollout-status";
/// `"merge"` on an overlay document merges it into an earlier document
pub const OVERLAY: &str = "kdo.io/overlay";
/// Genus of the chart a release record describes
pub const GENUS: &str = "kdo.io/genus";

/// Whether an annotation value means "yes"
pub fn is_truthy(value: Option<&str>) -> bool {
    matches!(
        value.map(str::trim).map(str::to_ascii_lowercase).as_deref(),
        Some("true" | "yes" | "1")
    )
}
