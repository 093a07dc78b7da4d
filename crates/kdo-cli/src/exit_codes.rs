//! Standard exit codes for CLI operations
//!
//! These exit codes follow Unix conventions and sysexits.h where applicable.

/// Success - operation completed without errors
pub const SUCCESS: i32 = 0;

/// General error - unspecified failure
pub const ERROR: i32 = 1;

/// Resolution error - chart reference could not be fetched or found
pub const RESOLUTION_ERROR: i32 = 2;

/// Template error - rendering failed or produced malformed objects
pub const TEMPLATE_ERROR: i32 = 3;

/// Chart error - invalid Chart.yaml, values or chart layout
pub const CHART_ERROR: i32 = 4;

/// IO error - file not found, permission denied, etc.
pub const IO_ERROR: i32 = 5;

/// Cluster error - connection, apply or API failure
pub const CLUSTER_ERROR: i32 = 6;

/// Rollout did not complete in time
pub const TIMEOUT_ERROR: i32 = 7;

/// Jewel backend failed to provision a secret
pub const SECRET_ERROR: i32 = 8;

/// Usage error - invalid arguments or options (following sysexits.h convention)
pub const USAGE_ERROR: i32 = 64;
