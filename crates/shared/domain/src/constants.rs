//! Constants shared across slices.

/// OpenAPI tag for system endpoints.
pub const SYSTEM_TAG: &str = "System";
