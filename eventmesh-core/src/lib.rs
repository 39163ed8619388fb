pub mod crd;

/// The name of the feature flag which controls transport encryption.
pub const FEATURE_TRANSPORT_ENCRYPTION: &str = "transport-encryption";
/// The label carrying the version of an installed component.
pub const VERSION_LABEL: &str = "app.kubernetes.io/version";
