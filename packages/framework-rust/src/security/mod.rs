//! Trust material loading and mutual-TLS configuration.

pub mod context;
pub mod trust;

pub use context::{ClientTls, TrustContext};
pub use trust::TrustMaterial;
