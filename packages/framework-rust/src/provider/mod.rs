//! Provider-side runtime: handler bindings, registration, mTLS listener.

pub mod binding;
pub mod runtime;

pub use binding::ServiceBinding;
pub use runtime::{ProviderRuntime, RuntimeState};
