//! Declarative handler bindings.
//!
//! A binding is the descriptor the provider runtime consumes at
//! construction time: service definition name, URI, HTTP method, and the
//! handler with its payload arity. Method inference follows the arity — a
//! handler without a payload argument binds to GET, one with a payload
//! argument binds to POST — unless [`ServiceBinding::with_method`]
//! overrides it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use arrowhead_core::{HandlerError, HttpMethod, Params};
use serde_json::Value;

/// Boxed future returned by service handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, HandlerError>> + Send>>;

type QueryHandler = Arc<dyn Fn(Params) -> HandlerFuture + Send + Sync>;
type PayloadHandler = Arc<dyn Fn(Value, Params) -> HandlerFuture + Send + Sync>;

/// A handler with its payload arity.
#[derive(Clone)]
pub(crate) enum HandlerFn {
    /// Takes query parameters only; no business payload.
    Query(QueryHandler),
    /// Takes the JSON-decoded request body plus query parameters.
    Payload(PayloadHandler),
}

/// One exposed provider operation: (service definition, URI, method,
/// handler).
#[derive(Clone)]
pub struct ServiceBinding {
    service_definition: String,
    uri: String,
    method: HttpMethod,
    handler: HandlerFn,
}

impl ServiceBinding {
    /// Binds a handler that takes no business payload. Inferred method: GET.
    pub fn query<F, Fut>(
        service_definition: impl Into<String>,
        uri: impl Into<String>,
        handler: F,
    ) -> Self
    where
        F: Fn(Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        Self {
            service_definition: service_definition.into(),
            uri: uri.into(),
            method: HttpMethod::Get,
            handler: HandlerFn::Query(Arc::new(move |params| Box::pin(handler(params)))),
        }
    }

    /// Binds a handler that takes a JSON payload. Inferred method: POST.
    pub fn payload<F, Fut>(
        service_definition: impl Into<String>,
        uri: impl Into<String>,
        handler: F,
    ) -> Self
    where
        F: Fn(Value, Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        Self {
            service_definition: service_definition.into(),
            uri: uri.into(),
            method: HttpMethod::Post,
            handler: HandlerFn::Payload(Arc::new(move |value, params| {
                Box::pin(handler(value, params))
            })),
        }
    }

    /// Overrides the inferred HTTP method.
    #[must_use]
    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    /// The service definition name this binding registers under.
    #[must_use]
    pub fn service_definition(&self) -> &str {
        &self.service_definition
    }

    /// The URI the service is served at.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The HTTP method the service is routed on.
    #[must_use]
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub(crate) fn handler(&self) -> &HandlerFn {
        &self.handler
    }
}

impl std::fmt::Debug for ServiceBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceBinding")
            .field("service_definition", &self.service_definition)
            .field("uri", &self.uri)
            .field("method", &self.method)
            .field(
                "arity",
                &match self.handler {
                    HandlerFn::Query(_) => "query",
                    HandlerFn::Payload(_) => "payload",
                },
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn query_binding_infers_get() {
        let binding = ServiceBinding::query("get-car", "/carfactory", |_params| async {
            Ok(json!([]))
        });
        assert_eq!(binding.method(), HttpMethod::Get);
        assert_eq!(binding.service_definition(), "get-car");
        assert_eq!(binding.uri(), "/carfactory");
        assert!(matches!(binding.handler(), HandlerFn::Query(_)));
    }

    #[test]
    fn payload_binding_infers_post() {
        let binding = ServiceBinding::payload("create-car", "/carfactory", |_body, _params| async {
            Ok(json!({"status": "success"}))
        });
        assert_eq!(binding.method(), HttpMethod::Post);
        assert!(matches!(binding.handler(), HandlerFn::Payload(_)));
    }

    #[test]
    fn explicit_method_overrides_inference() {
        let binding = ServiceBinding::payload("update-car", "/carfactory", |_body, _params| async {
            Ok(json!({}))
        })
        .with_method(HttpMethod::Put);
        assert_eq!(binding.method(), HttpMethod::Put);
    }
}
