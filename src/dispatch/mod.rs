// The versioned dispatcher: route resolution, the per-request pipeline and
// the handler registration table.
mod adapter;

pub use adapter::{from_axum, router};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::Method;
use serde_json::{json, Value};

use crate::auth::Authenticator;
use crate::config;
use crate::error::ApiError;
use crate::request::{normalize, Fields, RawRequest, RequestEnvelope};
use crate::response::{Envelope, Reply};
use crate::schema::{load_validated, Schema};

/// Payload key the authenticated user's identity is injected under.
pub const USER_ID_FIELD: &str = "user_id";

/// Per-route configuration: an optional validator and an explicit auth
/// decision. No sentinel values; "no validator" and "no auth" are each their
/// own field.
#[derive(Clone, Default)]
pub struct RouteConfig {
    pub validator: Option<Arc<dyn Schema>>,
    pub auth_required: bool,
    /// Route-level auth key; the application secret is the fallback.
    pub auth_key: Option<String>,
}

impl RouteConfig {
    /// No validation, no authentication.
    pub fn open() -> Self {
        Self::default()
    }

    pub fn validated(schema: impl Schema + 'static) -> Self {
        Self {
            validator: Some(Arc::new(schema)),
            ..Self::default()
        }
    }

    pub fn with_auth(mut self) -> Self {
        self.auth_required = true;
        self
    }

    pub fn with_auth_key(mut self, key: impl Into<String>) -> Self {
        self.auth_required = true;
        self.auth_key = Some(key.into());
        self
    }
}

/// Everything a handler gets to see about one request. Built fresh per
/// invocation and handed over by value; no state outlives the request.
pub struct RequestContext {
    pub api_version: String,
    /// Lowercased HTTP verb.
    pub method: String,
    /// The normalized request, files included.
    pub envelope: RequestEnvelope,
    /// Validated field mapping; carries `user_id` when the route
    /// authenticates.
    pub payload: Fields,
    pub user_id: Option<String>,
    /// The envelope the dispatcher responds with when the handler returns
    /// `None`.
    pub default: Envelope,
}

/// Endpoint business logic for one (version, method) pair.
///
/// Returning `Ok(None)` asks the dispatcher to respond with the default
/// envelope and status 200. Errors that are not [`ApiError`] are contained
/// to a generic 500.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, cx: RequestContext) -> anyhow::Result<Option<Reply>>;
}

/// Adapt an async closure into a [`Handler`].
pub fn fn_handler<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(RequestContext) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = anyhow::Result<Option<Reply>>> + Send,
{
    FnHandler(f)
}

pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(RequestContext) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = anyhow::Result<Option<Reply>>> + Send,
{
    async fn handle(&self, cx: RequestContext) -> anyhow::Result<Option<Reply>> {
        (self.0)(cx).await
    }
}

struct Route {
    config: RouteConfig,
    handler: Arc<dyn Handler>,
}

/// A versioned endpoint: the immutable registration table mapping
/// (version, method) to configuration and handler, plus the shared
/// collaborators. Built once, then only read.
pub struct Endpoint {
    name: String,
    look_for_files: bool,
    routes: HashMap<(String, String), Route>,
    authenticator: Option<Arc<dyn Authenticator>>,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("look_for_files", &self.look_for_files)
            .field("routes", &self.routes.keys().collect::<Vec<_>>())
            .field("has_authenticator", &self.authenticator.is_some())
            .finish()
    }
}

impl Endpoint {
    pub fn builder(name: impl Into<String>) -> EndpointBuilder {
        EndpointBuilder {
            name: name.into(),
            look_for_files: false,
            routes: HashMap::new(),
            authenticator: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run one request through the pipeline. Never fails: every error
    /// becomes a JSON error envelope with the matching status.
    pub async fn dispatch(&self, raw: RawRequest) -> Reply {
        match self.run(raw).await {
            Ok(reply) => reply,
            Err(err) => Reply::json(err.status_code(), err.to_envelope()),
        }
    }

    async fn run(&self, raw: RawRequest) -> Result<Reply, ApiError> {
        // Resolve the version from the path and the method from the verb,
        // then look the pair up. A miss is a configuration gap the endpoint
        // author has to close; it is never retried.
        let api_version = resolve_version(&raw.path)?;
        let method = raw.method.as_str().to_lowercase();

        let route = self
            .routes
            .get(&(api_version.clone(), method.clone()))
            .ok_or_else(|| {
                ApiError::configuration(format!(
                    "no route registered for ({api_version}, {method}) on endpoint {}; \
                     register every (version, method) pair, with no validator when none is required",
                    self.name
                ))
            })?;

        let envelope = normalize(&raw, self.look_for_files)?;

        let mut payload = match &route.config.validator {
            Some(schema) => load_validated(schema.as_ref(), envelope.fields.clone())?,
            None => envelope.fields.clone(),
        };

        let mut user_id = None;
        if route.config.auth_required {
            // build() guarantees an authenticator exists for auth routes.
            let authenticator = self.authenticator.as_ref().ok_or_else(|| {
                ApiError::configuration(format!(
                    "endpoint {} requires auth but has no authenticator",
                    self.name
                ))
            })?;
            let key = route
                .config
                .auth_key
                .clone()
                .unwrap_or_else(|| config::config().app_secret.clone());

            let identity = authenticator.authenticate(&envelope, &payload, &key).await?;
            payload.insert(USER_ID_FIELD.to_string(), Value::String(identity.clone()));
            user_id = Some(identity);
        }

        let default = Envelope::raw(
            "data.request is the validated request; route handlers may substitute their own envelope",
            json!({ "request": Value::Object(payload.clone()) }),
        );

        let cx = RequestContext {
            api_version,
            method,
            envelope,
            payload,
            user_id,
            default: default.clone(),
        };

        let outcome = route
            .handler
            .handle(cx)
            .await
            .map_err(ApiError::from_handler_failure)?;

        Ok(outcome.unwrap_or_else(|| Reply::ok(default)))
    }
}

/// The version is the second-to-last path segment: `/notes/v1/` names `v1`.
fn resolve_version(path: &str) -> Result<String, ApiError> {
    let segments: Vec<&str> = path.split('/').collect();
    segments
        .len()
        .checked_sub(2)
        .and_then(|index| segments.get(index))
        .filter(|segment| !segment.is_empty())
        .map(|segment| (*segment).to_string())
        .ok_or_else(|| {
            ApiError::configuration(format!(
                "cannot resolve an api version from '{path}'; expected a path of the form .../<version>/"
            ))
        })
}

pub struct EndpointBuilder {
    name: String,
    look_for_files: bool,
    routes: HashMap<(String, String), Route>,
    authenticator: Option<Arc<dyn Authenticator>>,
}

impl EndpointBuilder {
    /// Ask the normalizer to collect uploaded files for POST/PUT requests.
    pub fn look_for_files(mut self, look: bool) -> Self {
        self.look_for_files = look;
        self
    }

    pub fn authenticator(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.authenticator = Some(Arc::new(authenticator));
        self
    }

    pub fn route(
        mut self,
        version: &str,
        method: Method,
        config: RouteConfig,
        handler: impl Handler + 'static,
    ) -> Self {
        self.routes.insert(
            (version.to_string(), method.as_str().to_lowercase()),
            Route {
                config,
                handler: Arc::new(handler),
            },
        );
        self
    }

    /// Check the table for consistency and freeze it. Auth routes must have
    /// an authenticator and a usable key before the endpoint ever sees a
    /// request.
    pub fn build(self) -> Result<Endpoint, ApiError> {
        for ((version, method), route) in &self.routes {
            if !route.config.auth_required {
                continue;
            }
            if self.authenticator.is_none() {
                return Err(ApiError::configuration(format!(
                    "route ({version}, {method}) on endpoint {} requires auth but no authenticator is installed",
                    self.name
                )));
            }
            let has_key =
                route.config.auth_key.is_some() || !config::config().app_secret.is_empty();
            if !has_key {
                return Err(ApiError::configuration(format!(
                    "route ({version}, {method}) on endpoint {} requires auth but neither a route key nor APP_SECRET is set",
                    self.name
                )));
            }
        }

        Ok(Endpoint {
            name: self.name,
            look_for_files: self.look_for_files,
            routes: self.routes,
            authenticator: self.authenticator,
        })
    }
}
