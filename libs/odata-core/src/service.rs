//! Transport-agnostic request execution.
//!
//! [`ODataService::handle`] routes a request, parses its query options
//! against the addressed entity, runs the storage calls and returns a status
//! plus payload. The HTTP layer only translates to and from its own types.

use std::sync::Arc;

use futures::future::try_join_all;
use http::{Method, StatusCode};
use serde_json::{Map, Value};
use tracing::instrument;

use crate::Error;
use crate::Record;
use crate::builder::{build_entity, target_collection};
use crate::context::RequestContext;
use crate::limits::QueryLimits;
use crate::metadata::{metadata_document, service_document};
use crate::navigation::Related;
use crate::parser::QueryParser;
use crate::router::{Operation, resolve};
use crate::schema::{EntityDescriptor, SchemaRegistry};
use crate::storage::StoreError;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Scheme and authority used in `@odata.id` / `@odata.context` links.
    pub base_url: String,
    pub route_prefix: String,
    pub limits: QueryLimits,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8087".to_owned(),
            route_prefix: "/odata".to_owned(),
            limits: QueryLimits::default(),
        }
    }
}

/// A request as seen by the service: verb, path, raw query string and an
/// already decoded JSON body.
#[derive(Debug, Clone)]
pub struct ODataRequest {
    pub method: Method,
    pub path: String,
    pub query: String,
    pub body: Option<Value>,
}

impl ODataRequest {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: String::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    /// `text/plain`, used by `$count`.
    Text(String),
    Empty,
}

#[derive(Debug, Clone)]
pub struct ODataResponse {
    pub status: StatusCode,
    pub payload: Payload,
    /// Entity id of a newly created entity.
    pub location: Option<String>,
}

impl ODataResponse {
    fn ok(body: Value) -> Self {
        Self {
            status: StatusCode::OK,
            payload: Payload::Json(body),
            location: None,
        }
    }

    fn text(body: String) -> Self {
        Self {
            status: StatusCode::OK,
            payload: Payload::Text(body),
            location: None,
        }
    }

    fn no_content() -> Self {
        Self {
            status: StatusCode::NO_CONTENT,
            payload: Payload::Empty,
            location: None,
        }
    }

    /// The JSON body, if any.
    #[must_use]
    pub fn json(&self) -> Option<&Value> {
        match &self.payload {
            Payload::Json(v) => Some(v),
            Payload::Text(_) | Payload::Empty => None,
        }
    }
}

/// Executes requests against one schema registry.
#[derive(Clone)]
pub struct ODataService {
    registry: Arc<SchemaRegistry>,
    config: ServiceConfig,
}

impl ODataService {
    #[must_use]
    pub fn new(registry: Arc<SchemaRegistry>, config: ServiceConfig) -> Self {
        Self { registry, config }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// A fresh, unrouted context for one request.
    #[must_use]
    pub fn context(&self) -> RequestContext {
        RequestContext::new(
            Arc::clone(&self.registry),
            self.config.base_url.as_str(),
            &self.config.route_prefix,
        )
        .with_limits(self.config.limits.clone())
    }

    /// Route and execute one request.
    ///
    /// # Errors
    /// - `Error::RouteNotFound` when no route matches
    /// - query parse and validation errors for the addressed entity
    /// - `Error::EntityNotFound`, `Error::InvalidBody`, `Error::Storage`
    /// - `Error::OperationFailed` from custom operation handlers
    #[instrument(skip_all, fields(method = %req.method, path = %req.path))]
    pub async fn handle(&self, req: ODataRequest) -> Result<ODataResponse, Error> {
        let mut ctx = self.context();
        let Some(op) = resolve(&req.method, &req.path, &mut ctx)? else {
            return Err(Error::RouteNotFound {
                method: req.method.to_string(),
                path: req.path,
            });
        };

        if let Some(entity) = addressed_entity(&ctx, &op)? {
            let registry = Arc::clone(&ctx.registry);
            ctx.query = QueryParser::new(&entity)
                .with_limits(ctx.limits.clone())
                .with_registry(&registry)
                .parse(&req.query)?;
        }

        match op {
            Operation::ServiceDocument => Ok(ODataResponse::ok(service_document(&ctx))),
            Operation::Metadata => Ok(ODataResponse::ok(metadata_document(&ctx.registry))),
            Operation::List => list(&ctx).await,
            Operation::Count => count(&ctx).await,
            Operation::Create => create(&ctx, req.body).await,
            Operation::Get => get(&ctx).await,
            Operation::Replace => write(&ctx, req.body, true).await,
            Operation::Patch => write(&ctx, req.body, false).await,
            Operation::Delete => delete(&ctx).await,
            Operation::NavigationGet | Operation::NavigationList => navigate(&ctx).await,
            Operation::Invoke(custom) => {
                let result = custom
                    .invoke(&ctx, req.body)
                    .await
                    .map_err(|source| Error::OperationFailed {
                        name: custom.name().to_owned(),
                        source,
                    })?;
                Ok(match result {
                    Value::Null => ODataResponse::no_content(),
                    other => ODataResponse::ok(other),
                })
            }
        }
    }
}

impl std::fmt::Debug for ODataService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ODataService")
            .field("namespace", &self.registry.namespace())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Entity the query options of `op` are parsed against: the navigation
/// target for navigation reads, the routed collection's entity otherwise.
fn addressed_entity(
    ctx: &RequestContext,
    op: &Operation,
) -> Result<Option<Arc<EntityDescriptor>>, Error> {
    match op {
        Operation::ServiceDocument | Operation::Metadata => Ok(None),
        Operation::NavigationGet | Operation::NavigationList => {
            let collection = ctx.collection()?;
            let target = target_collection(ctx, collection.entity(), ctx.navigation()?)?;
            Ok(Some(Arc::clone(target.entity())))
        }
        _ => Ok(Some(Arc::clone(ctx.collection()?.entity()))),
    }
}

async fn list(ctx: &RequestContext) -> Result<ODataResponse, Error> {
    let collection = ctx.collection()?;
    let store = ctx.store()?;

    let count = store
        .count(&ctx.query.filter)
        .await
        .map_err(|e| Error::storage("count", collection.name(), None, e))?;
    let rows = store
        .find(&ctx.query.clone().with_select(Vec::new()))
        .await
        .map_err(|e| Error::storage("find", collection.name(), None, e))?;

    let value = try_join_all(
        rows.iter()
            .map(|row| build_entity(row, collection.entity(), collection.name(), &ctx.query, ctx)),
    )
    .await?;

    Ok(ODataResponse::ok(list_body(
        format!("{}#{}", ctx.metadata_url(), collection.name()),
        count,
        value,
    )))
}

async fn count(ctx: &RequestContext) -> Result<ODataResponse, Error> {
    let collection = ctx.collection()?;
    let count = ctx
        .store()?
        .count(&ctx.query.filter)
        .await
        .map_err(|e| Error::storage("count", collection.name(), None, e))?;
    Ok(ODataResponse::text(count.to_string()))
}

async fn get(ctx: &RequestContext) -> Result<ODataResponse, Error> {
    let collection = ctx.collection()?;
    let record = fetch(ctx).await?;
    let entity = build_entity(&record, collection.entity(), collection.name(), &ctx.query, ctx).await?;
    Ok(ODataResponse::ok(with_context(
        entity_context(ctx, collection.name()),
        entity,
    )))
}

async fn create(ctx: &RequestContext, body: Option<Value>) -> Result<ODataResponse, Error> {
    let collection = ctx.collection()?;
    let entity = collection.entity();
    let record = record_from_body(entity, body)?;

    let stored = ctx
        .store()?
        .add(record)
        .await
        .map_err(|e| Error::storage("add", collection.name(), None, e))?;
    let key = stored.get(entity.key()).cloned().unwrap_or_default();
    tracing::debug!(collection = collection.name(), key = %key, "entity created");

    let built = build_entity(&stored, entity, collection.name(), &ctx.query, ctx).await?;
    Ok(ODataResponse {
        status: StatusCode::CREATED,
        payload: Payload::Json(with_context(entity_context(ctx, collection.name()), built)),
        location: Some(ctx.entity_id(collection.name(), entity, &stored)),
    })
}

/// PUT (`replace`) or PATCH. A replace resets every field the body omits
/// to null.
async fn write(
    ctx: &RequestContext,
    body: Option<Value>,
    replace: bool,
) -> Result<ODataResponse, Error> {
    let collection = ctx.collection()?;
    let entity = collection.entity();
    let key = ctx.key()?;
    let mut record = record_from_body(entity, body)?;

    if let Some(given) = record.remove(entity.key())
        && !given.is_null()
        && crate::compare_values(&given, key) != Some(std::cmp::Ordering::Equal)
    {
        return Err(Error::InvalidBody(format!(
            "key '{}' in body does not match {}",
            entity.key(),
            ctx.key_display()
        )));
    }
    if replace {
        for field in entity.fields() {
            if field.name != entity.key() {
                record.entry(field.name.clone()).or_insert(Value::Null);
            }
        }
    }

    let operation = if replace { "replace" } else { "update" };
    ctx.store()?
        .update(key, record)
        .await
        .map_err(|e| keyed_failure(ctx, operation, e))?;
    Ok(ODataResponse::no_content())
}

async fn delete(ctx: &RequestContext) -> Result<ODataResponse, Error> {
    ctx.store()?
        .remove(ctx.key()?)
        .await
        .map_err(|e| keyed_failure(ctx, "remove", e))?;
    Ok(ODataResponse::no_content())
}

async fn navigate(ctx: &RequestContext) -> Result<ODataResponse, Error> {
    let collection = ctx.collection()?;
    let edge = ctx.navigation()?;
    let target = target_collection(ctx, collection.entity(), edge)?;
    let base = fetch(ctx).await?;

    // page after resolving so @odata.count covers every related record
    let store_query = ctx.query.unpaged().with_select(Vec::new());
    let related = edge
        .resolve(&base, target.store().as_ref(), &store_query)
        .await
        .map_err(|e| Error::storage("navigate", target.name(), Some(&ctx.key_display()), e))?;

    match related {
        Related::Many(rows) => {
            let count = u64::try_from(rows.len()).unwrap_or(u64::MAX);
            let page = ctx.query.page(rows);
            let value = try_join_all(
                page.iter()
                    .map(|row| build_entity(row, target.entity(), target.name(), &ctx.query, ctx)),
            )
            .await?;
            let context = format!(
                "{}#{}({})/{}",
                ctx.metadata_url(),
                collection.name(),
                ctx.key_display(),
                edge.name()
            );
            Ok(ODataResponse::ok(list_body(context, count, value)))
        }
        Related::One(Some(row)) => {
            let built = build_entity(&row, target.entity(), target.name(), &ctx.query, ctx).await?;
            Ok(ODataResponse::ok(with_context(entity_context(ctx, target.name()), built)))
        }
        Related::One(None) => Err(Error::EntityNotFound {
            collection: target.name().to_owned(),
            key: format!("{}({})/{}", collection.name(), ctx.key_display(), edge.name()),
        }),
    }
}

/// The full stored record addressed by the path key.
async fn fetch(ctx: &RequestContext) -> Result<Record, Error> {
    let collection = ctx.collection()?;
    ctx.store()?
        .get(ctx.key()?, &[])
        .await
        .map_err(|e| keyed_failure(ctx, "get", e))?
        .ok_or_else(|| Error::EntityNotFound {
            collection: collection.name().to_owned(),
            key: ctx.key_display(),
        })
}

fn entity_context(ctx: &RequestContext, collection: &str) -> String {
    format!("{}#{collection}/$entity", ctx.metadata_url())
}

fn list_body(context: String, count: u64, value: Vec<Value>) -> Value {
    let mut out = Map::new();
    out.insert("@odata.context".to_owned(), Value::String(context));
    out.insert("@odata.count".to_owned(), Value::from(count));
    out.insert("value".to_owned(), Value::Array(value));
    Value::Object(out)
}

/// Put `@odata.context` ahead of the entity's own annotations.
fn with_context(context: String, entity: Value) -> Value {
    let mut out = Map::new();
    out.insert("@odata.context".to_owned(), Value::String(context));
    if let Value::Object(fields) = entity {
        out.extend(fields);
    }
    Value::Object(out)
}

/// Storage failure on the keyed entity; a missing key reads as a 404.
fn keyed_failure(ctx: &RequestContext, operation: &'static str, err: StoreError) -> Error {
    let collection = ctx.collection.as_ref().map(|c| c.name()).unwrap_or_default();
    match err {
        StoreError::NotFound { .. } => Error::EntityNotFound {
            collection: collection.to_owned(),
            key: ctx.key_display(),
        },
        other => Error::storage(operation, collection, Some(&ctx.key_display()), other),
    }
}

/// Validate a request body against the entity's declared fields.
///
/// Annotation keys (`@odata.*`) are skipped; names are matched
/// case-insensitively and stored under their declared spelling.
fn record_from_body(entity: &EntityDescriptor, body: Option<Value>) -> Result<Record, Error> {
    let Some(body) = body else {
        return Err(Error::InvalidBody("a JSON object body is required".to_owned()));
    };
    let Value::Object(fields) = body else {
        return Err(Error::InvalidBody("expected a JSON object".to_owned()));
    };

    let mut record = Record::new();
    for (name, value) in fields {
        if name.starts_with('@') {
            continue;
        }
        let Some(field) = entity.find_field(&name) else {
            let reason = if entity.navigation(&name).is_some() {
                format!("navigation property '{name}' cannot be written inline")
            } else {
                format!("unknown property '{name}' on '{}'", entity.name())
            };
            return Err(Error::InvalidBody(reason));
        };
        if !field.accepts(&value) {
            let expected = if field.collection {
                format!("Collection({})", field.wire_type.edm_name())
            } else {
                field.wire_type.edm_name().to_owned()
            };
            return Err(Error::InvalidBody(format!(
                "property '{}' expects {expected}, got {value}",
                field.name
            )));
        }
        record.insert(field.name.clone(), value);
    }
    Ok(record)
}
