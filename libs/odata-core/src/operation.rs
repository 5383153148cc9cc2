//! Custom operations bound to a collection or to one of its entities.
//!
//! Functions are invoked with `GET` and must not change state; actions are
//! invoked with `POST` and receive the request body.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use http::Method;
use serde_json::Value;

use crate::context::RequestContext;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationKind {
    Function,
    Action,
}

impl OperationKind {
    #[must_use]
    pub fn method(self) -> Method {
        match self {
            OperationKind::Function => Method::GET,
            OperationKind::Action => Method::POST,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Binding {
    /// `{collection}/{op}`
    Collection,
    /// `{collection}({key})/{op}`
    Entity,
}

#[async_trait]
pub trait OperationHandler: Send + Sync {
    /// Run the operation. For entity-bound operations `ctx.key` holds the key.
    async fn invoke(&self, ctx: &RequestContext, body: Option<Value>) -> anyhow::Result<Value>;
}

#[derive(Clone)]
pub struct CustomOperation {
    name: String,
    kind: OperationKind,
    binding: Binding,
    handler: Arc<dyn OperationHandler>,
}

impl CustomOperation {
    #[must_use]
    pub fn function(
        name: impl Into<String>,
        binding: Binding,
        handler: impl OperationHandler + 'static,
    ) -> Self {
        Self::new(name, OperationKind::Function, binding, Arc::new(handler))
    }

    #[must_use]
    pub fn action(
        name: impl Into<String>,
        binding: Binding,
        handler: impl OperationHandler + 'static,
    ) -> Self {
        Self::new(name, OperationKind::Action, binding, Arc::new(handler))
    }

    #[must_use]
    pub fn new(
        name: impl Into<String>,
        kind: OperationKind,
        binding: Binding,
        handler: Arc<dyn OperationHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            binding,
            handler,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    #[must_use]
    pub fn binding(&self) -> Binding {
        self.binding
    }

    /// # Errors
    /// Whatever the handler returns.
    pub async fn invoke(&self, ctx: &RequestContext, body: Option<Value>) -> anyhow::Result<Value> {
        self.handler.invoke(ctx, body).await
    }
}

impl fmt::Debug for CustomOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomOperation")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("binding", &self.binding)
            .finish_non_exhaustive()
    }
}
