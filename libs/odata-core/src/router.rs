//! Path router.
//!
//! Path grammar under the route prefix:
//!
//! ```text
//! ''                          service document
//! $metadata                   metadata document
//! {coll}                      GET list, POST create
//! {coll}/$count               GET count
//! {coll}/{op}[()]             collection-bound function (GET) / action (POST)
//! {coll}({key})               GET, PUT, PATCH, DELETE
//! {coll}({key})/{nav}         GET related entity or entities
//! {coll}({key})/{op}[()]      entity-bound function (GET) / action (POST)
//! ```
//!
//! Keys are written bare (`42`), quoted (`'abc'`, with `''` escaping a
//! quote) or named (`id=42`). Operation names may carry the schema namespace
//! (`Default.promote`).

use std::borrow::Cow;
use std::sync::Arc;

use http::Method;
use serde_json::Value;

use crate::Error;
use crate::context::RequestContext;
use crate::operation::{Binding, CustomOperation};
use crate::schema::{CollectionDescriptor, EntityDescriptor, Multiplicity};

/// What a request resolved to.
#[derive(Clone, Debug)]
pub enum Operation {
    ServiceDocument,
    Metadata,
    List,
    Count,
    Create,
    Get,
    Replace,
    Patch,
    Delete,
    /// To-one navigation from a single entity.
    NavigationGet,
    /// To-many navigation from a single entity.
    NavigationList,
    Invoke(CustomOperation),
}

impl Operation {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Operation::ServiceDocument => "service_document",
            Operation::Metadata => "metadata",
            Operation::List => "list",
            Operation::Count => "count",
            Operation::Create => "create",
            Operation::Get => "get",
            Operation::Replace => "replace",
            Operation::Patch => "patch",
            Operation::Delete => "delete",
            Operation::NavigationGet => "navigation_get",
            Operation::NavigationList => "navigation_list",
            Operation::Invoke(op) => op.name(),
        }
    }
}

/// Match `method` + `path` against the registry carried by `ctx`.
///
/// On a match the context is bound to the collection, its backend handle,
/// the key and the navigation edge as applicable. `Ok(None)` means no route;
/// the first registered collection whose name prefixes the path wins.
///
/// # Errors
/// `Error::InvalidKey` when the path names a collection and a key that
/// cannot be read as the entity's key type.
pub fn resolve(
    method: &Method,
    path: &str,
    ctx: &mut RequestContext,
) -> Result<Option<Operation>, Error> {
    let Ok(decoded) = urlencoding::decode(path) else {
        tracing::debug!(%method, path, "undecodable path");
        return Ok(None);
    };
    let trimmed = decoded.trim_matches('/');

    let Some(rest) = strip_route(trimmed, &ctx.route_prefix) else {
        return Ok(None);
    };

    let op = if rest.is_empty() {
        (method == Method::GET).then_some(Operation::ServiceDocument)
    } else if rest == "$metadata" {
        (method == Method::GET).then_some(Operation::Metadata)
    } else {
        resolve_collection(method, rest, ctx)?
    };

    match &op {
        Some(op) => tracing::debug!(
            %method,
            path,
            operation = op.name(),
            collection = ctx.collection.as_ref().map(|c| c.name()).unwrap_or_default(),
            key = ctx.key_literal.as_deref().unwrap_or_default(),
            "route matched"
        ),
        None => tracing::debug!(%method, path, "no route"),
    }
    Ok(op)
}

fn strip_route<'p>(path: &'p str, prefix: &str) -> Option<&'p str> {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        return Some(path);
    }
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some(rest)
    } else {
        rest.strip_prefix('/').map(|r| r.trim_start_matches('/'))
    }
}

fn resolve_collection(
    method: &Method,
    rest: &str,
    ctx: &mut RequestContext,
) -> Result<Option<Operation>, Error> {
    let Some((collection, tail)) = ctx.registry.collections().iter().find_map(|c| {
        let tail = rest.strip_prefix(c.name())?;
        (tail.is_empty() || tail.starts_with('/') || tail.starts_with('('))
            .then(|| (Arc::clone(c), tail))
    }) else {
        return Ok(None);
    };

    ctx.store = Some(collection.store());
    ctx.collection = Some(Arc::clone(&collection));

    if tail.is_empty() {
        return Ok(match *method {
            Method::GET => Some(Operation::List),
            Method::POST => Some(Operation::Create),
            _ => None,
        });
    }

    if let Some(segment) = tail.strip_prefix('/') {
        if segment == "$count" {
            return Ok((method == Method::GET).then_some(Operation::Count));
        }
        return Ok(bound_operation(
            method,
            &collection,
            segment,
            Binding::Collection,
            ctx.registry.namespace(),
        ));
    }

    // tail starts with '('
    let Some((key_text, after)) = split_key(tail) else {
        return Err(Error::InvalidKey {
            collection: collection.name().to_owned(),
            literal: tail.to_owned(),
            reason: "unbalanced parentheses".to_owned(),
        });
    };
    let entity = collection.entity();
    let key = parse_key(entity, key_text).map_err(|reason| Error::InvalidKey {
        collection: collection.name().to_owned(),
        literal: key_text.to_owned(),
        reason,
    })?;
    ctx.key_literal = Some(entity.key_type().key_literal(&key));
    ctx.key = Some(key);

    if after.is_empty() {
        return Ok(match *method {
            Method::GET => Some(Operation::Get),
            Method::PUT => Some(Operation::Replace),
            Method::PATCH => Some(Operation::Patch),
            Method::DELETE => Some(Operation::Delete),
            _ => None,
        });
    }

    let Some(segment) = after.strip_prefix('/') else {
        return Ok(None);
    };
    if let Some(nav) = entity.navigation(segment) {
        if method != Method::GET {
            return Ok(None);
        }
        let op = match nav.multiplicity() {
            Multiplicity::One => Operation::NavigationGet,
            Multiplicity::Many => Operation::NavigationList,
        };
        ctx.navigation = Some(nav.clone());
        return Ok(Some(op));
    }

    Ok(bound_operation(
        method,
        &collection,
        segment,
        Binding::Entity,
        ctx.registry.namespace(),
    ))
}

fn bound_operation(
    method: &Method,
    collection: &CollectionDescriptor,
    segment: &str,
    binding: Binding,
    namespace: &str,
) -> Option<Operation> {
    let name = segment.strip_suffix("()").unwrap_or(segment);
    let name = name
        .strip_prefix(namespace)
        .and_then(|n| n.strip_prefix('.'))
        .unwrap_or(name);
    let op = collection.operation(name, binding)?;
    (op.kind().method() == method).then(|| Operation::Invoke(op.clone()))
}

/// Split `(key)rest` into `key` and `rest`, honoring quoted literals.
fn split_key(tail: &str) -> Option<(&str, &str)> {
    let body = tail.strip_prefix('(')?;
    let mut in_quote = false;
    for (i, c) in body.char_indices() {
        match c {
            '\'' => in_quote = !in_quote,
            ')' if !in_quote => return Some((&body[..i], &body[i + 1..])),
            _ => {}
        }
    }
    None
}

/// Read a key literal as the entity's key type.
fn parse_key(entity: &EntityDescriptor, text: &str) -> Result<Value, String> {
    let text = text.trim();
    let literal = match text.split_once('=') {
        Some((name, value)) if !name.trim_start().starts_with('\'') => {
            if !name.trim().eq_ignore_ascii_case(entity.key()) {
                return Err(format!(
                    "'{}' is not the key of '{}'",
                    name.trim(),
                    entity.name()
                ));
            }
            value.trim()
        }
        _ => text,
    };
    if literal.is_empty() {
        return Err("empty key".to_owned());
    }

    let inner: Cow<'_, str> = match literal.strip_prefix('\'') {
        Some(quoted) => {
            let body = quoted
                .strip_suffix('\'')
                .ok_or_else(|| "unterminated string literal".to_owned())?;
            Cow::Owned(body.replace("''", "'"))
        }
        None => Cow::Borrowed(literal),
    };
    entity
        .key_type()
        .coerce_literal(&inner)
        .map_err(|e| e.to_string())
}
