//! Query-string parser: `$select`, `$filter`, `$orderby`, `$top`, `$skip`
//! and `$expand` into [`QueryParams`] for one entity type.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::Error;
use crate::filter::{Clause, Operator, Predicate};
use crate::limits::QueryLimits;
use crate::query::{OrderBy, OrderKey, QueryParams, SortDir};
use crate::schema::{EntityDescriptor, SchemaRegistry};

static COMPARISON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s+([A-Za-z]+)\s+(.+?)\s*$")
        .unwrap_or_else(|e| unreachable!("static regex: {e}"))
});

static FUNCTION_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z]+)\s*\(\s*([A-Za-z_][A-Za-z0-9_]*)\s*,\s*'((?:[^']|'')*)'\s*\)\s*$")
        .unwrap_or_else(|e| unreachable!("static regex: {e}"))
});

static QUOTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^'((?:[^']|'')*)'$").unwrap_or_else(|e| unreachable!("static regex: {e}"))
});

/// Parse a raw query string (with or without the leading `?`) for `entity`
/// using default limits.
///
/// # Errors
/// See [`QueryParser::parse`].
pub fn parse_query(raw: &str, entity: &EntityDescriptor) -> Result<QueryParams, Error> {
    QueryParser::new(entity).parse(raw)
}

pub struct QueryParser<'a> {
    entity: &'a EntityDescriptor,
    limits: QueryLimits,
    registry: Option<&'a SchemaRegistry>,
}

impl<'a> QueryParser<'a> {
    #[must_use]
    pub fn new(entity: &'a EntityDescriptor) -> Self {
        Self {
            entity,
            limits: QueryLimits::default(),
            registry: None,
        }
    }

    #[must_use]
    pub fn with_limits(mut self, limits: QueryLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Resolve `$expand` targets through `registry` so every nested option
    /// is checked before any store is touched. Without a registry only the
    /// expand grammar is checked.
    #[must_use]
    pub fn with_registry(mut self, registry: &'a SchemaRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Parse a URL-encoded query string.
    ///
    /// # Errors
    /// - `Error::InvalidQuery` for undecodable input or repeated options
    /// - `Error::InvalidSelect` / `InvalidOrderBy` / `InvalidPaging` / `InvalidExpand`
    /// - `Error::FilterParse` carrying the original `$filter` text
    pub fn parse(&self, raw: &str) -> Result<QueryParams, Error> {
        let raw = raw.strip_prefix('?').unwrap_or(raw);
        let pairs: Vec<(String, String)> =
            serde_urlencoded::from_str(raw).map_err(|e| Error::InvalidQuery {
                text: raw.to_owned(),
                reason: e.to_string(),
            })?;
        self.parse_options(pairs)
    }

    /// Parse already-decoded `(option, value)` pairs, e.g. the options of one
    /// `$expand` item.
    ///
    /// # Errors
    /// Same as [`QueryParser::parse`].
    pub fn parse_options<K, V>(
        &self,
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Result<QueryParams, Error>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut seen: Vec<String> = Vec::new();
        let mut query = QueryParams::new().with_select(self.entity.field_names());

        for (key, value) in pairs {
            let key = key.as_ref().trim();
            let value = value.as_ref();
            if !key.starts_with('$') {
                continue;
            }
            let option = key.to_ascii_lowercase();
            if seen.contains(&option) {
                return Err(Error::InvalidQuery {
                    text: key.to_owned(),
                    reason: "query option given more than once".to_owned(),
                });
            }
            match option.as_str() {
                "$select" => query.select = self.parse_select(value)?,
                "$filter" => query.filter = self.parse_filter(value)?,
                "$orderby" => query.order = self.parse_orderby(value)?,
                "$top" => {
                    let top = parse_count("$top", value)?;
                    self.limits.validate_top(top)?;
                    query.top = Some(top);
                }
                "$skip" => query.skip = Some(parse_count("$skip", value)?),
                "$expand" => {
                    self.check_expand(value)?;
                    query.expand = value.trim().to_owned();
                }
                other => {
                    tracing::debug!(option = other, entity = self.entity.name(), "ignoring query option");
                }
            }
            seen.push(option);
        }

        Ok(query)
    }

    fn check_expand(&self, raw: &str) -> Result<(), Error> {
        let items = crate::expand::parse_expand(raw)?;
        let Some(registry) = self.registry else {
            return Ok(());
        };
        for item in &items {
            let Some(edge) = self.entity.navigation(&item.property) else {
                if self.limits.strict_expand {
                    return Err(Error::NavigationNotFound {
                        entity: self.entity.name().to_owned(),
                        property: item.property.clone(),
                    });
                }
                continue;
            };
            let Some(target) = registry.entity(edge.target_entity()) else {
                continue;
            };
            QueryParser::new(target)
                .with_limits(self.limits.clone())
                .with_registry(registry)
                .parse_options(item.options.iter().map(|(k, v)| (k.as_str(), v.as_str())))?;
        }
        Ok(())
    }

    fn parse_select(&self, raw: &str) -> Result<Vec<String>, Error> {
        let invalid = |reason: String| Error::InvalidSelect {
            text: raw.to_owned(),
            reason,
        };
        let raw_trimmed = raw.trim();
        if raw_trimmed.is_empty() {
            return Err(invalid("empty $select".to_owned()));
        }

        let mut fields: Vec<String> = Vec::new();
        for part in raw_trimmed.split(',') {
            let name = part.trim();
            if name.is_empty() {
                return Err(invalid("empty field name".to_owned()));
            }
            let resolved: Vec<String> = if name == "*" {
                self.entity.field_names()
            } else if let Some(field) = self.entity.find_field(name) {
                vec![field.name.clone()]
            } else if let Some(nav) = self.entity.navigation(name) {
                vec![nav.name().to_owned()]
            } else {
                return Err(invalid(format!(
                    "unknown field '{name}' on '{}'",
                    self.entity.name()
                )));
            };
            for field in resolved {
                if fields.iter().any(|f| f.eq_ignore_ascii_case(&field)) {
                    return Err(invalid(format!("duplicate field '{field}'")));
                }
                fields.push(field);
            }
        }

        self.limits.validate_select(raw, fields.len())?;
        Ok(fields)
    }

    fn parse_orderby(&self, raw: &str) -> Result<OrderBy, Error> {
        let invalid = |reason: String| Error::InvalidOrderBy {
            text: raw.to_owned(),
            reason,
        };
        if raw.trim().is_empty() {
            return Err(invalid("empty $orderby".to_owned()));
        }

        let mut keys: Vec<OrderKey> = Vec::new();
        for part in raw.split(',') {
            let tokens: Vec<&str> = part.split_whitespace().collect();
            let (name, dir) = match tokens.as_slice() {
                [name] => (*name, SortDir::Asc),
                [name, dir] => (
                    *name,
                    SortDir::parse(dir)
                        .ok_or_else(|| invalid(format!("unknown direction '{dir}'")))?,
                ),
                [] => return Err(invalid("empty order item".to_owned())),
                _ => return Err(invalid(format!("expected 'field [asc|desc]', got '{}'", part.trim()))),
            };
            let field = self.entity.find_field(name).ok_or_else(|| {
                invalid(format!("unknown field '{name}' on '{}'", self.entity.name()))
            })?;
            if keys.iter().any(|k| k.field == field.name) {
                return Err(invalid(format!("duplicate field '{}'", field.name)));
            }
            keys.push(OrderKey {
                field: field.name.clone(),
                dir,
            });
        }

        self.limits.validate_orderby(raw, keys.len())?;
        Ok(OrderBy(keys))
    }

    /// `field op literal` or `contains|startswith|endswith(field,'text')`.
    fn parse_filter(&self, raw: &str) -> Result<Predicate, Error> {
        self.limits.validate_filter(raw)?;
        let invalid = |reason: String| Error::FilterParse {
            text: raw.to_owned(),
            reason,
        };
        if raw.trim().is_empty() {
            return Err(invalid("empty $filter".to_owned()));
        }

        if let Some(caps) = FUNCTION_CALL.captures(raw) {
            let function = caps[1].to_ascii_lowercase();
            let field = self.resolve_field(&caps[2]).map_err(&invalid)?;
            let needle = regex::escape(&caps[3].replace("''", "'"));
            let pattern = match function.as_str() {
                "contains" => needle,
                "startswith" => format!("^{needle}"),
                "endswith" => format!("{needle}$"),
                other => return Err(invalid(format!("unsupported function '{other}'"))),
            };
            let clause = Clause::regex(&pattern).map_err(|e| invalid(e.to_string()))?;
            return Ok(Predicate::field(field, clause));
        }

        let caps = COMPARISON
            .captures(raw)
            .ok_or_else(|| invalid("expected 'field operator literal'".to_owned()))?;
        let field = self.resolve_field(&caps[1]).map_err(&invalid)?;
        let op = comparison_operator(&caps[2])
            .ok_or_else(|| invalid(format!("unsupported operator '{}'", &caps[2])))?;
        let value = self.literal(&field, &caps[3]).map_err(&invalid)?;
        let clause = Clause::new(op, value).map_err(|e| invalid(e.to_string()))?;
        Ok(Predicate::field(field, clause))
    }

    fn resolve_field(&self, name: &str) -> Result<String, String> {
        self.entity
            .find_field(name)
            .map(|f| f.name.clone())
            .ok_or_else(|| format!("unknown field '{name}' on '{}'", self.entity.name()))
    }

    /// Coerce a literal by the field's wire type; `null` is null for any type.
    fn literal(&self, field: &str, text: &str) -> Result<Value, String> {
        let inner = if text.starts_with('\'') {
            let caps = QUOTED
                .captures(text)
                .ok_or_else(|| "unterminated string literal or trailing text".to_owned())?;
            caps[1].replace("''", "'")
        } else {
            if text.split_whitespace().nth(1).is_some() {
                return Err("multi-clause filters are not supported".to_owned());
            }
            if text == "null" {
                return Ok(Value::Null);
            }
            text.to_owned()
        };

        let ty = self
            .entity
            .wire_type(field)
            .ok_or_else(|| format!("unknown field '{field}'"))?;
        ty.coerce_literal(&inner).map_err(|e| e.to_string())
    }
}

fn comparison_operator(token: &str) -> Option<Operator> {
    match token.to_ascii_lowercase().as_str() {
        "eq" => Some(Operator::Eq),
        "ne" => Some(Operator::Ne),
        "gt" => Some(Operator::Gt),
        "ge" | "gte" => Some(Operator::Gte),
        "lt" => Some(Operator::Lt),
        "le" | "lte" => Some(Operator::Lte),
        _ => None,
    }
}

fn parse_count(option: &'static str, raw: &str) -> Result<u64, Error> {
    raw.trim().parse::<u64>().map_err(|_| Error::InvalidPaging {
        option,
        text: raw.to_owned(),
        reason: "expected a non-negative integer".to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::WireType;
    use serde_json::json;

    fn person() -> EntityDescriptor {
        EntityDescriptor::new("Person", "id")
            .field("id", WireType::Int32)
            .field("name", WireType::String)
            .field("age", WireType::Int16)
            .field("score", WireType::Double)
            .field("active", WireType::Boolean)
    }

    fn rec(v: Value) -> crate::Record {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn defaults_select_every_declared_field() {
        let q = parse_query("", &person()).unwrap();
        assert_eq!(q.select, vec!["id", "name", "age", "score", "active"]);
        assert!(q.filter.is_empty());
        assert!(q.order.is_empty());
        assert_eq!(q.top, None);
        assert_eq!(q.skip, None);
        assert_eq!(q.expand, "");
    }

    #[test]
    fn select_resolves_names_case_insensitively() {
        let q = parse_query("?$select=NAME, id", &person()).unwrap();
        assert_eq!(q.select, vec!["name", "id"]);

        let q = parse_query("$select=*", &person()).unwrap();
        assert_eq!(q.select.len(), 5);
    }

    #[test]
    fn select_rejects_unknown_and_duplicate_fields() {
        let err = parse_query("$select=id,nope", &person()).unwrap_err();
        assert!(matches!(err, Error::InvalidSelect { text, .. } if text == "id,nope"));

        let err = parse_query("$select=id,ID", &person()).unwrap_err();
        assert!(matches!(err, Error::InvalidSelect { .. }));

        let err = parse_query("$select=", &person()).unwrap_err();
        assert!(matches!(err, Error::InvalidSelect { .. }));
    }

    #[test]
    fn filter_coerces_integer_literals() {
        let q = parse_query("$filter=age eq 123", &person()).unwrap();
        assert!(q.filter.evaluate(&rec(json!({"age": 123}))));
        assert!(!q.filter.evaluate(&rec(json!({"age": "123"}))));
    }

    #[test]
    fn filter_rejects_non_numeric_literal_on_numeric_field() {
        let err = parse_query("$filter=age eq abc", &person()).unwrap_err();
        match err {
            Error::FilterParse { text, reason } => {
                assert_eq!(text, "age eq abc");
                assert!(reason.contains("abc"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn filter_reads_quoted_strings_with_escapes() {
        let q = parse_query("$filter=name%20eq%20%27O%27%27Brien%27", &person()).unwrap();
        assert!(q.filter.evaluate(&rec(json!({"name": "O'Brien"}))));

        let q = parse_query("$filter=name eq 'two words'", &person()).unwrap();
        assert!(q.filter.evaluate(&rec(json!({"name": "two words"}))));
    }

    #[test]
    fn filter_operators_and_spellings() {
        let p = person();
        let matches = |filter: &str, r: Value| {
            parse_query(&format!("$filter={filter}"), &p)
                .unwrap()
                .filter
                .evaluate(&rec(r))
        };
        assert!(matches("age gt 10", json!({"age": 11})));
        assert!(matches("age GE 11", json!({"age": 11})));
        assert!(matches("age gte 11", json!({"age": 11})));
        assert!(matches("age lt 11", json!({"age": 10})));
        assert!(matches("age le 10", json!({"age": 10})));
        assert!(matches("age ne 10", json!({"age": 9})));
        assert!(matches("score gt 1.5", json!({"score": 2.0})));
        assert!(matches("active eq true", json!({"active": true})));
        assert!(matches("name eq null", json!({"id": 1})));
    }

    #[test]
    fn filter_functions_lower_to_escaped_patterns() {
        let p = person();
        let q = parse_query("$filter=contains(name,'a.b')", &p).unwrap();
        assert!(q.filter.evaluate(&rec(json!({"name": "xa.by"}))));
        assert!(!q.filter.evaluate(&rec(json!({"name": "xaxby"}))));

        let q = parse_query("$filter=startswith(name,'Jo')", &p).unwrap();
        assert!(q.filter.evaluate(&rec(json!({"name": "John"}))));
        assert!(!q.filter.evaluate(&rec(json!({"name": "aJo"}))));

        let q = parse_query("$filter=endswith(name,'n')", &p).unwrap();
        assert!(q.filter.evaluate(&rec(json!({"name": "John"}))));
    }

    #[test]
    fn filter_errors_keep_original_text() {
        for filter in [
            "age eq 1 and name eq 'x'",
            "name eq 'x' and age eq 1",
            "nope eq 1",
            "age like 1",
            "age eq 40000",
            "name eq 'open",
            "(age eq 1)",
            "length(name,'x')",
        ] {
            let err = QueryParser::new(&person())
                .parse_options([("$filter", filter)])
                .unwrap_err();
            assert!(
                matches!(&err, Error::FilterParse { text, .. } if text == filter),
                "{filter}: {err}"
            );
        }
    }

    #[test]
    fn orderby_parses_directions_case_insensitively() {
        let q = parse_query("$orderby=age DESC, Name asc,id", &person()).unwrap();
        assert_eq!(
            q.order.0,
            vec![
                OrderKey::desc("age"),
                OrderKey::asc("name"),
                OrderKey::asc("id")
            ]
        );
    }

    #[test]
    fn orderby_rejects_bad_items() {
        for raw in ["nope", "age sideways", "age asc extra", "age,", "age,age desc"] {
            let err = QueryParser::new(&person())
                .parse_options([("$orderby", raw)])
                .unwrap_err();
            assert!(matches!(err, Error::InvalidOrderBy { .. }), "{raw}");
        }
    }

    #[test]
    fn paging_options() {
        let q = parse_query("$top=5&$skip=10", &person()).unwrap();
        assert_eq!(q.top, Some(5));
        assert_eq!(q.skip, Some(10));

        for raw in ["$top=-1", "$skip=x", "$top=1.5"] {
            let err = parse_query(raw, &person()).unwrap_err();
            assert!(matches!(err, Error::InvalidPaging { .. }), "{raw}");
        }
    }

    #[test]
    fn limits_are_enforced() {
        let p = person();
        let parser = QueryParser::new(&p).with_limits(
            QueryLimits::new()
                .with_max_top(10)
                .with_max_orderby_fields(1)
                .with_max_select_fields(1),
        );
        assert!(parser.parse("$top=11").is_err());
        assert!(parser.parse("$orderby=id,name").is_err());
        assert!(parser.parse("$select=id,name").is_err());
        assert!(parser.parse("$top=10&$orderby=id&$select=id").is_ok());
    }

    #[test]
    fn expand_is_validated_and_kept_raw() {
        let q = parse_query("$expand=members($select=id;$top=2)", &person()).unwrap();
        assert_eq!(q.expand, "members($select=id;$top=2)");

        let err = parse_query("$expand=members($select=id", &person()).unwrap_err();
        assert!(matches!(err, Error::InvalidExpand { .. }));
    }

    #[test]
    fn repeated_and_unknown_options() {
        let err = parse_query("$top=1&$TOP=2", &person()).unwrap_err();
        assert!(matches!(err, Error::InvalidQuery { .. }));

        let q = parse_query("$count=true&$format=json&custom=1", &person()).unwrap();
        assert_eq!(q.top, None);
    }
}
