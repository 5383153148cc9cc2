use std::fmt;

use crate::filter::Predicate;

// Ordering primitives
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SortDir {
    #[serde(rename = "asc")]
    Asc,
    #[serde(rename = "desc")]
    Desc,
}

impl SortDir {
    /// Case-insensitive `asc` / `desc`.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        if token.eq_ignore_ascii_case("asc") {
            Some(SortDir::Asc)
        } else if token.eq_ignore_ascii_case("desc") {
            Some(SortDir::Desc)
        } else {
            None
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderKey {
    pub field: String,
    pub dir: SortDir,
}

impl OrderKey {
    #[must_use]
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            dir: SortDir::Asc,
        }
    }

    #[must_use]
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            dir: SortDir::Desc,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[must_use]
pub struct OrderBy(pub Vec<OrderKey>);

impl OrderBy {
    pub fn empty() -> Self {
        Self(vec![])
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &OrderKey> {
        self.0.iter()
    }

    /// Append a key unless the field is already ordered on
    pub fn then(mut self, key: OrderKey) -> Self {
        if !self.0.iter().any(|k| k.field == key.field) {
            self.0.push(key);
        }
        self
    }
}

// Display trait for human-readable orderby representation
impl fmt::Display for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "(none)");
        }

        let formatted: Vec<String> = self
            .0
            .iter()
            .map(|key| {
                let dir_str = match key.dir {
                    SortDir::Asc => "asc",
                    SortDir::Desc => "desc",
                };
                format!("{} {}", key.field, dir_str)
            })
            .collect();

        write!(f, "{}", formatted.join(", "))
    }
}

/// Query parameters of one request: built once, consumed by one storage call
/// and by the entity response builder.
///
/// `select` always holds concrete field names; the parser fills it with the
/// entity's full field list when `$select` is absent. `expand` is the raw,
/// unparsed `$expand` text so nested levels can be peeled lazily.
#[derive(Clone, Debug, Default)]
#[must_use]
pub struct QueryParams {
    pub select: Vec<String>,
    pub filter: Predicate,
    pub order: OrderBy,
    pub top: Option<u64>,
    pub skip: Option<u64>,
    pub expand: String,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_select(mut self, fields: Vec<String>) -> Self {
        self.select = fields;
        self
    }

    pub fn with_filter(mut self, filter: Predicate) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_order(mut self, order: OrderBy) -> Self {
        self.order = order;
        self
    }

    pub fn with_top(mut self, top: u64) -> Self {
        self.top = Some(top);
        self
    }

    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Whether `name` appears in the select list (case-insensitive).
    #[must_use]
    pub fn selects(&self, name: &str) -> bool {
        self.select.iter().any(|s| s.eq_ignore_ascii_case(name))
    }

    /// Apply `$skip` then `$top` to an already filtered and ordered sequence.
    #[must_use]
    pub fn page<T>(&self, items: Vec<T>) -> Vec<T> {
        let skip = self
            .skip
            .map_or(0, |s| usize::try_from(s).unwrap_or(usize::MAX));
        let iter = items.into_iter().skip(skip);
        match self.top {
            Some(top) => iter
                .take(usize::try_from(top).unwrap_or(usize::MAX))
                .collect(),
            None => iter.collect(),
        }
    }

    /// A copy without paging, for counting or post-filter paging.
    #[must_use]
    pub fn unpaged(&self) -> Self {
        Self {
            top: None,
            skip: None,
            ..self.clone()
        }
    }
}
