//! Input validation and safety limits for query parsing
//!
//! Caps applied by the query-string parser:
//! - Maximum `$filter` expression length
//! - Maximum number of `$orderby` fields
//! - Maximum number of `$select` fields
//! - Optional maximum `$top` value
//!
//! It also carries `strict_expand`, which turns unknown `$expand` names into
//! errors instead of silently skipping them.

use serde::{Deserialize, Serialize};

use crate::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryLimits {
    /// Maximum length of $filter expression in characters (default: 2000)
    pub max_filter_length: usize,
    /// Maximum number of fields in $orderby (default: 5)
    pub max_orderby_fields: usize,
    /// Maximum number of fields in $select (default: 100)
    pub max_select_fields: usize,
    /// Maximum value for $top (default: no cap)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_top: Option<u64>,
    /// Reject unknown navigation names in $expand (default: false)
    pub strict_expand: bool,
}

impl QueryLimits {
    pub const DEFAULT: Self = Self {
        max_filter_length: 2000,
        max_orderby_fields: 5,
        max_select_fields: 100,
        max_top: None,
        strict_expand: false,
    };

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_top(mut self, max_top: u64) -> Self {
        self.max_top = Some(max_top);
        self
    }

    #[must_use]
    pub fn with_max_orderby_fields(mut self, max: usize) -> Self {
        self.max_orderby_fields = max;
        self
    }

    #[must_use]
    pub fn with_max_filter_length(mut self, max: usize) -> Self {
        self.max_filter_length = max;
        self
    }

    #[must_use]
    pub fn with_max_select_fields(mut self, max: usize) -> Self {
        self.max_select_fields = max;
        self
    }

    #[must_use]
    pub fn with_strict_expand(mut self, strict: bool) -> Self {
        self.strict_expand = strict;
        self
    }

    /// Validate a $top value against limits
    ///
    /// # Errors
    /// Returns `Error::InvalidPaging` if `top` exceeds the cap.
    pub fn validate_top(&self, top: u64) -> Result<(), Error> {
        match self.max_top {
            Some(max) if top > max => Err(Error::InvalidPaging {
                option: "$top",
                text: top.to_string(),
                reason: format!("exceeds maximum of {max}"),
            }),
            _ => Ok(()),
        }
    }

    /// Validate a $filter expression length
    ///
    /// # Errors
    /// Returns `Error::FilterParse` if the expression is too long.
    pub fn validate_filter(&self, filter: &str) -> Result<(), Error> {
        if filter.len() > self.max_filter_length {
            return Err(Error::FilterParse {
                text: filter.to_owned(),
                reason: format!(
                    "filter expression exceeds maximum length of {} characters",
                    self.max_filter_length
                ),
            });
        }
        Ok(())
    }

    /// Validate number of $orderby fields
    ///
    /// # Errors
    /// Returns `Error::InvalidOrderBy` if there are too many keys.
    pub fn validate_orderby(&self, raw: &str, count: usize) -> Result<(), Error> {
        if count > self.max_orderby_fields {
            return Err(Error::InvalidOrderBy {
                text: raw.to_owned(),
                reason: format!("too many orderby fields (max: {})", self.max_orderby_fields),
            });
        }
        Ok(())
    }

    /// Validate number of $select fields
    ///
    /// # Errors
    /// Returns `Error::InvalidSelect` if there are too many fields.
    pub fn validate_select(&self, raw: &str, count: usize) -> Result<(), Error> {
        if count > self.max_select_fields {
            return Err(Error::InvalidSelect {
                text: raw.to_owned(),
                reason: format!("too many select fields (max: {})", self.max_select_fields),
            });
        }
        Ok(())
    }
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self::DEFAULT
    }
}
