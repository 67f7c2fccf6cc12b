use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Provenance span of an item: source name plus byte range, `-1` meaning unknown.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub source: Option<Arc<str>>,
    pub start: i64,
    pub end: i64,
}

impl SourceLocation {
    pub fn new(source: impl Into<Arc<str>>, start: usize, end: usize) -> Self {
        Self {
            source: Some(source.into()),
            start: start as i64,
            end: end as i64,
        }
    }

    pub const fn unknown() -> Self {
        Self {
            source: None,
            start: -1,
            end: -1,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.source.is_some() || self.start != -1 || self.end != -1
    }

    pub fn has_text(&self) -> bool {
        self.source.is_some() && self.start >= 0 && self.end >= self.start
    }

    pub fn source_name(&self) -> Option<&str> {
        self.source.as_deref()
    }
}

impl Default for SourceLocation {
    fn default() -> Self {
        Self::unknown()
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(source) = &self.source {
            write!(f, "\"{source}\"")?;
        }
        if self.has_text() {
            write!(f, ":{}:{}", self.start, self.end)?;
        }
        Ok(())
    }
}
