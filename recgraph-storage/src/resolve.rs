//! Link classification.

use recgraph_core::{Entry, Link};

use crate::instrumentation::{Instrumentation, EVENT_DANGLING_REFERENCE};
use crate::store::EntrySource;

/// What a link points at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution<'a> {
    Entry(&'a Entry),
    Pending,
    Missing,
    /// Key with no entry and no placeholder. Never produced by a correct
    /// ingest; traversals treat it as [`Resolution::Missing`].
    Dangling(&'a str),
}

impl Resolution<'_> {
    pub fn is_entry(&self) -> bool {
        matches!(self, Self::Entry(_))
    }
}

/// Classify `link` against `source`.
pub fn resolve_link<'a, S: EntrySource + ?Sized>(source: &'a S, link: &'a Link) -> Resolution<'a> {
    match link {
        Link::Pending => Resolution::Pending,
        Link::Missing => Resolution::Missing,
        Link::Resolved(key) => match source.entry(key) {
            Some(entry) => Resolution::Entry(entry),
            None => Resolution::Dangling(key),
        },
    }
}

/// Resolve for traversal: dangling links are reported and downgraded to missing.
pub fn resolve_for_traversal<'a, S: EntrySource + ?Sized>(
    source: &'a S,
    link: &'a Link,
    instrumentation: &dyn Instrumentation,
) -> Resolution<'a> {
    match resolve_link(source, link) {
        Resolution::Dangling(key) => {
            tracing::warn!(key, "link points at a key with no entry");
            instrumentation.record(EVENT_DANGLING_REFERENCE, &[("key", key)]);
            Resolution::Missing
        }
        other => other,
    }
}
