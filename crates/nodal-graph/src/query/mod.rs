//! Query builders.
//!
//! A builder accumulates predicates, sort keys, and paging state for one
//! query and renders a Cypher statement whose single projected column `n`
//! holds the matching entities.

mod cypher;
mod fixed;

pub use cypher::{Comparison, CypherQuery, Quantifier};
pub use fixed::FixedQuery;

use crate::session::{Params, Statement};

/// Per-query execution context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryContext {
    superuser: bool,
    skip_more: usize,
    skipped: usize,
}

impl QueryContext {
    pub fn superuser() -> Self {
        Self {
            superuser: true,
            ..Self::default()
        }
    }

    pub fn is_superuser(&self) -> bool {
        self.superuser
    }

    /// Rows still to drop from the front of the next fetched page.
    pub fn skip_more(&self) -> usize {
        self.skip_more
    }

    pub fn set_skip(&mut self, rows: usize) {
        self.skip_more = rows;
        self.skipped = 0;
    }

    /// Consume one row of the pending skip. Returns true if the row is dropped.
    pub fn consume_skip(&mut self) -> bool {
        if self.skip_more == 0 {
            return false;
        }
        self.skip_more -= 1;
        self.skipped += 1;
        true
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub property: String,
    pub descending: bool,
}

/// Ordered sort keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortSpec {
    keys: Vec<SortKey>,
}

impl SortSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ascending(mut self, property: &str) -> Self {
        self.keys.push(SortKey {
            property: property.to_string(),
            descending: false,
        });
        self
    }

    pub fn descending(mut self, property: &str) -> Self {
        self.keys.push(SortKey {
            property: property.to_string(),
            descending: true,
        });
        self
    }

    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Map a caller's `(size, page)` onto fetch-size pages.
///
/// Returns the fetch page holding the first requested row and how many rows
/// of that page precede it.
pub fn align_page(size: usize, page: usize, fetch_size: usize) -> (usize, usize) {
    let offset = size.saturating_mul(page);
    let fetch_size = fetch_size.max(1);
    (offset / fetch_size, offset % fetch_size)
}

/// A buildable, pageable query.
pub trait QueryBuilder {
    /// Statement text; `paged` appends `SKIP`/`LIMIT` for the current page.
    fn statement(&self, paged: bool) -> String;

    fn parameters(&self) -> &Params;

    fn page(&self) -> usize;

    fn page_size(&self) -> usize;

    fn next_page(&mut self);

    /// Position on the fetch page holding row `size * page` and arm the skip.
    fn paginate(&mut self, size: usize, page: usize);

    fn and(&mut self) -> &mut Self;

    fn or(&mut self) -> &mut Self;

    fn not(&mut self) -> &mut Self;

    fn and_not(&mut self) -> &mut Self;

    fn sort(&mut self, spec: SortSpec) -> &mut Self;

    fn context(&self) -> &QueryContext;

    fn context_mut(&mut self) -> &mut QueryContext;

    fn to_statement(&self, paged: bool) -> Statement {
        Statement::new("query", self.statement(paged))
            .with_params(self.parameters().clone())
            .returns(["n"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_page() {
        assert_eq!(align_page(10, 0, 1000), (0, 0));
        assert_eq!(align_page(10, 3, 25), (1, 5));
        assert_eq!(align_page(7, 2, 7), (2, 0));
        assert_eq!(align_page(5, 1, 0), (5, 0));
    }

    #[test]
    fn test_consume_skip() {
        let mut ctx = QueryContext::default();
        ctx.set_skip(2);
        assert!(ctx.consume_skip());
        assert!(ctx.consume_skip());
        assert!(!ctx.consume_skip());
        assert_eq!(ctx.skipped(), 2);
        assert_eq!(ctx.skip_more(), 0);
        assert!(QueryContext::superuser().is_superuser());
    }
}
