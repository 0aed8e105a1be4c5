use super::{align_page, QueryBuilder, QueryContext, SortSpec};
use crate::session::{Param, Params};

/// A literal statement with paging appended.
///
/// The base statement must project the result entities as `n`. Connectives
/// and sort requests have no effect.
#[derive(Debug, Clone)]
pub struct FixedQuery {
    base: String,
    params: Params,
    page: usize,
    fetch_size: usize,
    context: QueryContext,
}

impl FixedQuery {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            params: Params::new(),
            page: 0,
            fetch_size: 1000,
            context: QueryContext::default(),
        }
    }

    pub fn param(mut self, key: &str, value: impl Into<Param>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn with_fetch_size(mut self, fetch_size: usize) -> Self {
        self.fetch_size = fetch_size.max(1);
        self
    }

    pub fn with_context(mut self, context: QueryContext) -> Self {
        self.context = context;
        self
    }
}

impl QueryBuilder for FixedQuery {
    fn statement(&self, paged: bool) -> String {
        if paged {
            format!(
                "{} SKIP {} LIMIT {}",
                self.base,
                self.page * self.fetch_size,
                self.fetch_size
            )
        } else {
            self.base.clone()
        }
    }

    fn parameters(&self) -> &Params {
        &self.params
    }

    fn page(&self) -> usize {
        self.page
    }

    fn page_size(&self) -> usize {
        self.fetch_size
    }

    fn next_page(&mut self) {
        self.page += 1;
    }

    fn paginate(&mut self, size: usize, page: usize) {
        let (fetch_page, skip) = align_page(size, page, self.fetch_size);
        self.page = fetch_page;
        self.context.set_skip(skip);
    }

    fn and(&mut self) -> &mut Self {
        self
    }

    fn or(&mut self) -> &mut Self {
        self
    }

    fn not(&mut self) -> &mut Self {
        self
    }

    fn and_not(&mut self) -> &mut Self {
        self
    }

    fn sort(&mut self, _spec: SortSpec) -> &mut Self {
        self
    }

    fn context(&self) -> &QueryContext {
        &self.context
    }

    fn context_mut(&mut self) -> &mut QueryContext {
        &mut self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paging_appended_to_base() {
        let mut q = FixedQuery::new("MATCH (n:Item) RETURN n ORDER BY ID(n)")
            .param("limit", 3i64)
            .with_fetch_size(50);
        assert_eq!(q.statement(false), "MATCH (n:Item) RETURN n ORDER BY ID(n)");
        q.next_page();
        q.next_page();
        assert_eq!(
            q.statement(true),
            "MATCH (n:Item) RETURN n ORDER BY ID(n) SKIP 100 LIMIT 50"
        );
        assert_eq!(q.parameters().len(), 1);
    }

    #[test]
    fn test_connectives_and_sort_are_ignored() {
        let mut q = FixedQuery::new("MATCH (n) RETURN n");
        q.and().or().not().and_not().sort(SortSpec::new().ascending("name"));
        assert_eq!(q.statement(false), "MATCH (n) RETURN n");
    }
}
