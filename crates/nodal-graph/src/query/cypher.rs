use nodal_core::{Identity, Value};

use super::{align_page, QueryBuilder, QueryContext, SortSpec};
use crate::entity::quote_identifier;
use crate::session::{Param, Params};

/// List quantifier used for array-membership predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Quantifier {
    Any,
    /// Available on every server version, narrower than `ANY`.
    #[default]
    Single,
}

impl Quantifier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Any => "ANY",
            Self::Single => "SINGLE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Comparison {
    fn operator(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
        }
    }
}

/// Composable Cypher query over nodes bound to `n`.
///
/// Predicates are appended to one buffer in call order. Adjacent predicates
/// without an explicit connective are joined with `AND`.
#[derive(Debug, Clone)]
pub struct CypherQuery {
    buffer: String,
    params: Params,
    labels: Vec<String>,
    sort: SortSpec,
    quantifier: Quantifier,
    page: usize,
    fetch_size: usize,
    context: QueryContext,
}

impl Default for CypherQuery {
    fn default() -> Self {
        Self::new()
    }
}

impl CypherQuery {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            params: Params::new(),
            labels: Vec::new(),
            sort: SortSpec::default(),
            quantifier: Quantifier::default(),
            page: 0,
            fetch_size: 1000,
            context: QueryContext::default(),
        }
    }

    pub fn with_quantifier(mut self, quantifier: Quantifier) -> Self {
        self.quantifier = quantifier;
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

    /// Restrict to nodes carrying `label`. Several labels form a union.
    pub fn label(&mut self, label: &str) -> &mut Self {
        if !self.labels.iter().any(|l| l == label) {
            self.labels.push(label.to_string());
        }
        self
    }

    pub fn begin_group(&mut self) -> &mut Self {
        self.connect();
        self.buffer.push('(');
        self
    }

    /// Close the innermost group. An empty group is removed with its connective.
    pub fn end_group(&mut self) -> &mut Self {
        if self.buffer.ends_with('(') {
            self.buffer.pop();
            for connective in [" AND ", " OR ", " AND NOT ", "NOT "] {
                if let Some(rest) = self.buffer.strip_suffix(connective) {
                    let len = rest.len();
                    self.buffer.truncate(len);
                    break;
                }
            }
        } else {
            self.buffer.push(')');
        }
        self
    }

    pub fn eq(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        self.eq_opt(key, Some(value.into()))
    }

    pub fn ne(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        self.ne_opt(key, Some(value.into()))
    }

    /// Equality; `None` matches a missing property.
    pub fn eq_opt(&mut self, key: &str, value: Option<Value>) -> &mut Self {
        let property = property(key);
        let fragment = match value {
            Some(v) => format!("{property} = ${}", self.bind(v.into())),
            None => format!("{property} IS NULL"),
        };
        self.push(&fragment)
    }

    pub fn ne_opt(&mut self, key: &str, value: Option<Value>) -> &mut Self {
        let property = property(key);
        let fragment = match value {
            Some(v) => format!("{property} <> ${}", self.bind(v.into())),
            None => format!("{property} IS NOT NULL"),
        };
        self.push(&fragment)
    }

    pub fn compare(&mut self, key: &str, comparison: Comparison, value: impl Into<Value>) -> &mut Self {
        let value: Value = value.into();
        let name = self.bind(Param::Value(value));
        let fragment = format!("{} {} ${name}", property(key), comparison.operator());
        self.push(&fragment)
    }

    /// Case-insensitive string equality.
    pub fn eq_ignore_case(&mut self, key: &str, text: &str) -> &mut Self {
        let name = self.bind(Param::from(text.to_lowercase()));
        let fragment = format!("toLower({}) = ${name}", property(key));
        self.push(&fragment)
    }

    pub fn contains(&mut self, key: &str, text: &str, ignore_case: bool) -> &mut Self {
        let fragment = if ignore_case {
            let name = self.bind(Param::from(text.to_lowercase()));
            format!("toLower({}) CONTAINS ${name}", property(key))
        } else {
            let name = self.bind(Param::from(text));
            format!("{} CONTAINS ${name}", property(key))
        };
        self.push(&fragment)
    }

    pub fn exists(&mut self, key: &str) -> &mut Self {
        self.ne_opt(key, None)
    }

    /// The property equals one of `values`.
    pub fn in_list(&mut self, key: &str, values: Vec<Value>) -> &mut Self {
        let name = self.bind(Param::List(values.into_iter().map(Param::Value).collect()));
        let fragment = format!("{} IN ${name}", property(key));
        self.push(&fragment)
    }

    /// The array property holds an element from `values`.
    pub fn array_contains(&mut self, key: &str, values: Vec<Value>) -> &mut Self {
        let name = self.bind(Param::List(values.into_iter().map(Param::Value).collect()));
        let fragment = format!(
            "{}(x IN {} WHERE x IN ${name})",
            self.quantifier.as_str(),
            property(key)
        );
        self.push(&fragment)
    }

    /// Bounded range; a `None` end is open.
    pub fn range(
        &mut self,
        key: &str,
        from: Option<Value>,
        to: Option<Value>,
        include_from: bool,
        include_to: bool,
    ) -> &mut Self {
        let property = property(key);
        let lower = from.map(|v| {
            let op = if include_from { ">=" } else { ">" };
            format!("{property} {op} ${}", self.bind(v.into()))
        });
        let upper = to.map(|v| {
            let op = if include_to { "<=" } else { "<" };
            format!("{property} {op} ${}", self.bind(v.into()))
        });
        match (lower, upper) {
            (Some(lower), Some(upper)) => self.push(&format!("({lower} AND {upper})")),
            (Some(bound), None) | (None, Some(bound)) => self.push(&bound),
            (None, None) => self,
        }
    }

    /// Match by database identity.
    pub fn ids(&mut self, identities: &[Identity]) -> &mut Self {
        let name = self.bind(Param::from(identities.to_vec()));
        self.push(&format!("ID(n) IN ${name}"))
    }

    fn bind(&mut self, param: Param) -> String {
        let name = format!("param{}", self.params.len());
        self.params.insert(name.clone(), param);
        name
    }

    fn needs_connective(&self) -> bool {
        !self.buffer.is_empty() && !self.buffer.ends_with('(') && !self.buffer.ends_with(' ')
    }

    fn connect(&mut self) {
        if self.needs_connective() {
            self.buffer.push_str(" AND ");
        }
    }

    fn push(&mut self, fragment: &str) -> &mut Self {
        self.connect();
        self.buffer.push_str(fragment);
        self
    }

    fn projection(&self) -> String {
        let mut projection = String::from("n");
        for (i, key) in self.sort.keys().iter().enumerate() {
            projection.push_str(&format!(", {} AS sortKey{i}", property(&key.property)));
        }
        projection
    }

    fn order_by(&self, paged: bool) -> String {
        if self.sort.is_empty() && !paged {
            return String::new();
        }
        let mut keys: Vec<String> = self
            .sort
            .keys()
            .iter()
            .enumerate()
            .map(|(i, key)| {
                if key.descending {
                    format!("sortKey{i} DESC")
                } else {
                    format!("sortKey{i}")
                }
            })
            .collect();
        keys.push("ID(n)".to_string());
        format!(" ORDER BY {}", keys.join(", "))
    }
}

fn property(key: &str) -> String {
    format!("n.{}", quote_identifier(key))
}

impl QueryBuilder for CypherQuery {
    fn statement(&self, paged: bool) -> String {
        let filter = if self.buffer.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.buffer)
        };
        let projection = self.projection();
        let order = self.order_by(paged);
        let paging = if paged {
            format!(" SKIP {} LIMIT {}", self.page * self.fetch_size, self.fetch_size)
        } else {
            String::new()
        };

        match self.labels.as_slice() {
            [] => format!("MATCH (n){filter} RETURN DISTINCT {projection}{order}{paging}"),
            [label] => format!(
                "MATCH (n:{}){filter} RETURN DISTINCT {projection}{order}{paging}",
                quote_identifier(label)
            ),
            labels => {
                let branches: Vec<String> = labels
                    .iter()
                    .map(|label| {
                        format!(
                            "MATCH (n:{}){filter} RETURN {projection}",
                            quote_identifier(label)
                        )
                    })
                    .collect();
                let columns: Vec<String> = std::iter::once("n".to_string())
                    .chain((0..self.sort.keys().len()).map(|i| format!("sortKey{i}")))
                    .collect();
                format!(
                    "CALL {{ {} }} RETURN {}{order}{paging}",
                    branches.join(" UNION "),
                    columns.join(", ")
                )
            }
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
        if self.needs_connective() {
            self.buffer.push_str(" AND ");
        }
        self
    }

    fn or(&mut self) -> &mut Self {
        if self.needs_connective() {
            self.buffer.push_str(" OR ");
        }
        self
    }

    fn not(&mut self) -> &mut Self {
        self.connect();
        self.buffer.push_str("NOT ");
        self
    }

    fn and_not(&mut self) -> &mut Self {
        self.not()
    }

    fn sort(&mut self, spec: SortSpec) -> &mut Self {
        self.sort = spec;
        self
    }

    fn context(&self) -> &QueryContext {
        &self.context
    }

    fn context_mut(&mut self) -> &mut QueryContext {
        &mut self.context
    }
}
