//! Query descriptors
//!
//! A `QueryDescriptor` describes one read request: table, projection,
//! equality / in-set filters, an optional location filter, an optional text
//! search, ordering and pagination. Descriptors are plain values; handles
//! compare them by value to decide whether a refetch is needed.
//!
//! The same descriptor is evaluated in memory (`matches`, `apply`) and
//! encoded to / decoded from REST query parameters, so the in-memory backend,
//! the HTTP client and the development server agree on semantics.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RemoteError, RemoteResult};
use crate::models::{Row, RowId, ID_FIELD};

/// Condition on one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// Field equals the value
    Eq(Value),

    /// Field equals one of the values
    In(Vec<Value>),
}

impl Filter {
    /// Check a field value against the condition
    pub fn accepts(&self, value: Option<&Value>) -> bool {
        let Some(value) = value else {
            return matches!(self, Filter::Eq(Value::Null));
        };
        match self {
            Filter::Eq(expected) => values_equal(value, expected),
            Filter::In(candidates) => candidates.iter().any(|c| values_equal(value, c)),
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Smallest first
    Asc,
    /// Largest first
    Desc,
}

/// Ordering of results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    /// Field to sort on
    pub field: String,

    /// Direction
    pub direction: Direction,
}

/// Location filter applied to vendor-scoped listings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoFilter {
    /// City equality
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,

    /// State equality
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// Postal code equality
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pincode: Option<String>,
}

impl GeoFilter {
    /// Filter by city
    pub fn city(city: impl Into<String>) -> Self {
        GeoFilter {
            city: Some(city.into()),
            ..Default::default()
        }
    }

    /// Filter by postal code
    pub fn pincode(pincode: impl Into<String>) -> Self {
        GeoFilter {
            pincode: Some(pincode.into()),
            ..Default::default()
        }
    }

    /// Equality filters this location expands to
    pub fn filters(&self) -> Vec<(&'static str, &str)> {
        let mut filters = Vec::new();
        if let Some(city) = &self.city {
            filters.push(("city", city.as_str()));
        }
        if let Some(state) = &self.state {
            filters.push(("state", state.as_str()));
        }
        if let Some(pincode) = &self.pincode {
            filters.push(("pincode", pincode.as_str()));
        }
        filters
    }

    /// Whether no component is set
    pub fn is_empty(&self) -> bool {
        self.city.is_none() && self.state.is_none() && self.pincode.is_none()
    }
}

/// Case-insensitive substring search over several fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSearch {
    /// Text to look for
    pub query: String,

    /// Fields searched; a row matches when any of them contains the text
    pub fields: Vec<String>,
}

impl TextSearch {
    /// Whether the search constrains anything.
    ///
    /// A blank query matches every row.
    pub fn is_active(&self) -> bool {
        !self.query.trim().is_empty() && !self.fields.is_empty()
    }

    fn matches(&self, row: &Row) -> bool {
        if !self.is_active() {
            return true;
        }
        let needle = self.query.trim().to_lowercase();
        self.fields.iter().any(|field| {
            row.field_text(field)
                .map(|text| text.to_lowercase().contains(&needle))
                .unwrap_or(false)
        })
    }
}

/// One read request against one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    /// Table name
    pub table: String,

    /// Projected fields; empty selects every field
    #[serde(default)]
    pub select: Vec<String>,

    /// Field filters
    #[serde(default)]
    pub filters: BTreeMap<String, Filter>,

    /// Location filter
    #[serde(default)]
    pub geo: Option<GeoFilter>,

    /// Text search
    #[serde(default)]
    pub search: Option<TextSearch>,

    /// Ordering
    #[serde(default)]
    pub order: Option<OrderBy>,

    /// Page size
    #[serde(default)]
    pub limit: Option<usize>,

    /// Rows to skip
    #[serde(default)]
    pub offset: Option<usize>,
}

impl QueryDescriptor {
    /// Select everything from a table
    pub fn new(table: impl Into<String>) -> Self {
        QueryDescriptor {
            table: table.into(),
            select: Vec::new(),
            filters: BTreeMap::new(),
            geo: None,
            search: None,
            order: None,
            limit: None,
            offset: None,
        }
    }

    /// Restrict the projection
    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Require `field == value`
    pub fn filter_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(field.into(), Filter::Eq(value.into()));
        self
    }

    /// Require `field` to be one of `values`
    pub fn filter_in<I, V>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.filters.insert(field.into(), Filter::In(values));
        self
    }

    /// Apply a location filter
    pub fn near(mut self, geo: GeoFilter) -> Self {
        self.geo = if geo.is_empty() { None } else { Some(geo) };
        self
    }

    /// Search `fields` for `query`
    pub fn search<I, S>(mut self, query: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.search = Some(TextSearch {
            query: query.into(),
            fields: fields.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Order by a field
    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    /// Limit the page size
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip rows
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Identifier targeted by an `id` equality filter, if any
    pub fn target_id(&self) -> Option<RowId> {
        match self.filters.get(ID_FIELD)? {
            Filter::Eq(Value::String(id)) => Some(RowId::new(id.clone())),
            Filter::Eq(Value::Number(n)) => Some(RowId::new(n.to_string())),
            _ => None,
        }
    }

    /// Field filters with the location filter folded in
    pub fn effective_filters(&self) -> BTreeMap<String, Filter> {
        let mut filters = self.filters.clone();
        if let Some(geo) = &self.geo {
            for (field, value) in geo.filters() {
                filters.insert(field.to_string(), Filter::Eq(Value::from(value)));
            }
        }
        filters
    }

    /// Whether a row satisfies filters, location and search
    pub fn matches(&self, row: &Row) -> bool {
        let filters_pass = self.effective_filters().iter().all(|(field, filter)| {
            if field == ID_FIELD {
                filter.accepts(Some(&Value::String(row.id.to_string())))
            } else {
                filter.accepts(row.get(field))
            }
        });
        filters_pass && self.search.as_ref().map_or(true, |s| s.matches(row))
    }

    /// Evaluate the descriptor over rows in storage order
    pub fn apply<'a, I>(&self, rows: I) -> Vec<Row>
    where
        I: IntoIterator<Item = &'a Row>,
    {
        let mut selected: Vec<&Row> = rows.into_iter().filter(|row| self.matches(row)).collect();

        if let Some(order) = &self.order {
            selected.sort_by(|a, b| compare_field(a, b, order));
        }

        selected
            .into_iter()
            .skip(self.offset.unwrap_or(0))
            .take(self.limit.unwrap_or(usize::MAX))
            .map(|row| row.project(&self.select))
            .collect()
    }

    /// Encode as REST query parameters
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();

        let select = if self.select.is_empty() {
            "*".to_string()
        } else {
            self.select.join(",")
        };
        pairs.push(("select".to_string(), select));

        for (field, filter) in self.effective_filters() {
            pairs.push((field, encode_filter(&filter)));
        }

        if let Some(search) = self.search.as_ref().filter(|s| s.is_active()) {
            let pattern = format!("*{}*", search.query.trim());
            let conditions: Vec<String> = search
                .fields
                .iter()
                .map(|field| format!("{}.ilike.{}", field, quote_item(&pattern)))
                .collect();
            pairs.push(("or".to_string(), format!("({})", conditions.join(","))));
        }

        if let Some(order) = &self.order {
            let direction = match order.direction {
                Direction::Asc => "asc",
                Direction::Desc => "desc",
            };
            pairs.push(("order".to_string(), format!("{}.{}", order.field, direction)));
        }

        if let Some(limit) = self.limit {
            pairs.push(("limit".to_string(), limit.to_string()));
        }
        if let Some(offset) = self.offset {
            pairs.push(("offset".to_string(), offset.to_string()));
        }

        pairs
    }

    /// Decode REST query parameters.
    ///
    /// Location filters come back as plain equality filters and filter
    /// values come back as text; `matches` compares them loosely so the
    /// decoded descriptor selects the same rows.
    pub fn from_query_pairs<I, K, V>(table: impl Into<String>, pairs: I) -> RemoteResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut descriptor = QueryDescriptor::new(table);

        for (key, value) in pairs {
            let (key, value) = (key.as_ref(), value.as_ref());
            match key {
                "select" => {
                    descriptor.select = value
                        .split(',')
                        .map(str::trim)
                        .filter(|f| !f.is_empty() && *f != "*")
                        .map(str::to_string)
                        .collect();
                }
                "order" => {
                    let (field, direction) = match value.rsplit_once('.') {
                        Some((field, "asc")) => (field, Direction::Asc),
                        Some((field, "desc")) => (field, Direction::Desc),
                        _ => (value, Direction::Asc),
                    };
                    descriptor.order = Some(OrderBy {
                        field: field.to_string(),
                        direction,
                    });
                }
                "limit" => descriptor.limit = Some(parse_count("limit", value)?),
                "offset" => descriptor.offset = Some(parse_count("offset", value)?),
                "or" => descriptor.search = Some(decode_search(value)?),
                field => {
                    descriptor
                        .filters
                        .insert(field.to_string(), decode_filter(value)?);
                }
            }
        }

        Ok(descriptor)
    }
}

/// Encode a filter as a REST operator expression
pub fn encode_filter(filter: &Filter) -> String {
    match filter {
        Filter::Eq(value) => format!("eq.{}", value_text(value)),
        Filter::In(values) => {
            let items: Vec<String> = values.iter().map(|v| quote_item(&value_text(v))).collect();
            format!("in.({})", items.join(","))
        }
    }
}

/// Decode a REST operator expression
pub fn decode_filter(expr: &str) -> RemoteResult<Filter> {
    if let Some(value) = expr.strip_prefix("eq.") {
        return Ok(Filter::Eq(Value::String(value.to_string())));
    }
    if let Some(list) = expr.strip_prefix("in.") {
        let inner = list
            .strip_prefix('(')
            .and_then(|l| l.strip_suffix(')'))
            .ok_or_else(|| RemoteError::Validation(format!("malformed list filter: {}", expr)))?;
        let values = split_list(inner)?
            .into_iter()
            .map(Value::String)
            .collect();
        return Ok(Filter::In(values));
    }
    Err(RemoteError::Validation(format!("unsupported filter: {}", expr)))
}

fn decode_search(expr: &str) -> RemoteResult<TextSearch> {
    let inner = expr
        .strip_prefix('(')
        .and_then(|e| e.strip_suffix(')'))
        .ok_or_else(|| RemoteError::Validation(format!("malformed search: {}", expr)))?;

    let mut query = String::new();
    let mut fields = Vec::new();
    for condition in split_list(inner)? {
        let (field, pattern) = condition
            .split_once(".ilike.")
            .ok_or_else(|| RemoteError::Validation(format!("unsupported search condition: {}", condition)))?;
        let unquoted = unquote(pattern);
        let inner = unquoted.strip_prefix('*').unwrap_or(&unquoted);
        query = inner.strip_suffix('*').unwrap_or(inner).to_string();
        fields.push(field.to_string());
    }

    Ok(TextSearch { query, fields })
}

fn parse_count(name: &str, value: &str) -> RemoteResult<usize> {
    value
        .parse()
        .map_err(|_| RemoteError::Validation(format!("{} must be a non-negative integer", name)))
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn quote_item(item: &str) -> String {
    if item.contains(&[',', '(', ')', '"', '\\'][..]) {
        let escaped = item.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{}\"", escaped)
    } else {
        item.to_string()
    }
}

fn unquote(item: &str) -> String {
    match item.strip_prefix('"').and_then(|i| i.strip_suffix('"')) {
        Some(inner) => inner.replace("\\\"", "\"").replace("\\\\", "\\"),
        None => item.to_string(),
    }
}

// Split a comma list, honouring double quotes and nested parentheses.
fn split_list(list: &str) -> RemoteResult<Vec<String>> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut depth = 0usize;

    for c in list.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => {
                current.push(c);
                escaped = true;
            }
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '(' if !in_quotes => {
                depth += 1;
                current.push(c);
            }
            ')' if !in_quotes => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if !in_quotes && depth == 0 => {
                items.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }

    if in_quotes {
        return Err(RemoteError::Validation(format!("unterminated quote in: {}", list)));
    }
    if !current.is_empty() || !items.is_empty() {
        items.push(current);
    }

    Ok(items
        .into_iter()
        .map(|item| match item.split_once(".ilike.") {
            Some((field, pattern)) => format!("{}.ilike.{}", field, pattern),
            None => unquote(&item),
        })
        .collect())
}

/// Equality used by filters.
///
/// Two strings compare exactly. A number matches wire text only when the
/// text parses to the same number; other mixed pairs compare by their text
/// rendering (`true` against `"true"`).
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => {
            x == y || matches!((x.as_f64(), y.as_f64()), (Some(x), Some(y)) if x == y)
        }
        (Value::Number(n), Value::String(text)) | (Value::String(text), Value::Number(n)) => {
            match (n.as_f64(), text.trim().parse::<f64>()) {
                (Some(x), Ok(y)) => x == y,
                _ => false,
            }
        }
        _ => a == b || value_text(a) == value_text(b),
    }
}

fn compare_field(a: &Row, b: &Row, order: &OrderBy) -> CmpOrdering {
    let ordering = if order.field == ID_FIELD {
        a.id.cmp(&b.id)
    } else {
        let va = a.get(&order.field).filter(|v| !v.is_null());
        let vb = b.get(&order.field).filter(|v| !v.is_null());
        match (va, vb) {
            // Missing and null values sort last in both directions.
            (None, None) => return CmpOrdering::Equal,
            (None, Some(_)) => return CmpOrdering::Greater,
            (Some(_), None) => return CmpOrdering::Less,
            (Some(x), Some(y)) => compare_values(x, y),
        }
    };
    match order.direction {
        Direction::Asc => ordering,
        Direction::Desc => ordering.reverse(),
    }
}

fn compare_values(a: &Value, b: &Value) -> CmpOrdering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(CmpOrdering::Equal)
        }
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (x, y) => value_text(x).cmp(&value_text(y)),
    }
}
