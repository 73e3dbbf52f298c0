//! Query expressions and their evaluators.
//!
//! A query names an operator (`findRecord`, `findRecords`, ...) and its
//! parameters. The cache looks the operator up in a [`QueryOperators`] table
//! and runs it synchronously against current state. Evaluators never mutate.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{cache::CacheState, error::Result, Error, Record, RecordIdentity};

/// A query against the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum QueryExpression {
    /// A single record by identity
    FindRecord { record: RecordIdentity },
    /// Every record of a model, optionally filtered, sorted and paged
    FindRecords {
        #[serde(rename = "type")]
        record_type: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        filter: Vec<FilterSpecifier>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        sort: Vec<SortSpecifier>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        page: Option<PageSpecifier>,
    },
    /// Target of a to-one relationship
    FindRelatedRecord {
        record: RecordIdentity,
        relationship: String,
    },
    /// Members of a to-many relationship
    FindRelatedRecords {
        record: RecordIdentity,
        relationship: String,
    },
}

impl QueryExpression {
    pub fn find_record(record: impl Into<RecordIdentity>) -> Self {
        QueryExpression::FindRecord {
            record: record.into(),
        }
    }

    pub fn find_records(record_type: impl Into<String>) -> Self {
        QueryExpression::FindRecords {
            record_type: record_type.into(),
            filter: Vec::new(),
            sort: Vec::new(),
            page: None,
        }
    }

    pub fn find_related_record(
        record: impl Into<RecordIdentity>,
        relationship: impl Into<String>,
    ) -> Self {
        QueryExpression::FindRelatedRecord {
            record: record.into(),
            relationship: relationship.into(),
        }
    }

    pub fn find_related_records(
        record: impl Into<RecordIdentity>,
        relationship: impl Into<String>,
    ) -> Self {
        QueryExpression::FindRelatedRecords {
            record: record.into(),
            relationship: relationship.into(),
        }
    }

    /// Builder-style method to add a filter to `findRecords`.
    pub fn filter(mut self, specifier: FilterSpecifier) -> Self {
        if let QueryExpression::FindRecords { filter, .. } = &mut self {
            filter.push(specifier);
        }
        self
    }

    /// Builder-style method to add a sort key to `findRecords`.
    pub fn sort(mut self, specifier: SortSpecifier) -> Self {
        if let QueryExpression::FindRecords { sort, .. } = &mut self {
            sort.push(specifier);
        }
        self
    }

    /// Builder-style method to page `findRecords`.
    pub fn page(mut self, offset: usize, limit: Option<usize>) -> Self {
        if let QueryExpression::FindRecords { page, .. } = &mut self {
            *page = Some(PageSpecifier { offset, limit });
        }
        self
    }

    /// Operator name used for evaluator lookup.
    pub fn op_name(&self) -> &'static str {
        match self {
            QueryExpression::FindRecord { .. } => "findRecord",
            QueryExpression::FindRecords { .. } => "findRecords",
            QueryExpression::FindRelatedRecord { .. } => "findRelatedRecord",
            QueryExpression::FindRelatedRecords { .. } => "findRelatedRecords",
        }
    }

    /// Parse a JSON query `{ "op": ..., ...params }`.
    ///
    /// An `op` with no matching expression is reported as an unknown
    /// operator rather than a parse failure.
    pub fn from_json(value: Value) -> Result<Self> {
        let op = value
            .get("op")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidQuery("missing 'op'".into()))?
            .to_string();

        if !BUILT_IN_OPERATORS.contains(&op.as_str()) {
            return Err(Error::UnknownQueryOperator(op));
        }
        serde_json::from_value(value).map_err(|e| Error::InvalidQuery(e.to_string()))
    }
}

const BUILT_IN_OPERATORS: [&str; 4] = [
    "findRecord",
    "findRecords",
    "findRelatedRecord",
    "findRelatedRecords",
];

/// Comparison applied by an attribute filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueComparison {
    Equal,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// Comparison applied by a to-many filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetComparison {
    /// Exactly these members
    Equal,
    /// At least these members
    All,
    /// Any of these members
    Some,
    /// None of these members
    None,
}

/// A `findRecords` filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FilterSpecifier {
    Attribute {
        attribute: String,
        op: ValueComparison,
        value: Value,
    },
    /// Matches records whose to-one relationship equals `record`
    RelatedRecord {
        relationship: String,
        record: Option<RecordIdentity>,
    },
    RelatedRecords {
        relationship: String,
        op: SetComparison,
        records: Vec<RecordIdentity>,
    },
}

impl FilterSpecifier {
    pub fn attribute(attribute: impl Into<String>, op: ValueComparison, value: Value) -> Self {
        FilterSpecifier::Attribute {
            attribute: attribute.into(),
            op,
            value,
        }
    }

    pub fn related_record(relationship: impl Into<String>, record: Option<RecordIdentity>) -> Self {
        FilterSpecifier::RelatedRecord {
            relationship: relationship.into(),
            record,
        }
    }

    pub fn related_records(
        relationship: impl Into<String>,
        op: SetComparison,
        records: impl IntoIterator<Item = RecordIdentity>,
    ) -> Self {
        FilterSpecifier::RelatedRecords {
            relationship: relationship.into(),
            op,
            records: records.into_iter().collect(),
        }
    }

    fn matches(&self, record: &Record) -> bool {
        match self {
            FilterSpecifier::Attribute {
                attribute,
                op,
                value,
            } => {
                let Some(actual) = record.attribute(attribute) else {
                    return false;
                };
                let ordering = compare_values(actual, value);
                match op {
                    ValueComparison::Equal => actual == value,
                    ValueComparison::Gt => ordering == Some(Ordering::Greater),
                    ValueComparison::Gte => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
                    ValueComparison::Lt => ordering == Some(Ordering::Less),
                    ValueComparison::Lte => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
                }
            }

            FilterSpecifier::RelatedRecord {
                relationship,
                record: expected,
            } => record.related_record(relationship) == expected.as_ref(),

            FilterSpecifier::RelatedRecords {
                relationship,
                op,
                records,
            } => {
                let actual = record.related_records(relationship);
                match op {
                    SetComparison::Equal => {
                        actual.len() == records.len() && records.iter().all(|r| actual.contains(r))
                    }
                    SetComparison::All => records.iter().all(|r| actual.contains(r)),
                    SetComparison::Some => records.iter().any(|r| actual.contains(r)),
                    SetComparison::None => !records.iter().any(|r| actual.contains(r)),
                }
            }
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// A `findRecords` sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpecifier {
    pub attribute: String,
    #[serde(default)]
    pub order: SortOrder,
}

impl SortSpecifier {
    pub fn ascending(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            order: SortOrder::Ascending,
        }
    }

    pub fn descending(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            order: SortOrder::Descending,
        }
    }

    /// Missing values order before present ones.
    fn compare(&self, a: &Record, b: &Record) -> Ordering {
        let ordering = match (a.attribute(&self.attribute), b.attribute(&self.attribute)) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => compare_values(a, b).unwrap_or(Ordering::Equal),
        };
        match self.order {
            SortOrder::Ascending => ordering,
            SortOrder::Descending => ordering.reverse(),
        }
    }
}

/// A `findRecords` page window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSpecifier {
    #[serde(default)]
    pub offset: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Result of evaluating a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryResult {
    One(Option<Record>),
    Many(Vec<Record>),
}

impl QueryResult {
    /// The single record, if this is a single-record result.
    pub fn into_record(self) -> Option<Record> {
        match self {
            QueryResult::One(record) => record,
            QueryResult::Many(_) => None,
        }
    }

    /// The records of a many-record result; a single result yields at most one.
    pub fn into_records(self) -> Vec<Record> {
        match self {
            QueryResult::One(record) => record.into_iter().collect(),
            QueryResult::Many(records) => records,
        }
    }
}

/// Evaluates one query operator.
pub type QueryEvaluator = fn(&CacheState, &QueryExpression) -> Result<QueryResult>;

/// Operator name to evaluator table.
#[derive(Debug, Clone)]
pub struct QueryOperators {
    evaluators: HashMap<String, QueryEvaluator>,
}

impl QueryOperators {
    /// An empty table; every query fails until evaluators are registered.
    pub fn empty() -> Self {
        Self {
            evaluators: HashMap::new(),
        }
    }

    /// Builder-style method to replace the evaluator for a built-in operator.
    ///
    /// [`QueryExpression`] is closed over `findRecord`, `findRecords`,
    /// `findRelatedRecord` and `findRelatedRecords`, so only those names are
    /// ever looked up. An evaluator registered under any other name is never
    /// reached.
    pub fn with(mut self, op: impl Into<String>, evaluator: QueryEvaluator) -> Self {
        self.evaluators.insert(op.into(), evaluator);
        self
    }

    /// Unregister an evaluator.
    pub fn remove(&mut self, op: &str) -> Option<QueryEvaluator> {
        self.evaluators.remove(op)
    }

    /// Look up the evaluator for `expression` and run it.
    pub fn evaluate(&self, state: &CacheState, expression: &QueryExpression) -> Result<QueryResult> {
        let op = expression.op_name();
        let evaluator = self
            .evaluators
            .get(op)
            .ok_or_else(|| Error::UnknownQueryOperator(op.to_string()))?;
        evaluator(state, expression)
    }
}

impl Default for QueryOperators {
    fn default() -> Self {
        Self::empty()
            .with("findRecord", find_record)
            .with("findRecords", find_records)
            .with("findRelatedRecord", find_related_record)
            .with("findRelatedRecords", find_related_records)
    }
}

fn not_found(identity: &RecordIdentity) -> Error {
    Error::RecordNotFound {
        record_type: identity.record_type.clone(),
        id: identity.id.clone(),
    }
}

fn owner<'a>(state: &'a CacheState, identity: &RecordIdentity) -> Result<&'a Record> {
    state
        .current(&identity.record_type, &identity.id)?
        .ok_or_else(|| not_found(identity))
}

fn mismatched(expression: &QueryExpression, expected: &str) -> Error {
    Error::InvalidQuery(format!(
        "evaluator for '{}' received '{}'",
        expected,
        expression.op_name()
    ))
}

/// `findRecord`: the record or `RecordNotFound`.
pub fn find_record(state: &CacheState, expression: &QueryExpression) -> Result<QueryResult> {
    let QueryExpression::FindRecord { record } = expression else {
        return Err(mismatched(expression, "findRecord"));
    };
    Ok(QueryResult::One(Some(owner(state, record)?.clone())))
}

/// `findRecords`: filtered, sorted and paged records of one model.
///
/// Records are ordered by id before sort keys apply, so results are stable.
pub fn find_records(state: &CacheState, expression: &QueryExpression) -> Result<QueryResult> {
    let QueryExpression::FindRecords {
        record_type,
        filter,
        sort,
        page,
    } = expression
    else {
        return Err(mismatched(expression, "findRecords"));
    };

    let mut records: Vec<&Record> = state
        .records(record_type)?
        .values()
        .filter(|record| filter.iter().all(|f| f.matches(record)))
        .collect();

    records.sort_by(|a, b| a.id.cmp(&b.id));
    for key in sort.iter().rev() {
        records.sort_by(|a, b| key.compare(a, b));
    }

    let (offset, limit) = page
        .map(|p| (p.offset, p.limit.unwrap_or(usize::MAX)))
        .unwrap_or((0, usize::MAX));

    Ok(QueryResult::Many(
        records
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect(),
    ))
}

/// `findRelatedRecord`: the related record, or none if unset or missing.
pub fn find_related_record(state: &CacheState, expression: &QueryExpression) -> Result<QueryResult> {
    let QueryExpression::FindRelatedRecord {
        record,
        relationship,
    } = expression
    else {
        return Err(mismatched(expression, "findRelatedRecord"));
    };

    let related = match owner(state, record)?.related_record(relationship) {
        Some(related) => state.current(&related.record_type, &related.id)?.cloned(),
        None => None,
    };
    Ok(QueryResult::One(related))
}

/// `findRelatedRecords`: related records that exist, in relationship order.
pub fn find_related_records(
    state: &CacheState,
    expression: &QueryExpression,
) -> Result<QueryResult> {
    let QueryExpression::FindRelatedRecords {
        record,
        relationship,
    } = expression
    else {
        return Err(mismatched(expression, "findRelatedRecords"));
    };

    let mut records = Vec::new();
    for related in owner(state, record)?.related_records(relationship) {
        if let Some(found) = state.current(&related.record_type, &related.id)? {
            records.push(found.clone());
        }
    }
    Ok(QueryResult::Many(records))
}
