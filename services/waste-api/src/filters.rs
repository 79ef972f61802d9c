use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Errors produced by a malformed filter string
#[derive(Debug, Error, PartialEq)]
pub enum FilterError {
    #[error("malformed filter clause '{0}', expected name=value")]
    MalformedClause(String),

    #[error("unknown lookup '{lookup}' for filter '{field}'")]
    UnknownLookup { field: String, lookup: String },

    #[error("filter '{0}' has no value")]
    MissingValue(String),

    #[error("invalid value '{value}' for filter '{field}': expected {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: &'static str,
    },

    #[error("lookup '{lookup}' on filter '{field}' takes exactly one value")]
    TooManyValues { field: String, lookup: &'static str },
}

/// Columns that can be filtered on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterField {
    Event,
    EventUid,
    DeliveryId,
    SeverityLevel,
    ConfidenceScore,
    ModelName,
    ModelTag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Int,
    Float,
    Text,
}

impl FilterField {
    pub const ALL: [FilterField; 7] = [
        FilterField::Event,
        FilterField::EventUid,
        FilterField::DeliveryId,
        FilterField::SeverityLevel,
        FilterField::ConfidenceScore,
        FilterField::ModelName,
        FilterField::ModelTag,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    /// Filter name, which is also the column name
    pub fn name(&self) -> &'static str {
        match self {
            FilterField::Event => "event",
            FilterField::EventUid => "event_uid",
            FilterField::DeliveryId => "delivery_id",
            FilterField::SeverityLevel => "severity_level",
            FilterField::ConfidenceScore => "confidence_score",
            FilterField::ModelName => "model_name",
            FilterField::ModelTag => "model_tag",
        }
    }

    fn kind(&self) -> ValueKind {
        match self {
            FilterField::SeverityLevel => ValueKind::Int,
            FilterField::ConfidenceScore => ValueKind::Float,
            _ => ValueKind::Text,
        }
    }
}

/// Lookup operator attached to a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lookup {
    Exact,
    Gte,
    Lte,
    Gt,
    Lt,
    Contains,
    In,
}

impl Lookup {
    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "exact" => Some(Lookup::Exact),
            "gte" => Some(Lookup::Gte),
            "lte" => Some(Lookup::Lte),
            "gt" => Some(Lookup::Gt),
            "lt" => Some(Lookup::Lt),
            "contains" => Some(Lookup::Contains),
            "in" => Some(Lookup::In),
            _ => None,
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            Lookup::Exact => "exact",
            Lookup::Gte => "gte",
            Lookup::Lte => "lte",
            Lookup::Gt => "gt",
            Lookup::Lt => "lt",
            Lookup::Contains => "contains",
            Lookup::In => "in",
        }
    }

    /// SQL comparison operator for single-value lookups
    pub fn sql_operator(&self) -> Option<&'static str> {
        match self {
            Lookup::Exact => Some("="),
            Lookup::Gte => Some(">="),
            Lookup::Lte => Some("<="),
            Lookup::Gt => Some(">"),
            Lookup::Lt => Some("<"),
            Lookup::Contains | Lookup::In => None,
        }
    }

    fn is_comparison(&self) -> bool {
        matches!(self, Lookup::Gte | Lookup::Lte | Lookup::Gt | Lookup::Lt)
    }
}

/// A typed filter value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FilterValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Int(v) => write!(f, "{}", v),
            FilterValue::Float(v) => write!(f, "{}", v),
            FilterValue::Text(v) => f.write_str(v),
        }
    }
}

/// One `field__lookup = values` condition
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: FilterField,
    pub lookup: Lookup,
    pub values: Vec<FilterValue>,
}

impl Predicate {
    pub fn new(field: FilterField, lookup: Lookup, values: Vec<FilterValue>) -> Self {
        Self {
            field,
            lookup,
            values,
        }
    }

    /// Key in `field` or `field__lookup` form
    pub fn key(&self) -> String {
        match self.lookup {
            Lookup::Exact => self.field.name().to_string(),
            lookup => format!("{}__{}", self.field.name(), lookup.suffix()),
        }
    }

    /// Text values of the predicate, regardless of their parsed type
    pub fn text_values(&self) -> Vec<String> {
        self.values.iter().map(ToString::to_string).collect()
    }
}

/// Filter names currently enabled for the alarm listing
#[derive(Debug, Clone, Default)]
pub struct AllowList(HashSet<String>);

impl AllowList {
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }
}

impl<S: Into<String>> FromIterator<S> for AllowList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Ordered set of predicates, at most one per field/lookup pair
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSet {
    predicates: Vec<Predicate>,
}

impl FilterSet {
    /// Parse a filter string against the active allow-list.
    ///
    /// `event=impurity,dust&severity_level__gte=2`: clauses are `&`-joined,
    /// values `,`-joined. Fields that are not both known columns and
    /// allowed are dropped without error.
    pub fn parse(input: &str, allowed: &AllowList) -> Result<Self, FilterError> {
        let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
        let mut set = FilterSet::default();

        for clause in compact.split('&').filter(|c| !c.is_empty()) {
            let (name, raw_values) = clause
                .split_once('=')
                .ok_or_else(|| FilterError::MalformedClause(clause.to_string()))?;
            if name.is_empty() {
                return Err(FilterError::MalformedClause(clause.to_string()));
            }

            let (field_name, suffix) = match name.split_once("__") {
                Some((field, suffix)) => (field, Some(suffix)),
                None => (name, None),
            };

            let field = match FilterField::from_name(field_name) {
                Some(field) if allowed.contains(field_name) => field,
                _ => continue,
            };

            let lookup = match suffix {
                None => Lookup::Exact,
                Some(s) => Lookup::from_suffix(s).ok_or_else(|| FilterError::UnknownLookup {
                    field: field_name.to_string(),
                    lookup: s.to_string(),
                })?,
            };

            let raw: Vec<&str> = raw_values.split(',').filter(|v| !v.is_empty()).collect();
            if raw.is_empty() {
                return Err(FilterError::MissingValue(name.to_string()));
            }

            let lookup = match lookup {
                Lookup::Exact if raw.len() > 1 => Lookup::In,
                l if l.is_comparison() && raw.len() > 1 => {
                    return Err(FilterError::TooManyValues {
                        field: field_name.to_string(),
                        lookup: l.suffix(),
                    })
                }
                l => l,
            };

            let values = raw
                .into_iter()
                .map(|v| parse_value(field, lookup, v))
                .collect::<Result<Vec<_>, _>>()?;

            set.insert(Predicate::new(field, lookup, values));
        }

        Ok(set)
    }

    /// Add a predicate, replacing any existing one with the same field and lookup
    pub fn insert(&mut self, predicate: Predicate) {
        match self
            .predicates
            .iter_mut()
            .find(|p| p.field == predicate.field && p.lookup == predicate.lookup)
        {
            Some(existing) => *existing = predicate,
            None => self.predicates.push(predicate),
        }
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn has_field(&self, field: FilterField) -> bool {
        self.predicates.iter().any(|p| p.field == field)
    }

    pub fn for_field(&self, field: FilterField) -> impl Iterator<Item = &Predicate> {
        self.predicates.iter().filter(move |p| p.field == field)
    }

    /// Copy of the set without any predicate on `field`
    pub fn without(&self, field: FilterField) -> Self {
        Self {
            predicates: self
                .predicates
                .iter()
                .filter(|p| p.field != field)
                .cloned()
                .collect(),
        }
    }

    /// JSON echo of the applied filters; single values are shown as scalars
    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .predicates
            .iter()
            .map(|p| {
                let value = match p.values.as_slice() {
                    [single] => serde_json::to_value(single).unwrap_or(Value::Null),
                    many => serde_json::to_value(many).unwrap_or(Value::Null),
                };
                (p.key(), value)
            })
            .collect();
        Value::Object(map)
    }
}

fn parse_value(field: FilterField, lookup: Lookup, raw: &str) -> Result<FilterValue, FilterError> {
    if lookup == Lookup::Contains {
        return Ok(FilterValue::Text(raw.to_string()));
    }

    match field.kind() {
        ValueKind::Int => raw
            .parse::<i64>()
            .map(FilterValue::Int)
            .map_err(|_| FilterError::InvalidValue {
                field: field.name().to_string(),
                value: raw.to_string(),
                expected: "an integer",
            }),
        ValueKind::Float => raw
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(FilterValue::Float)
            .ok_or_else(|| FilterError::InvalidValue {
                field: field.name().to_string(),
                value: raw.to_string(),
                expected: "a number",
            }),
        ValueKind::Text => Ok(FilterValue::Text(raw.to_string())),
    }
}

/// Escape LIKE wildcards so `contains` matches literally
pub fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allow_all() -> AllowList {
        FilterField::ALL.iter().map(|f| f.name()).collect()
    }

    #[test]
    fn test_parse_severity_gte() {
        let set = FilterSet::parse("severity_level__gte=2", &allow_all()).unwrap();
        assert_eq!(
            set.predicates(),
            &[Predicate::new(
                FilterField::SeverityLevel,
                Lookup::Gte,
                vec![FilterValue::Int(2)]
            )]
        );
    }

    #[test]
    fn test_parse_event_list_and_severity() {
        let set = FilterSet::parse(
            "event=impurity,dust,hotspot&severity_level__gte=2",
            &allow_all(),
        )
        .unwrap();

        assert_eq!(set.predicates().len(), 2);
        let event = set.for_field(FilterField::Event).next().unwrap();
        assert_eq!(event.lookup, Lookup::In);
        assert_eq!(event.text_values(), vec!["impurity", "dust", "hotspot"]);
    }

    #[test]
    fn test_single_value_collapses_to_equality() {
        let set = FilterSet::parse("severity_level=2", &allow_all()).unwrap();
        let p = &set.predicates()[0];
        assert_eq!(p.lookup, Lookup::Exact);
        assert_eq!(p.values, vec![FilterValue::Int(2)]);
        assert_eq!(set.to_json(), serde_json::json!({"severity_level": 2}));
    }

    #[test]
    fn test_multi_value_becomes_in() {
        let set = FilterSet::parse("severity_level=1,3", &allow_all()).unwrap();
        let p = &set.predicates()[0];
        assert_eq!(p.lookup, Lookup::In);
        assert_eq!(p.values, vec![FilterValue::Int(1), FilterValue::Int(3)]);

        let set = FilterSet::parse("severity_level__in=1,3", &allow_all()).unwrap();
        assert_eq!(set.to_json(), serde_json::json!({"severity_level__in": [1, 3]}));
    }

    #[test]
    fn test_whitespace_is_ignored() {
        let set = FilterSet::parse(" event = impurity & severity_level__gt = 2 ", &allow_all())
            .unwrap();
        assert_eq!(set.predicates().len(), 2);
        assert_eq!(set.predicates()[1].lookup, Lookup::Gt);
    }

    #[test]
    fn test_unknown_fields_are_dropped() {
        let set = FilterSet::parse("color=red&severity_level__lt=3&&", &allow_all()).unwrap();
        assert_eq!(set.predicates().len(), 1);
        assert_eq!(set.predicates()[0].field, FilterField::SeverityLevel);
    }

    #[test]
    fn test_inactive_fields_are_dropped() {
        let allowed: AllowList = ["event"].into_iter().collect();
        let set = FilterSet::parse("event=dust&severity_level=3", &allowed).unwrap();
        assert_eq!(set.predicates().len(), 1);
        assert!(!set.has_field(FilterField::SeverityLevel));
    }

    #[test]
    fn test_malformed_clause() {
        assert_eq!(
            FilterSet::parse("severity_level", &allow_all()),
            Err(FilterError::MalformedClause("severity_level".to_string()))
        );
        assert!(matches!(
            FilterSet::parse("=2", &allow_all()),
            Err(FilterError::MalformedClause(_))
        ));
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            FilterSet::parse("severity_level__gte=high", &allow_all()),
            Err(FilterError::InvalidValue { .. })
        ));
        assert!(matches!(
            FilterSet::parse("severity_level__gte=1,2", &allow_all()),
            Err(FilterError::TooManyValues { .. })
        ));
        assert!(matches!(
            FilterSet::parse("severity_level__between=1", &allow_all()),
            Err(FilterError::UnknownLookup { .. })
        ));
        assert_eq!(
            FilterSet::parse("severity_level=", &allow_all()),
            Err(FilterError::MissingValue("severity_level".to_string()))
        );
    }

    #[test]
    fn test_contains_is_textual() {
        let set = FilterSet::parse("severity_level__contains=2&delivery_id__contains=LKW", &allow_all())
            .unwrap();
        assert_eq!(set.predicates()[0].values, vec![FilterValue::Text("2".to_string())]);
        assert_eq!(set.predicates()[1].lookup, Lookup::Contains);
    }

    #[test]
    fn test_later_clause_replaces_same_lookup() {
        let set = FilterSet::parse(
            "severity_level__gte=1&severity_level__lte=3&severity_level__gte=2",
            &allow_all(),
        )
        .unwrap();
        assert_eq!(set.predicates().len(), 2);
        assert_eq!(set.predicates()[0].values, vec![FilterValue::Int(2)]);
    }

    #[test]
    fn test_without_field() {
        let set = FilterSet::parse("event=dust&severity_level=3", &allow_all()).unwrap();
        let rest = set.without(FilterField::Event);
        assert_eq!(rest.predicates().len(), 1);
        assert!(set.has_field(FilterField::Event));
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_a\\b"), "50\\%\\_a\\\\b");
    }
}
