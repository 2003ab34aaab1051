use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One event or session as delivered by the telemetry provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct SourceRecord(Value);

impl SourceRecord {
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Looks up a dotted path (`dailySleepDTO.deepSleepSeconds`). JSON `null`
    /// is reported as absent.
    #[must_use]
    pub fn field(&self, path: &str) -> Option<&Value> {
        let mut current = &self.0;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        if current.is_null() {
            None
        } else {
            Some(current)
        }
    }

    /// True when the path holds something other than `null`, `{}` or `[]`.
    #[must_use]
    pub fn has_content(&self, path: &str) -> bool {
        match self.field(path) {
            Some(Value::Object(map)) => !map.is_empty(),
            Some(Value::Array(items)) => !items.is_empty(),
            Some(_) => true,
            None => false,
        }
    }

    #[must_use]
    pub fn text(&self, path: &str) -> Option<&str> {
        self.field(path).and_then(Value::as_str)
    }

    #[must_use]
    pub fn number_or_zero(&self, path: &str) -> f64 {
        self.field(path).and_then(Value::as_f64).unwrap_or(0.0)
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn integer_or_zero(&self, path: &str) -> i64 {
        match self.field(path) {
            Some(value) => value
                .as_i64()
                .or_else(|| value.as_f64().map(|raw| raw.trunc() as i64))
                .unwrap_or(0),
            None => 0,
        }
    }

    #[must_use]
    pub fn flag_or_false(&self, path: &str) -> bool {
        self.field(path).and_then(Value::as_bool).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateRange {
    pub start: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

impl DateRange {
    #[must_use]
    pub fn day(start: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: None,
        }
    }

    /// Calendar portion of `start` (`2024-01-15T07:30:00Z` -> `2024-01-15`).
    #[must_use]
    pub fn calendar_date(&self) -> &str {
        self.start
            .split(['T', ' '])
            .next()
            .unwrap_or(self.start.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    Number(f64),
    Select(String),
    RichText(String),
    Checkbox(bool),
    Date(DateRange),
    Title(String),
}

impl PropertyValue {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Number(_) => "number",
            Self::Select(_) => "select",
            Self::RichText(_) => "rich_text",
            Self::Checkbox(_) => "checkbox",
            Self::Date(_) => "date",
            Self::Title(_) => "title",
        }
    }
}

/// Named, typed properties of a stored record or of a freshly mapped one.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Properties(BTreeMap<String, PropertyValue>);

impl Properties {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: PropertyValue) {
        self.0.insert(name.into(), value);
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: PropertyValue) -> Self {
        self.insert(name, value);
        self
    }

    pub fn remove(&mut self, name: &str) -> Option<PropertyValue> {
        self.0.remove(name)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn number(&self, name: &str) -> Option<f64> {
        match self.get(name) {
            Some(PropertyValue::Number(value)) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn label(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(PropertyValue::Select(value)) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(PropertyValue::RichText(value)) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn boolean(&self, name: &str) -> Option<bool> {
        match self.get(name) {
            Some(PropertyValue::Checkbox(value)) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn title(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(PropertyValue::Title(value)) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn date(&self, name: &str) -> Option<&DateRange> {
        match self.get(name) {
            Some(PropertyValue::Date(value)) => Some(value),
            _ => None,
        }
    }

    /// Overlays `other` on top of `self`; entries in `other` win.
    pub fn merge(&mut self, other: &Properties) {
        for (name, value) in other.iter() {
            self.0.insert(name.clone(), value.clone());
        }
    }
}

impl FromIterator<(String, PropertyValue)> for Properties {
    fn from_iter<T: IntoIterator<Item = (String, PropertyValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Identity of a real-world event across sync runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NaturalKey {
    pub date: String,
    pub category: String,
    pub discriminator: String,
}

impl Display for NaturalKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.date, self.category, self.discriminator)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetRecord {
    pub id: String,
    pub properties: Properties,
}

/// Field Mapper output for one source record.
///
/// `tracked` is owned by the sync: diffed against the store and sent on both
/// create and update. `identity` is only sent when the record is created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MappedRecord {
    pub key: NaturalKey,
    pub tracked: Properties,
    pub identity: Properties,
}

impl MappedRecord {
    #[must_use]
    pub fn create_properties(&self) -> Properties {
        let mut properties = self.identity.clone();
        properties.merge(&self.tracked);
        properties
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]

    use super::*;
    use serde_json::json;

    #[test]
    fn null_fields_read_as_absent() {
        let record = SourceRecord::new(json!({
            "distance": null,
            "dailySleepDTO": {"deepSleepSeconds": 1200, "remSleepSeconds": 90.7},
            "empty": {}
        }));

        assert!(record.field("distance").is_none());
        assert_eq!(record.number_or_zero("distance"), 0.0);
        assert_eq!(record.integer_or_zero("dailySleepDTO.deepSleepSeconds"), 1200);
        assert_eq!(record.integer_or_zero("dailySleepDTO.remSleepSeconds"), 90);
        assert!(!record.has_content("empty"));
        assert!(record.has_content("dailySleepDTO"));
        assert!(!record.flag_or_false("pr"));
    }

    #[test]
    fn typed_accessors_reject_other_types() {
        let properties = Properties::new()
            .with("Calories", PropertyValue::Number(300.0))
            .with("Activity Type", PropertyValue::Select("Running".to_string()));

        assert_eq!(properties.number("Calories"), Some(300.0));
        assert_eq!(properties.label("Calories"), None);
        assert_eq!(properties.label("Activity Type"), Some("Running"));
        assert_eq!(properties.text("Activity Type"), None);
    }

    #[test]
    fn calendar_date_strips_time_of_day() {
        assert_eq!(
            DateRange::day("2024-01-15T07:30:00Z").calendar_date(),
            "2024-01-15"
        );
        assert_eq!(DateRange::day("2024-01-15").calendar_date(), "2024-01-15");
    }

    #[test]
    fn property_values_serialize_with_type_tag() {
        let value = match serde_json::to_value(PropertyValue::Number(1.4)) {
            Ok(value) => value,
            Err(err) => panic!("serialization failed: {err}"),
        };
        assert_eq!(value, json!({"type": "number", "value": 1.4}));
    }
}
