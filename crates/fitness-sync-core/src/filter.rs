use serde::{Deserialize, Serialize};

use crate::model::{NaturalKey, Properties};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum KeyForm {
    Select,
    Title,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct KeyField {
    pub property: &'static str,
    pub form: KeyForm,
}

/// Where each component of a [`NaturalKey`] lives in the target schema.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct KeyFields {
    pub date: &'static str,
    pub category: KeyField,
    pub discriminator: KeyField,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum Predicate {
    /// Day-granularity match against the start of a date property.
    DateEquals(String),
    SelectEquals(String),
    TitleEquals(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Condition {
    pub property: String,
    pub predicate: Predicate,
}

impl Condition {
    #[must_use]
    pub fn matches(&self, properties: &Properties) -> bool {
        match &self.predicate {
            Predicate::DateEquals(day) => properties
                .date(&self.property)
                .is_some_and(|range| range.calendar_date() == day.as_str()),
            Predicate::SelectEquals(label) => properties
                .label(&self.property)
                .is_some_and(|value| value == label.as_str()),
            Predicate::TitleEquals(title) => properties
                .title(&self.property)
                .is_some_and(|value| value == title.as_str()),
        }
    }
}

/// Conjunction of conditions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    /// Filter constraining every component of `key`.
    #[must_use]
    pub fn for_key(fields: &KeyFields, key: &NaturalKey) -> Self {
        Self {
            conditions: vec![
                Condition {
                    property: fields.date.to_string(),
                    predicate: Predicate::DateEquals(key.date.clone()),
                },
                key_condition(fields.category, &key.category),
                key_condition(fields.discriminator, &key.discriminator),
            ],
        }
    }

    #[must_use]
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    #[must_use]
    pub fn matches(&self, properties: &Properties) -> bool {
        self.conditions
            .iter()
            .all(|condition| condition.matches(properties))
    }
}

fn key_condition(field: KeyField, value: &str) -> Condition {
    let predicate = match field.form {
        KeyForm::Select => Predicate::SelectEquals(value.to_string()),
        KeyForm::Title => Predicate::TitleEquals(value.to_string()),
    };
    Condition {
        property: field.property.to_string(),
        predicate,
    }
}
