use crate::model::{Properties, PropertyValue, TargetRecord};

/// Name of the first declared property in `mapped` whose stored counterpart
/// differs.
///
/// A stored value of another type, or no stored value at all, is a mismatch.
/// Stored properties that `mapped` does not declare are never inspected.
#[must_use]
pub fn first_mismatch<'a>(existing: &Properties, mapped: &'a Properties) -> Option<&'a str> {
    mapped
        .iter()
        .find(|(name, declared)| !field_matches(existing, name, declared))
        .map(|(name, _)| name.as_str())
}

#[must_use]
pub fn needs_update(existing: &TargetRecord, mapped: &Properties) -> bool {
    first_mismatch(&existing.properties, mapped).is_some()
}

#[allow(clippy::float_cmp)]
fn field_matches(existing: &Properties, name: &str, declared: &PropertyValue) -> bool {
    match declared {
        PropertyValue::Number(value) => existing.number(name) == Some(*value),
        PropertyValue::Select(value) => existing.label(name) == Some(value.as_str()),
        PropertyValue::RichText(value) => existing.text(name) == Some(value.as_str()),
        PropertyValue::Checkbox(value) => existing.boolean(name) == Some(*value),
        PropertyValue::Title(value) => existing.title(name) == Some(value.as_str()),
        PropertyValue::Date(value) => existing.date(name) == Some(value),
    }
}
