use anyhow::{anyhow, Context, Result};
use fitness_sync_core::{
    DateRange, Filter, Predicate, Properties, PropertyValue, TargetRecord,
};
use serde_json::{json, Map, Value};

#[must_use]
pub fn encode_property(value: &PropertyValue) -> Value {
    match value {
        PropertyValue::Number(number) => json!({ "number": number }),
        PropertyValue::Select(name) => json!({ "select": { "name": name } }),
        PropertyValue::RichText(text) => json!({ "rich_text": text_blocks(text) }),
        PropertyValue::Checkbox(checked) => json!({ "checkbox": checked }),
        PropertyValue::Date(range) => json!({
            "date": { "start": range.start, "end": range.end }
        }),
        PropertyValue::Title(text) => json!({ "title": text_blocks(text) }),
    }
}

#[must_use]
pub fn encode_properties(properties: &Properties) -> Value {
    let map: Map<String, Value> = properties
        .iter()
        .map(|(name, value)| (name.clone(), encode_property(value)))
        .collect();
    Value::Object(map)
}

fn text_blocks(text: &str) -> Value {
    if text.is_empty() {
        json!([])
    } else {
        json!([{ "type": "text", "text": { "content": text } }])
    }
}

/// Decodes one page property. Null payloads and unsupported types yield
/// `None`.
#[must_use]
pub fn decode_property(value: &Value) -> Option<PropertyValue> {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .or_else(|| {
            ["number", "select", "rich_text", "checkbox", "date", "title"]
                .into_iter()
                .find(|key| value.get(key).is_some())
        })?;
    let payload = value.get(kind)?;

    match kind {
        "number" => payload.as_f64().map(PropertyValue::Number),
        "select" => payload
            .get("name")
            .and_then(Value::as_str)
            .map(|name| PropertyValue::Select(name.to_string())),
        "rich_text" => plain_text(payload).map(PropertyValue::RichText),
        "title" => plain_text(payload).map(PropertyValue::Title),
        "checkbox" => payload.as_bool().map(PropertyValue::Checkbox),
        "date" => {
            let start = payload.get("start").and_then(Value::as_str)?;
            Some(PropertyValue::Date(DateRange {
                start: start.to_string(),
                end: payload
                    .get("end")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            }))
        }
        _ => None,
    }
}

fn plain_text(blocks: &Value) -> Option<String> {
    let blocks = blocks.as_array()?;
    Some(
        blocks
            .iter()
            .filter_map(|block| {
                block
                    .get("plain_text")
                    .or_else(|| block.get("text").and_then(|text| text.get("content")))
                    .and_then(Value::as_str)
            })
            .collect(),
    )
}

pub fn decode_page(page: &Value) -> Result<TargetRecord> {
    let id = page
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("page is missing an id"))?;
    let raw = page
        .get("properties")
        .and_then(Value::as_object)
        .with_context(|| format!("page {id} has no properties object"))?;

    let properties = raw
        .iter()
        .filter_map(|(name, value)| decode_property(value).map(|decoded| (name.clone(), decoded)))
        .collect();

    Ok(TargetRecord {
        id: id.to_string(),
        properties,
    })
}

pub fn decode_query_results(body: &Value) -> Result<Vec<TargetRecord>> {
    body.get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("query response has no results array"))?
        .iter()
        .map(decode_page)
        .collect()
}

#[must_use]
pub fn encode_filter(filter: &Filter) -> Value {
    let clauses: Vec<Value> = filter
        .conditions()
        .iter()
        .map(|condition| {
            let (kind, value) = match &condition.predicate {
                Predicate::DateEquals(day) => ("date", day),
                Predicate::SelectEquals(label) => ("select", label),
                Predicate::TitleEquals(title) => ("title", title),
            };
            json!({ "property": condition.property, kind: { "equals": value } })
        })
        .collect();
    json!({ "and": clauses })
}
