use serde::{Deserialize, Serialize};

use crate::format::normalize_label;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuleTarget {
    /// Case-insensitive substring of the free-text activity name.
    Name,
    /// Exact match on the normalized type label.
    Type,
}

/// One row of the ordered label override table.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct LabelRule {
    pub on: RuleTarget,
    pub pattern: String,
    pub category: String,
    /// Replaces the subtype; when absent the normalized type label is kept.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
}

impl LabelRule {
    #[must_use]
    pub fn name(pattern: &str, category: &str, subtype: &str) -> Self {
        Self {
            on: RuleTarget::Name,
            pattern: pattern.to_string(),
            category: category.to_string(),
            subtype: Some(subtype.to_string()),
        }
    }

    #[must_use]
    pub fn type_label(pattern: &str, category: &str) -> Self {
        Self {
            on: RuleTarget::Type,
            pattern: pattern.to_string(),
            category: category.to_string(),
            subtype: None,
        }
    }

    fn matches(&self, type_label: &str, lowered_name: &str) -> bool {
        match self.on {
            RuleTarget::Name => lowered_name.contains(&self.pattern.to_lowercase()),
            RuleTarget::Type => type_label == self.pattern,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ActivityLabels {
    pub category: String,
    pub subtype: String,
}

/// Resolves the (category, subtype) pair for an activity.
///
/// Name rules are tried before type rules; within each group the table order
/// decides and the first match wins. Without a match both labels fall back
/// to the normalized type label.
#[must_use]
pub fn resolve_activity_labels(rules: &[LabelRule], type_key: &str, name: &str) -> ActivityLabels {
    let type_label = normalize_label(type_key);
    let lowered_name = name.to_lowercase();

    let matched = rules
        .iter()
        .filter(|rule| rule.on == RuleTarget::Name)
        .chain(rules.iter().filter(|rule| rule.on == RuleTarget::Type))
        .find(|rule| rule.matches(&type_label, &lowered_name));

    match matched {
        Some(rule) => ActivityLabels {
            category: rule.category.clone(),
            subtype: rule.subtype.clone().unwrap_or_else(|| type_label.clone()),
        },
        None => ActivityLabels {
            category: type_label.clone(),
            subtype: type_label,
        },
    }
}

#[must_use]
pub fn default_activity_rules() -> Vec<LabelRule> {
    vec![
        LabelRule::name("meditation", "Meditation", "Meditation"),
        LabelRule::name("barre", "Strength", "Barre"),
        LabelRule::name("stretch", "Stretching", "Stretching"),
        LabelRule::type_label("Barre", "Strength"),
        LabelRule::type_label("Indoor Cardio", "Cardio"),
        LabelRule::type_label("Indoor Cycling", "Cycling"),
        LabelRule::type_label("Indoor Rowing", "Rowing"),
        LabelRule::type_label("Speed Walking", "Walking"),
        LabelRule::type_label("Strength Training", "Strength"),
        LabelRule::type_label("Treadmill Running", "Running"),
        LabelRule::type_label("Rowing V2", "Rowing"),
        LabelRule::type_label("Yoga", "Yoga/Pilates"),
        LabelRule::type_label("Pilates", "Yoga/Pilates"),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct TrainingMessageRule {
    pub prefix: String,
    pub label: String,
}

#[must_use]
pub fn default_training_messages() -> Vec<TrainingMessageRule> {
    [
        ("NO_", "No Benefit"),
        ("MINOR_", "Some Benefit"),
        ("RECOVERY_", "Recovery"),
        ("MAINTAINING_", "Maintaining"),
        ("IMPROVING_", "Impacting"),
        ("IMPACTING_", "Impacting"),
        ("HIGHLY_", "Highly Impacting"),
        ("OVERREACHING_", "Overreaching"),
    ]
    .into_iter()
    .map(|(prefix, label)| TrainingMessageRule {
        prefix: prefix.to_string(),
        label: label.to_string(),
    })
    .collect()
}

/// First prefix match wins; unmatched messages pass through unchanged.
#[must_use]
pub fn resolve_training_message(rules: &[TrainingMessageRule], message: &str) -> String {
    rules
        .iter()
        .find(|rule| message.starts_with(&rule.prefix))
        .map_or_else(|| message.to_string(), |rule| rule.label.clone())
}

/// Literal substring rewrite applied to activity names before anything else.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct NameRewrite {
    pub from: String,
    pub to: String,
}

#[must_use]
pub fn apply_name_rewrites(rewrites: &[NameRewrite], name: &str) -> String {
    rewrites
        .iter()
        .fold(name.to_string(), |acc, rewrite| acc.replace(&rewrite.from, &rewrite.to))
}
