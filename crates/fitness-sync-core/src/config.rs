use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::macros::format_description;
use time::UtcOffset;

use crate::labels::{
    default_activity_rules, default_training_messages, LabelRule, NameRewrite,
    TrainingMessageRule,
};
use crate::SyncError;

/// Everything the Field Mapper needs beyond the source record itself.
/// Fields missing from a JSON config take their `v1` value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MapperConfig {
    pub config_version: u32,
    /// Fixed offset used for wall-clock display fields, e.g. `+08:00` or `Z`.
    ///
    /// Named zones such as `Europe/Berlin` are not accepted. A zone that
    /// observes daylight saving needs the offset changed with the season,
    /// otherwise `Times` is an hour off for part of the year.
    pub utc_offset: String,
    pub activity_rules: Vec<LabelRule>,
    pub training_messages: Vec<TrainingMessageRule>,
    pub name_rewrites: Vec<NameRewrite>,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self::v1()
    }
}

impl MapperConfig {
    #[must_use]
    pub fn v1() -> Self {
        Self {
            config_version: 1,
            utc_offset: "Z".to_string(),
            activity_rules: default_activity_rules(),
            training_messages: default_training_messages(),
            name_rewrites: vec![NameRewrite {
                from: "ENTERTAINMENT".to_string(),
                to: "Netflix".to_string(),
            }],
        }
    }

    /// Validates the rule tables and the display offset.
    ///
    /// # Errors
    /// Returns [`SyncError::Config`] when the offset does not parse or a rule
    /// carries an empty pattern, category, prefix or label.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.config_version == 0 {
            return Err(SyncError::Config(
                "config_version MUST be >= 1".to_string(),
            ));
        }

        self.display_offset()?;

        for (index, rule) in self.activity_rules.iter().enumerate() {
            if rule.pattern.trim().is_empty() {
                return Err(SyncError::Config(format!(
                    "activity_rules[{index}].pattern MUST NOT be empty"
                )));
            }
            if rule.category.trim().is_empty() {
                return Err(SyncError::Config(format!(
                    "activity_rules[{index}].category MUST NOT be empty"
                )));
            }
            if rule
                .subtype
                .as_deref()
                .is_some_and(|subtype| subtype.trim().is_empty())
            {
                return Err(SyncError::Config(format!(
                    "activity_rules[{index}].subtype MUST NOT be blank when present"
                )));
            }
        }

        for (index, rule) in self.training_messages.iter().enumerate() {
            if rule.prefix.is_empty() || rule.label.trim().is_empty() {
                return Err(SyncError::Config(format!(
                    "training_messages[{index}] requires a prefix and a label"
                )));
            }
        }

        if self.name_rewrites.iter().any(|rewrite| rewrite.from.is_empty()) {
            return Err(SyncError::Config(
                "name_rewrites entries require a non-empty `from`".to_string(),
            ));
        }

        Ok(())
    }

    /// # Errors
    /// Returns [`SyncError::Config`] when `utc_offset` is not `Z`/`UTC` or
    /// `+HH:MM`/`-HH:MM`.
    pub fn display_offset(&self) -> Result<UtcOffset, SyncError> {
        let raw = self.utc_offset.trim();
        if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
            return Ok(UtcOffset::UTC);
        }

        UtcOffset::parse(
            raw,
            format_description!("[offset_hour sign:mandatory]:[offset_minute]"),
        )
        .map_err(|err| {
            let hint = if raw.contains('/') {
                "; named time zones are not supported, use a fixed offset such as +08:00"
            } else {
                ""
            };
            SyncError::Config(format!("invalid utc_offset '{raw}': {err}{hint}"))
        })
    }

    /// Decodes and validates a config from JSON.
    ///
    /// # Errors
    /// Returns [`SyncError::Config`] when decoding fails or the decoded
    /// config is invalid.
    pub fn from_json(value: &Value) -> Result<Self, SyncError> {
        let config: Self = serde_json::from_value(value.clone())
            .map_err(|err| SyncError::Config(format!("invalid mapper config JSON: {err}")))?;
        config.validate()?;
        Ok(config)
    }
}
