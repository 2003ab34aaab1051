use time::UtcOffset;

use crate::config::MapperConfig;
use crate::filter::{KeyField, KeyFields, KeyForm};
use crate::format::{
    format_calendar_date, format_clock, format_day_title, format_duration, format_pace,
    format_rfc3339_utc, format_timestamp_utc, hours, normalize_label, parse_calendar_date,
    parse_service_timestamp, round_to, UNKNOWN,
};
use crate::labels::{
    apply_name_rewrites, resolve_activity_labels, resolve_training_message, LabelRule,
    NameRewrite, TrainingMessageRule,
};
use crate::model::{DateRange, MappedRecord, NaturalKey, Properties, PropertyValue, SourceRecord};
use crate::SyncError;

pub const ZERO_DURATION: &str = "zero_duration";

/// One family of source records and its target schema.
pub trait RecordKind {
    fn name(&self) -> &'static str;

    /// Where the key components live in the target schema.
    fn key_fields(&self) -> KeyFields;

    /// Pure mapping of one source record. Never fails on missing fields.
    fn map(&self, source: &SourceRecord) -> MappedRecord;

    fn natural_key(&self, source: &SourceRecord) -> NaturalKey {
        self.map(source).key
    }

    /// Reason to skip `source` without touching the store, if any.
    fn suppression(&self, _source: &SourceRecord) -> Option<&'static str> {
        None
    }
}

const ACTIVITY_KEY_FIELDS: KeyFields = KeyFields {
    date: "Date",
    category: KeyField {
        property: "Activity Type",
        form: KeyForm::Select,
    },
    discriminator: KeyField {
        property: "Activity Name",
        form: KeyForm::Title,
    },
};

#[derive(Debug, Clone)]
pub struct ActivityKind {
    rules: Vec<LabelRule>,
    training_messages: Vec<TrainingMessageRule>,
    name_rewrites: Vec<NameRewrite>,
}

impl ActivityKind {
    /// # Errors
    /// Returns [`SyncError::Config`] when `config` does not validate.
    pub fn new(config: &MapperConfig) -> Result<Self, SyncError> {
        config.validate()?;
        Ok(Self {
            rules: config.activity_rules.clone(),
            training_messages: config.training_messages.clone(),
            name_rewrites: config.name_rewrites.clone(),
        })
    }

    fn optional_message(&self, source: &SourceRecord, path: &str) -> Option<String> {
        let raw = source.text(path).unwrap_or_default();
        let label = resolve_training_message(&self.training_messages, raw);
        let label = label.trim();
        (!label.is_empty()).then(|| label.to_string())
    }
}

impl RecordKind for ActivityKind {
    fn name(&self) -> &'static str {
        "activities"
    }

    fn key_fields(&self) -> KeyFields {
        ACTIVITY_KEY_FIELDS
    }

    fn map(&self, source: &SourceRecord) -> MappedRecord {
        let name = apply_name_rewrites(
            &self.name_rewrites,
            source.text("activityName").unwrap_or("Unnamed Activity"),
        );
        let labels = resolve_activity_labels(
            &self.rules,
            source.text("activityType.typeKey").unwrap_or_default(),
            &name,
        );

        let started = source
            .text("startTimeGMT")
            .and_then(parse_service_timestamp);
        let start = started
            .and_then(format_rfc3339_utc)
            .unwrap_or_else(|| UNKNOWN.to_string());
        let day = started
            .and_then(|value| format_calendar_date(value.date()))
            .unwrap_or_else(|| UNKNOWN.to_string());

        let duration = source.number_or_zero("duration");
        let mut tracked = Properties::new()
            .with("Activity Type", PropertyValue::Select(labels.category.clone()))
            .with("Subactivity Type", PropertyValue::Select(labels.subtype))
            .with(
                "Distance (km)",
                PropertyValue::Number(round_to(source.number_or_zero("distance") / 1000.0, 2)),
            )
            .with(
                "Duration (min)",
                PropertyValue::Number(round_to(duration / 60.0, 2)),
            )
            .with(
                "Duration (h)",
                PropertyValue::Number(round_to(duration / 3600.0, 1)),
            )
            .with(
                "Duration",
                PropertyValue::RichText(format_duration(source.integer_or_zero("duration"))),
            )
            .with(
                "Calories",
                PropertyValue::Number(round_to(source.number_or_zero("calories"), 0)),
            )
            .with(
                "Avg Pace",
                PropertyValue::RichText(format_pace(source.number_or_zero("averageSpeed"))),
            )
            .with(
                "Avg Power",
                PropertyValue::Number(round_to(source.number_or_zero("avgPower"), 1)),
            )
            .with(
                "Max Power",
                PropertyValue::Number(round_to(source.number_or_zero("maxPower"), 1)),
            )
            .with(
                "Aerobic",
                PropertyValue::Number(round_to(source.number_or_zero("aerobicTrainingEffect"), 1)),
            )
            .with(
                "Anaerobic",
                PropertyValue::Number(round_to(
                    source.number_or_zero("anaerobicTrainingEffect"),
                    1,
                )),
            )
            .with("PR", PropertyValue::Checkbox(source.flag_or_false("pr")))
            .with("Fav", PropertyValue::Checkbox(source.flag_or_false("favorite")));

        if let Some(label) = source
            .text("trainingEffectLabel")
            .filter(|label| !label.trim().is_empty())
        {
            tracked.insert("Training Effect", PropertyValue::Select(normalize_label(label)));
        }
        if let Some(label) = self.optional_message(source, "aerobicTrainingEffectMessage") {
            tracked.insert("Aerobic Effect", PropertyValue::Select(label));
        }
        if let Some(label) = self.optional_message(source, "anaerobicTrainingEffectMessage") {
            tracked.insert("Anaerobic Effect", PropertyValue::Select(label));
        }

        let identity = Properties::new()
            .with("Activity Name", PropertyValue::Title(name.clone()))
            .with("Date", PropertyValue::Date(DateRange::day(start)));

        MappedRecord {
            key: NaturalKey {
                date: day,
                category: labels.category,
                discriminator: name,
            },
            tracked,
            identity,
        }
    }
}

const SLEEP_KEY_FIELDS: KeyFields = KeyFields {
    date: "Long Date",
    category: KeyField {
        property: "Category",
        form: KeyForm::Select,
    },
    discriminator: KeyField {
        property: "Sleep Type",
        form: KeyForm::Select,
    },
};

const MAIN_SLEEP_DTO: &str = "dailySleepDTO";
const NAP_DTO: &str = "dailyNapDTO";

#[derive(Debug, Clone)]
pub struct SleepKind {
    offset: UtcOffset,
}

impl SleepKind {
    /// # Errors
    /// Returns [`SyncError::Config`] when `config` does not validate.
    pub fn new(config: &MapperConfig) -> Result<Self, SyncError> {
        config.validate()?;
        Ok(Self {
            offset: config.display_offset()?,
        })
    }

    fn session(source: &SourceRecord) -> (&'static str, &'static str) {
        if !source.has_content(MAIN_SLEEP_DTO) && source.has_content(NAP_DTO) {
            (NAP_DTO, "Nap")
        } else {
            (MAIN_SLEEP_DTO, "Main Sleep")
        }
    }
}

fn stage_seconds(source: &SourceRecord, dto: &str, stage: &str) -> i64 {
    source.integer_or_zero(&format!("{dto}.{stage}"))
}

impl RecordKind for SleepKind {
    fn name(&self) -> &'static str {
        "sleep"
    }

    fn key_fields(&self) -> KeyFields {
        SLEEP_KEY_FIELDS
    }

    fn map(&self, source: &SourceRecord) -> MappedRecord {
        let (dto, sleep_type) = Self::session(source);
        let day = source
            .text(&format!("{dto}.calendarDate"))
            .and_then(parse_calendar_date)
            .and_then(format_calendar_date)
            .unwrap_or_else(|| UNKNOWN.to_string());

        let deep = stage_seconds(source, dto, "deepSleepSeconds");
        let light = stage_seconds(source, dto, "lightSleepSeconds");
        let rem = stage_seconds(source, dto, "remSleepSeconds");
        let awake = stage_seconds(source, dto, "awakeSleepSeconds");
        let total = deep.saturating_add(light).saturating_add(rem);

        let started_ms = source.integer_or_zero(&format!("{dto}.sleepStartTimestampGMT"));
        let ended_ms = source.integer_or_zero(&format!("{dto}.sleepEndTimestampGMT"));

        let mut tracked = Properties::new()
            .with("Category", PropertyValue::Select("Sleep".to_string()))
            .with("Sleep Type", PropertyValue::Select(sleep_type.to_string()))
            .with(
                "Times",
                PropertyValue::RichText(format!(
                    "{} → {}",
                    format_clock(started_ms, self.offset),
                    format_clock(ended_ms, self.offset)
                )),
            )
            .with(
                "Resting HR",
                PropertyValue::Number(round_to(source.number_or_zero("restingHeartRate"), 0)),
            );
        for (label, seconds) in [
            ("Total Sleep", total),
            ("Light Sleep", light),
            ("Deep Sleep", deep),
            ("REM Sleep", rem),
            ("Awake Time", awake),
        ] {
            tracked.insert(format!("{label} (h)"), PropertyValue::Number(hours(seconds)));
            tracked.insert(label, PropertyValue::RichText(format_duration(seconds)));
        }

        let window = DateRange {
            start: format_timestamp_utc(started_ms).unwrap_or_else(|| day.clone()),
            end: format_timestamp_utc(ended_ms),
        };
        let identity = Properties::new()
            .with("Date", PropertyValue::Title(format_day_title(&day)))
            .with("Long Date", PropertyValue::Date(DateRange::day(day.clone())))
            .with("Full Date/Time", PropertyValue::Date(window));

        MappedRecord {
            key: NaturalKey {
                date: day,
                category: "Sleep".to_string(),
                discriminator: sleep_type.to_string(),
            },
            tracked,
            identity,
        }
    }

    fn suppression(&self, source: &SourceRecord) -> Option<&'static str> {
        let (dto, _) = Self::session(source);
        let total = ["deepSleepSeconds", "lightSleepSeconds", "remSleepSeconds"]
            .into_iter()
            .map(|stage| stage_seconds(source, dto, stage))
            .fold(0_i64, i64::saturating_add);
        (total == 0).then_some(ZERO_DURATION)
    }
}
