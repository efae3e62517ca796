use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};

pub use time_of_day::{format_time_of_day, parse_time_of_day};

/// Upper bound of the user-facing brightness scale.
pub const MAX_BRIGHTNESS: u8 = 100;

/// User settings of the picture frame.
///
/// A value of this type is an immutable snapshot: the daemon replaces the
/// whole thing on every update and never edits fields in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FrameSettings {
    /// When to turn the screen off. `None` means never.
    #[serde(with = "time_of_day")]
    pub sleep_time: Option<NaiveTime>,
    /// When to turn the screen on. `None` means never.
    #[serde(with = "time_of_day")]
    pub awake_time: Option<NaiveTime>,
    pub photo_directory: PathBuf,
    /// How often the library is rescanned. Zero or less disables it.
    #[serde(with = "signed_interval")]
    pub photo_refresh_interval: TimeDelta,
    /// How often the slideshow advances. Zero or less disables it.
    #[serde(with = "signed_interval")]
    pub photo_change_interval: TimeDelta,
    /// Percentage in `0..=100`; larger persisted values are clamped.
    #[serde(deserialize_with = "brightness::deserialize")]
    pub brightness: u8,
}

impl Default for FrameSettings {
    fn default() -> Self {
        Self {
            sleep_time: None,
            awake_time: None,
            photo_directory: default_photo_directory(),
            photo_refresh_interval: TimeDelta::hours(1),
            photo_change_interval: TimeDelta::minutes(1),
            brightness: 75,
        }
    }
}

impl FrameSettings {
    pub fn from_yaml_str(input: &str) -> Result<Self> {
        let settings: FrameSettings =
            serde_yaml::from_str(input).context("failed to parse frame settings")?;
        Ok(settings)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml::to_string(self).context("failed to serialize frame settings")
    }

    /// Reads settings from `path`, falling back to defaults when the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => Self::from_yaml_str(&contents)
                .with_context(|| format!("invalid settings file {}", path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => {
                Err(err).with_context(|| format!("failed to read settings at {}", path.display()))
            }
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create settings directory {}", parent.display())
            })?;
        }
        let yaml = self.to_yaml_string()?;
        fs::write(path, yaml)
            .with_context(|| format!("failed to write settings to {}", path.display()))
    }

    /// Applies the same clamping rules the parser uses.
    pub fn normalized(mut self) -> Self {
        self.brightness = self.brightness.min(MAX_BRIGHTNESS);
        self.photo_refresh_interval = signed_interval::clamp(self.photo_refresh_interval);
        self.photo_change_interval = signed_interval::clamp(self.photo_change_interval);
        self
    }

    /// Slideshow period, or `None` when advancing is disabled.
    pub fn photo_change_period(&self) -> Option<Duration> {
        positive_std(self.photo_change_interval)
    }

    /// Library rescan period, or `None` when rescanning is disabled.
    pub fn photo_refresh_period(&self) -> Option<Duration> {
        positive_std(self.photo_refresh_interval)
    }
}

fn positive_std(delta: TimeDelta) -> Option<Duration> {
    if delta <= TimeDelta::zero() {
        return None;
    }
    delta.to_std().ok().filter(|d| !d.is_zero())
}

fn default_photo_directory() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/home/pi"))
        .join("Pictures")
}

mod time_of_day {
    use chrono::NaiveTime;
    use serde::de::{self, Deserializer};
    use serde::{Deserialize, Serializer};

    const FORMATS: [&str; 2] = ["%H:%M:%S%.f", "%H:%M"];

    pub fn parse_time_of_day(value: &str) -> Option<NaiveTime> {
        let trimmed = value.trim();
        FORMATS
            .iter()
            .find_map(|format| NaiveTime::parse_from_str(trimmed, format).ok())
    }

    pub fn format_time_of_day(time: NaiveTime) -> String {
        time.format("%H:%M:%S%.f").to_string()
    }

    pub fn serialize<S>(value: &Option<NaiveTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(time) => serializer.serialize_some(&format_time_of_day(*time)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(value) if value.trim().is_empty() => Ok(None),
            Some(value) => parse_time_of_day(&value)
                .map(Some)
                .ok_or_else(|| de::Error::custom(format!("invalid time literal '{value}'"))),
        }
    }
}

mod signed_interval {
    use chrono::TimeDelta;
    use serde::de::{self, Deserializer};
    use serde::{Deserialize, Serializer};

    pub fn clamp(delta: TimeDelta) -> TimeDelta {
        delta.max(TimeDelta::zero())
    }

    pub fn serialize<S>(value: &TimeDelta, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let negative = *value < TimeDelta::zero();
        let magnitude = if negative { -*value } else { *value };
        let std = magnitude
            .to_std()
            .map_err(|err| serde::ser::Error::custom(err.to_string()))?;
        let text = humantime::format_duration(std).to_string();
        if negative {
            serializer.serialize_str(&format!("-{text}"))
        } else {
            serializer.serialize_str(&text)
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<TimeDelta, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        let trimmed = raw.trim();
        let (negative, body) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest.trim_start()),
            None => (false, trimmed),
        };
        let std = humantime::parse_duration(body)
            .map_err(|err| de::Error::custom(format!("invalid interval '{raw}': {err}")))?;
        if negative {
            return Ok(TimeDelta::zero());
        }
        TimeDelta::from_std(std)
            .map_err(|_| de::Error::custom(format!("interval '{raw}' is out of range")))
    }
}

mod brightness {
    use serde::{Deserialize, Deserializer};

    use super::MAX_BRIGHTNESS;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u8, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = u8::deserialize(deserializer)?;
        Ok(value.min(MAX_BRIGHTNESS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let settings = FrameSettings::from_yaml_str("{}").expect("valid yaml");
        assert_eq!(settings, FrameSettings::default());
        assert_eq!(settings.brightness, 75);
        assert_eq!(settings.photo_change_interval, TimeDelta::minutes(1));
        assert!(settings.sleep_time.is_none());
    }

    #[test]
    fn parses_kebab_case_fields() {
        let settings = FrameSettings::from_yaml_str(
            r#"
sleep-time: "22:30"
awake-time: "07:15:05"
photo-directory: /srv/pictures
photo-refresh-interval: 2h
photo-change-interval: 45s
brightness: 40
"#,
        )
        .expect("valid yaml");

        assert_eq!(
            settings.sleep_time,
            NaiveTime::from_hms_opt(22, 30, 0)
        );
        assert_eq!(settings.awake_time, NaiveTime::from_hms_opt(7, 15, 5));
        assert_eq!(settings.photo_directory, PathBuf::from("/srv/pictures"));
        assert_eq!(settings.photo_refresh_interval, TimeDelta::hours(2));
        assert_eq!(settings.photo_change_interval, TimeDelta::seconds(45));
        assert_eq!(settings.brightness, 40);
    }

    #[test]
    fn null_and_blank_times_mean_never() {
        let settings = FrameSettings::from_yaml_str(
            r#"
sleep-time: null
awake-time: ""
"#,
        )
        .expect("valid yaml");
        assert!(settings.sleep_time.is_none());
        assert!(settings.awake_time.is_none());
    }

    #[test]
    fn rejects_malformed_time() {
        let err = FrameSettings::from_yaml_str("sleep-time: \"25:99\"").unwrap_err();
        assert!(format!("{err:#}").contains("invalid time literal"));
    }

    #[test]
    fn brightness_beyond_byte_range_is_structural_error() {
        assert!(FrameSettings::from_yaml_str("brightness: 300").is_err());
    }

    #[test]
    fn negative_interval_is_clamped_to_zero() {
        let settings =
            FrameSettings::from_yaml_str("photo-change-interval: \"-5s\"").expect("valid yaml");
        assert_eq!(settings.photo_change_interval, TimeDelta::zero());
        assert!(settings.photo_change_period().is_none());
    }

    #[test]
    fn disabled_periods_are_none() {
        let settings = FrameSettings {
            photo_change_interval: TimeDelta::zero(),
            photo_refresh_interval: TimeDelta::seconds(-3),
            ..FrameSettings::default()
        };
        assert!(settings.photo_change_period().is_none());
        assert!(settings.photo_refresh_period().is_none());

        let enabled = FrameSettings::default();
        assert_eq!(enabled.photo_change_period(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn normalized_matches_parser_clamping() {
        let raw = FrameSettings {
            brightness: 180,
            photo_change_interval: TimeDelta::milliseconds(-1),
            ..FrameSettings::default()
        };
        let normalized = raw.clone().normalized();
        assert_eq!(normalized.brightness, 100);
        assert_eq!(normalized.photo_change_interval, TimeDelta::zero());

        let reparsed =
            FrameSettings::from_yaml_str(&raw.to_yaml_string().unwrap()).expect("reparse");
        assert_eq!(reparsed, normalized);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = FrameSettings::load(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(settings, FrameSettings::default());
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/settings.yaml");
        let settings = FrameSettings {
            brightness: 10,
            ..FrameSettings::default()
        };
        settings.save(&path).unwrap();
        assert_eq!(FrameSettings::load(&path).unwrap(), settings);
    }
}
