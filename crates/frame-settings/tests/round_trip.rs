use chrono::{NaiveTime, TimeDelta};
use frame_settings::FrameSettings;
use std::path::PathBuf;

fn reparse(settings: &FrameSettings) -> FrameSettings {
    let yaml = settings.to_yaml_string().expect("serialize settings");
    FrameSettings::from_yaml_str(&yaml).expect("parse serialized settings")
}

#[test]
fn round_trip_with_null_times() {
    let expected = FrameSettings {
        awake_time: None,
        sleep_time: None,
        brightness: 50,
        photo_change_interval: TimeDelta::zero(),
        photo_refresh_interval: TimeDelta::zero(),
        ..FrameSettings::default()
    };

    assert_eq!(reparse(&expected), expected);
}

#[test]
fn round_trip_with_times_and_intervals() {
    let expected = FrameSettings {
        awake_time: NaiveTime::from_hms_opt(5, 10, 50),
        sleep_time: NaiveTime::from_hms_opt(15, 5, 6),
        photo_directory: PathBuf::from("/mnt/photos/family"),
        brightness: 50,
        photo_change_interval: TimeDelta::hours(1),
        photo_refresh_interval: TimeDelta::hours(2),
    };

    assert_eq!(reparse(&expected), expected);
}

#[test]
fn round_trip_keeps_sub_second_precision() {
    let expected = FrameSettings {
        awake_time: NaiveTime::from_hms_milli_opt(6, 0, 0, 250),
        photo_change_interval: TimeDelta::milliseconds(1500),
        ..FrameSettings::default()
    };

    assert_eq!(reparse(&expected), expected);
}

#[test]
fn out_of_range_values_are_fixed_up() {
    let starting = FrameSettings {
        awake_time: NaiveTime::from_hms_opt(1, 2, 3),
        sleep_time: NaiveTime::from_hms_opt(11, 12, 13),
        brightness: 101,
        photo_change_interval: TimeDelta::milliseconds(-1),
        photo_refresh_interval: TimeDelta::milliseconds(-1),
        ..FrameSettings::default()
    };
    let expected = FrameSettings {
        brightness: 100,
        photo_change_interval: TimeDelta::zero(),
        photo_refresh_interval: TimeDelta::zero(),
        ..starting.clone()
    };

    let clamped = reparse(&starting);
    assert_eq!(clamped, expected);

    // Clamped settings are a fixed point of the codec.
    assert_eq!(reparse(&clamped), clamped);
    assert_eq!(
        clamped.to_yaml_string().unwrap(),
        reparse(&clamped).to_yaml_string().unwrap()
    );
}

#[test]
fn brightness_and_negative_second_normalize() {
    let starting = FrameSettings {
        brightness: 101,
        photo_change_interval: TimeDelta::seconds(-1),
        ..FrameSettings::default()
    };

    let normalized = reparse(&starting);
    assert_eq!(normalized.brightness, 100);
    assert_eq!(normalized.photo_change_interval, TimeDelta::zero());
}
