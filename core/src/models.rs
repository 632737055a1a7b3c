use anyhow::{Result, bail};
use chrono::{Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current on-disk shape of a [`DayRecord`]. Older records are upgraded in
/// memory by `migrate::upgrade_record` before any caller sees them.
pub const SCHEMA_VERSION: i64 = 2;

/// A single scheduled dose (or custom-item) mark for one day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoseMark {
    #[serde(default)]
    pub taken: bool,
    #[serde(default)]
    pub taken_at: Option<i64>,
}

/// One tracked meal for one day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MealMark {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub eaten: bool,
    #[serde(default)]
    pub eaten_at: Option<i64>,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaterLogEntry {
    #[serde(default)]
    pub amount_ml: i64,
    #[serde(default)]
    pub at: Option<i64>,
}

/// A workout session imported from an external fitness service. Opaque to
/// the sync core beyond its presence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkoutSession {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub minutes: i64,
    #[serde(default)]
    pub started_at: Option<i64>,
}

/// Mood ratings (1-5) for the day's time-of-day slots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoodLog {
    #[serde(default)]
    pub morning: Option<i64>,
    #[serde(default)]
    pub midday: Option<i64>,
    #[serde(default)]
    pub evening: Option<i64>,
}

/// Everything tracked for one calendar day, keyed by a `YYYY-MM-DD` date
/// key. Every field tolerates absence in stored JSON so that records
/// written by older versions of the client keep deserializing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayRecord {
    #[serde(default = "default_schema_version")]
    pub schema_version: i64,
    #[serde(default)]
    pub med_doses: Vec<DoseMark>,
    #[serde(default)]
    pub meals: Vec<MealMark>,
    #[serde(default)]
    pub water_ml: i64,
    #[serde(default)]
    pub water_log: Vec<WaterLogEntry>,
    #[serde(default)]
    pub workout_minutes: Option<i64>,
    #[serde(default)]
    pub workout_sessions: Vec<WorkoutSession>,
    #[serde(default)]
    pub walk_done: bool,
    #[serde(default)]
    pub steps_count: Option<i64>,
    #[serde(default)]
    pub weight_kg: Option<f64>,
    #[serde(default)]
    pub weight_logged_at: Option<i64>,
    #[serde(default)]
    pub bedtime: Option<String>,
    #[serde(default)]
    pub wake_time: Option<String>,
    #[serde(default)]
    pub mood: MoodLog,
    #[serde(default)]
    pub custom_taken: BTreeMap<String, DoseMark>,
}

fn default_schema_version() -> i64 {
    SCHEMA_VERSION
}

impl Default for DayRecord {
    fn default() -> Self {
        Self::empty()
    }
}

impl DayRecord {
    /// The canonical all-unset record. Reading a never-logged date yields
    /// exactly this.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            med_doses: Vec::new(),
            meals: Vec::new(),
            water_ml: 0,
            water_log: Vec::new(),
            workout_minutes: None,
            workout_sessions: Vec::new(),
            walk_done: false,
            steps_count: None,
            weight_kg: None,
            weight_logged_at: None,
            bedtime: None,
            wake_time: None,
            mood: MoodLog::default(),
            custom_taken: BTreeMap::new(),
        }
    }

    /// True when no user-entered data is present: no dose taken, no meal
    /// eaten or annotated, zero water, no workout or sessions, no walk,
    /// steps, weight, sleep times, mood, or custom-item entries.
    ///
    /// Consulted before every push and pull so a never-used day cannot
    /// overwrite a populated row on either side. Total: missing fields
    /// were already defaulted on the way in.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.med_doses.iter().all(|d| !d.taken)
            && self.meals.iter().all(|m| !m.eaten && m.note.is_empty())
            && self.water_ml == 0
            && self.workout_minutes.is_none()
            && self.workout_sessions.is_empty()
            && !self.walk_done
            && self.steps_count.is_none()
            && self.weight_kg.is_none()
            && self.bedtime.is_none()
            && self.wake_time.is_none()
            && self.mood.morning.is_none()
            && self.mood.midday.is_none()
            && self.mood.evening.is_none()
            && self.custom_taken.is_empty()
    }
}

// --- Settings ---

/// A user-defined daily item (supplement, extra medication, ...) tracked
/// alongside the fixed regimen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub time: String,
    #[serde(default = "default_one")]
    pub pills_per_day: i64,
    #[serde(default)]
    pub supply: i64,
}

fn default_one() -> i64 {
    1
}

/// Tracker settings. The reminder scheduler consumes most of these; the
/// core needs the dose schedule and custom items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_true")]
    pub reminders_enabled: bool,
    #[serde(default = "default_true")]
    pub weekday_only: bool,
    #[serde(default = "default_water_goal")]
    pub water_goal_ml: i64,
    #[serde(default = "default_water_interval")]
    pub water_interval_minutes: i64,
    #[serde(default = "default_water_start")]
    pub water_start_time: String,
    #[serde(default = "default_water_end")]
    pub water_end_time: String,
    #[serde(default = "default_meal_reminder")]
    pub meal_reminder_time: String,
    #[serde(default = "default_true")]
    pub medication_reminders_enabled: bool,
    #[serde(default = "default_dose_times")]
    pub dose_times: Vec<String>,
    #[serde(default)]
    pub custom_items: Vec<CustomItem>,
}

fn default_true() -> bool {
    true
}
fn default_water_goal() -> i64 {
    2000
}
fn default_water_interval() -> i64 {
    120
}
fn default_water_start() -> String {
    "09:30".to_string()
}
fn default_water_end() -> String {
    "18:30".to_string()
}
fn default_meal_reminder() -> String {
    "12:30".to_string()
}
fn default_dose_times() -> Vec<String> {
    vec![
        "07:00".to_string(),
        "12:30".to_string(),
        "15:30".to_string(),
    ]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            reminders_enabled: true,
            weekday_only: true,
            water_goal_ml: default_water_goal(),
            water_interval_minutes: default_water_interval(),
            water_start_time: default_water_start(),
            water_end_time: default_water_end(),
            meal_reminder_time: default_meal_reminder(),
            medication_reminders_enabled: true,
            dose_times: default_dose_times(),
            custom_items: Vec::new(),
        }
    }
}

// --- Date keys ---

const DATE_KEY_FORMAT: &str = "%Y-%m-%d";

/// Today's date key in the device's local calendar.
#[must_use]
pub fn today_key() -> String {
    date_key(Local::now().date_naive())
}

#[must_use]
pub fn date_key(date: NaiveDate) -> String {
    date.format(DATE_KEY_FORMAT).to_string()
}

/// True for canonical zero-padded `YYYY-MM-DD` keys. Defends the day-record
/// namespace against unrelated keys in the same store.
#[must_use]
pub fn is_date_key(s: &str) -> bool {
    s.len() == 10 && NaiveDate::parse_from_str(s, DATE_KEY_FORMAT).is_ok()
}

/// Shift a date key by a number of calendar days (negative = into the past).
pub fn shift_date_key(key: &str, days: i64) -> Result<String> {
    let date = NaiveDate::parse_from_str(key, DATE_KEY_FORMAT)
        .map_err(|_| anyhow::anyhow!("Invalid date key '{key}'. Use YYYY-MM-DD"))?;
    Ok(date_key(date + chrono::Duration::days(days)))
}

/// Current wall-clock time as epoch milliseconds.
#[must_use]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

// --- Validation ---

pub const MOOD_SLOTS: &[&str] = &["morning", "midday", "evening"];

pub fn validate_mood_slot(slot: &str) -> Result<String> {
    let lower = slot.to_lowercase();
    if MOOD_SLOTS.contains(&lower.as_str()) {
        Ok(lower)
    } else {
        bail!(
            "Invalid mood slot '{slot}'. Must be one of: {}",
            MOOD_SLOTS.join(", ")
        )
    }
}

pub fn validate_mood_rating(rating: i64) -> Result<()> {
    if !(1..=5).contains(&rating) {
        bail!("Mood rating must be between 1 and 5 (got {rating})");
    }
    Ok(())
}

/// Validate a `"HH:MM"` time-of-day string (bedtime, wake time, dose times).
pub fn validate_time_of_day(s: &str) -> Result<()> {
    let parts: Vec<&str> = s.split(':').collect();
    let ok = parts.len() == 2
        && parts[0].len() == 2
        && parts[1].len() == 2
        && parts[0].parse::<u32>().is_ok_and(|h| h < 24)
        && parts[1].parse::<u32>().is_ok_and(|m| m < 60);
    if !ok {
        bail!("Invalid time '{s}'. Use HH:MM (24-hour)");
    }
    Ok(())
}

pub fn validate_water_amount(ml: i64) -> Result<()> {
    if ml <= 0 {
        bail!("Water amount must be greater than 0 ml");
    }
    Ok(())
}

pub fn validate_weight(kg: f64) -> Result<()> {
    if kg <= 0.0 {
        bail!("weight_kg must be greater than 0");
    }
    Ok(())
}

// --- Weight units ---

const LBS_PER_KG: f64 = 2.204_62;

/// Convert a weight value in the given unit to kilograms.
pub fn weight_to_kg(value: f64, unit: &str) -> Result<f64> {
    match unit.to_lowercase().as_str() {
        "kg" => Ok(value),
        "lb" | "lbs" => Ok(value / LBS_PER_KG),
        _ => bail!("Unknown weight unit '{unit}'. Supported: kg, lbs"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_record_is_empty() {
        assert!(DayRecord::empty().is_empty());
    }

    #[test]
    fn test_untaken_doses_still_empty() {
        let mut rec = DayRecord::empty();
        rec.med_doses = vec![DoseMark::default(), DoseMark::default()];
        assert!(rec.is_empty());
    }

    #[test]
    fn test_taken_dose_not_empty() {
        let mut rec = DayRecord::empty();
        rec.med_doses = vec![DoseMark {
            taken: true,
            taken_at: Some(1_700_000_000_000),
        }];
        assert!(!rec.is_empty());
    }

    #[test]
    fn test_uneaten_meal_with_note_not_empty() {
        let mut rec = DayRecord::empty();
        rec.meals.push(MealMark {
            name: "lunch".to_string(),
            eaten: false,
            eaten_at: None,
            note: "skipped, felt off".to_string(),
        });
        assert!(!rec.is_empty());
    }

    #[test]
    fn test_uneaten_meal_without_note_is_empty() {
        let mut rec = DayRecord::empty();
        rec.meals.push(MealMark {
            name: "lunch".to_string(),
            ..MealMark::default()
        });
        assert!(rec.is_empty());
    }

    #[test]
    fn test_water_not_empty() {
        let mut rec = DayRecord::empty();
        rec.water_ml = 250;
        assert!(!rec.is_empty());
    }

    #[test]
    fn test_workout_session_not_empty() {
        let mut rec = DayRecord::empty();
        rec.workout_sessions.push(WorkoutSession {
            id: "abc".to_string(),
            kind: "cycling".to_string(),
            minutes: 30,
            started_at: None,
        });
        assert!(!rec.is_empty());
    }

    #[test]
    fn test_mood_not_empty() {
        let mut rec = DayRecord::empty();
        rec.mood.midday = Some(4);
        assert!(!rec.is_empty());
    }

    #[test]
    fn test_custom_entry_not_empty() {
        let mut rec = DayRecord::empty();
        rec.custom_taken
            .insert("magnesium".to_string(), DoseMark::default());
        // An entry counts even when untaken: it only exists because the
        // user interacted with the item.
        assert!(!rec.is_empty());
    }

    #[test]
    fn test_record_missing_fields_deserializes_to_defaults() {
        let rec: DayRecord = serde_json::from_str("{\"water_ml\": 500}").unwrap();
        assert_eq!(rec.water_ml, 500);
        assert!(rec.med_doses.is_empty());
        assert!(rec.meals.is_empty());
        assert!(rec.weight_kg.is_none());
        assert!(!rec.is_empty());
    }

    #[test]
    fn test_is_date_key() {
        assert!(is_date_key("2024-06-15"));
        assert!(is_date_key("1999-12-31"));
        assert!(!is_date_key("2024-6-15"));
        assert!(!is_date_key("2024-13-01"));
        assert!(!is_date_key("settings"));
        assert!(!is_date_key("2024-06-15x"));
        assert!(!is_date_key(""));
    }

    #[test]
    fn test_shift_date_key() {
        assert_eq!(shift_date_key("2024-06-15", -1).unwrap(), "2024-06-14");
        assert_eq!(shift_date_key("2024-03-01", -1).unwrap(), "2024-02-29");
        assert_eq!(shift_date_key("2024-12-31", 1).unwrap(), "2025-01-01");
        assert_eq!(shift_date_key("2024-06-15", -59).unwrap(), "2024-04-17");
        assert!(shift_date_key("junk", -1).is_err());
    }

    #[test]
    fn test_date_keys_order_lexicographically() {
        // Window bounds are compared as strings; zero padding keeps string
        // order equal to calendar order.
        assert!("2024-06-14" < "2024-06-15");
        assert!("2023-12-31" < "2024-01-01");
    }

    #[test]
    fn test_validate_mood_slot() {
        assert_eq!(validate_mood_slot("Morning").unwrap(), "morning");
        assert_eq!(validate_mood_slot("midday").unwrap(), "midday");
        assert!(validate_mood_slot("night").is_err());
    }

    #[test]
    fn test_validate_mood_rating() {
        assert!(validate_mood_rating(1).is_ok());
        assert!(validate_mood_rating(5).is_ok());
        assert!(validate_mood_rating(0).is_err());
        assert!(validate_mood_rating(6).is_err());
    }

    #[test]
    fn test_validate_time_of_day() {
        assert!(validate_time_of_day("07:00").is_ok());
        assert!(validate_time_of_day("23:59").is_ok());
        assert!(validate_time_of_day("24:00").is_err());
        assert!(validate_time_of_day("7:00").is_err());
        assert!(validate_time_of_day("07:60").is_err());
        assert!(validate_time_of_day("0700").is_err());
    }

    #[test]
    fn test_weight_to_kg() {
        assert!((weight_to_kg(75.0, "kg").unwrap() - 75.0).abs() < f64::EPSILON);
        assert!((weight_to_kg(165.0, "lbs").unwrap() - 74.84).abs() < 0.01);
        assert!(weight_to_kg(75.0, "stone").is_err());
    }

    #[test]
    fn test_settings_defaults() {
        let s = Settings::default();
        assert_eq!(s.water_goal_ml, 2000);
        assert_eq!(s.dose_times.len(), 3);
        assert!(s.custom_items.is_empty());
    }

    #[test]
    fn test_settings_missing_fields_deserialize_to_defaults() {
        let s: Settings = serde_json::from_str("{\"water_goal_ml\": 2500}").unwrap();
        assert_eq!(s.water_goal_ml, 2500);
        assert_eq!(s.dose_times, default_dose_times());
        assert!(s.reminders_enabled);
    }
}
