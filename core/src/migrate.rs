//! In-memory upgrades for records and settings persisted by older clients.
//!
//! Records carry an explicit `schema_version`; records written before the
//! field existed are classified by shape, then run through an ordered chain
//! of per-step upgrade functions. Every step is pure and total: anything
//! unreadable degrades to the canonical empty value rather than erroring.

use serde_json::{Map, Value, json};

use crate::models::{DayRecord, SCHEMA_VERSION, Settings};

/// Upgrade a raw persisted record to the current [`DayRecord`] shape.
///
/// Never fails: non-object input and undecodable results both collapse to
/// the empty record, which the emptiness checks then skip.
#[must_use]
pub fn upgrade_record(raw: Value) -> DayRecord {
    let Value::Object(mut map) = raw else {
        return DayRecord::empty();
    };

    let mut version = detect_version(&map);
    if version < 1 {
        upgrade_record_v0_to_v1(&mut map);
        version = 1;
    }
    if version < 2 {
        upgrade_record_v1_to_v2(&mut map);
    }
    map.insert("schema_version".to_string(), json!(SCHEMA_VERSION));

    serde_json::from_value(Value::Object(map)).unwrap_or_else(|_| DayRecord::empty())
}

/// Version of a stored record. Records predating the `schema_version` field
/// are classified by the fields only that generation wrote.
fn detect_version(map: &Map<String, Value>) -> i64 {
    if let Some(v) = map.get("schema_version").and_then(Value::as_i64) {
        return v;
    }
    let has_v0_shape = map.contains_key("med_morning")
        || map.contains_key("med_noon")
        || map.contains_key("med_evening")
        || map.contains_key("workout_done");
    if has_v0_shape { 0 } else { 1 }
}

/// v0 → v1: named medication slots become the dose list; the boolean
/// "workout done" becomes a minutes value (30, the smallest preset).
fn upgrade_record_v0_to_v1(map: &mut Map<String, Value>) {
    let slots = ["med_morning", "med_noon", "med_evening"];
    if slots.iter().any(|s| map.contains_key(*s)) {
        let doses: Vec<Value> = slots
            .iter()
            .filter_map(|s| map.remove(*s))
            .map(|v| if v.is_object() { v } else { json!({}) })
            .collect();
        map.entry("med_doses".to_string()).or_insert(json!(doses));
    }

    if let Some(done) = map.remove("workout_done") {
        if done.as_bool() == Some(true) && !map.contains_key("workout_minutes") {
            map.insert("workout_minutes".to_string(), json!(30));
        }
    }
}

/// v1 → v2: the flat per-meal fields become the meal list. Newly introduced
/// collections (water log, workout sessions, custom items) default via serde.
fn upgrade_record_v1_to_v2(map: &mut Map<String, Value>) {
    let legacy_meals = ["lunch", "smoothie", "snack"];
    let mut meals: Vec<Value> = Vec::new();
    for name in legacy_meals {
        let eaten = map.remove(&format!("{name}_eaten"));
        let eaten_at = map.remove(&format!("{name}_at"));
        let note = map.remove(&format!("{name}_note"));
        if eaten.is_some() || eaten_at.is_some() || note.is_some() {
            meals.push(json!({
                "name": name,
                "eaten": eaten.and_then(|v| v.as_bool()).unwrap_or(false),
                "eaten_at": eaten_at.and_then(|v| v.as_i64()),
                "note": note.and_then(|v| v.as_str().map(String::from)).unwrap_or_default(),
            }));
        }
    }
    if !meals.is_empty() {
        map.entry("meals".to_string()).or_insert(json!(meals));
    }
}

/// Upgrade a raw persisted settings object to the current [`Settings`]
/// shape. Same contract as [`upgrade_record`]: total, defaults on failure.
#[must_use]
pub fn upgrade_settings(raw: Value) -> Settings {
    let Value::Object(mut map) = raw else {
        return Settings::default();
    };

    // Single dose-time string predates the per-dose schedule list.
    if let Some(single) = map.remove("dose_time") {
        if !map.contains_key("dose_times") {
            if let Some(s) = single.as_str() {
                map.insert("dose_times".to_string(), json!([s]));
            }
        }
    }

    serde_json::from_value(Value::Object(map)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_record_passes_through() {
        let mut rec = DayRecord::empty();
        rec.water_ml = 750;
        rec.walk_done = true;
        let raw = serde_json::to_value(&rec).unwrap();
        assert_eq!(upgrade_record(raw), rec);
    }

    #[test]
    fn test_v0_named_slots_become_dose_list() {
        let raw = json!({
            "med_morning": { "taken": true, "taken_at": 1_700_000_000_000_i64 },
            "med_noon": { "taken": false, "taken_at": null },
            "med_evening": { "taken": true, "taken_at": null },
        });
        let rec = upgrade_record(raw);
        assert_eq!(rec.schema_version, SCHEMA_VERSION);
        assert_eq!(rec.med_doses.len(), 3);
        assert!(rec.med_doses[0].taken);
        assert_eq!(rec.med_doses[0].taken_at, Some(1_700_000_000_000));
        assert!(!rec.med_doses[1].taken);
        assert!(rec.med_doses[2].taken);
        assert!(!rec.is_empty());
    }

    #[test]
    fn test_v0_partial_slots() {
        let raw = json!({ "med_morning": { "taken": true } });
        let rec = upgrade_record(raw);
        assert_eq!(rec.med_doses.len(), 1);
        assert!(rec.med_doses[0].taken);
    }

    #[test]
    fn test_v0_workout_done_true_becomes_minutes() {
        let rec = upgrade_record(json!({ "workout_done": true }));
        assert_eq!(rec.workout_minutes, Some(30));
    }

    #[test]
    fn test_v0_workout_done_false_stays_unset() {
        let rec = upgrade_record(json!({ "workout_done": false }));
        assert!(rec.workout_minutes.is_none());
        assert!(rec.is_empty());
    }

    #[test]
    fn test_v1_flat_meals_become_list() {
        let raw = json!({
            "lunch_eaten": true,
            "lunch_at": 1_700_000_123_000_i64,
            "lunch_note": "leftovers",
            "snack_eaten": false,
            "water_ml": 500,
        });
        let rec = upgrade_record(raw);
        assert_eq!(rec.meals.len(), 2);
        assert_eq!(rec.meals[0].name, "lunch");
        assert!(rec.meals[0].eaten);
        assert_eq!(rec.meals[0].eaten_at, Some(1_700_000_123_000));
        assert_eq!(rec.meals[0].note, "leftovers");
        assert_eq!(rec.meals[1].name, "snack");
        assert!(!rec.meals[1].eaten);
        assert_eq!(rec.water_ml, 500);
    }

    #[test]
    fn test_v0_upgrades_through_both_steps() {
        let raw = json!({
            "med_morning": { "taken": true },
            "workout_done": true,
            "lunch_eaten": true,
        });
        let rec = upgrade_record(raw);
        assert_eq!(rec.med_doses.len(), 1);
        assert_eq!(rec.workout_minutes, Some(30));
        assert_eq!(rec.meals.len(), 1);
        assert_eq!(rec.meals[0].name, "lunch");
    }

    #[test]
    fn test_explicit_version_skips_sniffing() {
        // A current-version record that happens to carry a legacy-looking
        // key must not be reinterpreted.
        let raw = json!({
            "schema_version": 2,
            "water_ml": 100,
            "workout_done": true,
        });
        let rec = upgrade_record(raw);
        assert_eq!(rec.water_ml, 100);
        assert!(rec.workout_minutes.is_none());
    }

    #[test]
    fn test_non_object_degrades_to_empty() {
        assert!(upgrade_record(json!(null)).is_empty());
        assert!(upgrade_record(json!("nonsense")).is_empty());
        assert!(upgrade_record(json!([1, 2, 3])).is_empty());
        assert!(upgrade_record(json!(42)).is_empty());
    }

    #[test]
    fn test_wrongly_typed_fields_degrade_to_empty() {
        // water_ml as a string fails typed decoding; the record collapses
        // to empty rather than erroring.
        let rec = upgrade_record(json!({ "schema_version": 2, "water_ml": "lots" }));
        assert!(rec.is_empty());
    }

    #[test]
    fn test_empty_object_is_empty_record() {
        let rec = upgrade_record(json!({}));
        assert!(rec.is_empty());
        assert_eq!(rec.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn test_settings_legacy_single_dose_time() {
        let s = upgrade_settings(json!({ "dose_time": "08:00" }));
        assert_eq!(s.dose_times, vec!["08:00".to_string()]);
    }

    #[test]
    fn test_settings_defaults_merged() {
        let s = upgrade_settings(json!({ "water_goal_ml": 3000 }));
        assert_eq!(s.water_goal_ml, 3000);
        assert_eq!(s.dose_times.len(), 3);
        assert!(s.reminders_enabled);
    }

    #[test]
    fn test_settings_non_object_degrades_to_default() {
        assert_eq!(upgrade_settings(json!(null)), Settings::default());
        assert_eq!(upgrade_settings(json!("x")), Settings::default());
    }
}
