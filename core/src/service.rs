use std::path::Path;

use anyhow::{Result, ensure};
use uuid::Uuid;

use crate::db::Database;
use crate::models::{
    CustomItem, DayRecord, DoseMark, MealMark, Settings, WaterLogEntry, now_ms, validate_mood_rating,
    validate_mood_slot, validate_time_of_day, validate_water_amount, validate_weight,
};
use crate::sync::{self, Identity, RemoteStore, SyncContext, SyncResult};

/// Facade over the local store used by the CLI and any other front end.
///
/// Owns the session-scoped [`SyncContext`]: every mutation routes through
/// the normal save path and marks its date key as modified-this-session, so
/// a later sync in the same process can break timestamp ties in favor of
/// what was just typed.
pub struct TrackerService {
    db: Database,
    ctx: SyncContext,
}

impl TrackerService {
    pub fn open(db_path: &Path) -> Result<Self> {
        Ok(Self {
            db: Database::open(db_path)?,
            ctx: SyncContext::new(),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            db: Database::open_in_memory()?,
            ctx: SyncContext::new(),
        })
    }

    #[must_use]
    pub fn db(&self) -> &Database {
        &self.db
    }

    #[must_use]
    pub fn sync_context(&self) -> &SyncContext {
        &self.ctx
    }

    // --- Reads ---

    pub fn day(&self, date_key: &str) -> Result<DayRecord> {
        self.db.read_record(date_key)
    }

    pub fn last_sync_ms(&self) -> Result<Option<i64>> {
        self.db.last_sync_ms()
    }

    pub fn settings(&self) -> Result<Settings> {
        self.db.settings()
    }

    pub fn set_settings(&self, settings: &Settings) -> Result<()> {
        self.db.set_settings(settings)
    }

    // --- Day mutations ---

    fn mutate(
        &self,
        date_key: &str,
        apply: impl FnOnce(&mut DayRecord) -> Result<()>,
    ) -> Result<DayRecord> {
        let mut record = self.db.read_record(date_key)?;
        apply(&mut record)?;
        self.db.write_record(date_key, &record)?;
        self.ctx.mark_modified(date_key);
        Ok(record)
    }

    /// Mark dose `slot` (0-based, against the settings dose schedule) taken.
    pub fn take_dose(&self, date_key: &str, slot: usize) -> Result<DayRecord> {
        let dose_count = self.db.settings()?.dose_times.len();
        ensure!(
            slot < dose_count,
            "Dose slot {slot} out of range (schedule has {dose_count} doses)"
        );
        self.mutate(date_key, |rec| {
            if rec.med_doses.len() < dose_count {
                rec.med_doses.resize(dose_count, DoseMark::default());
            }
            rec.med_doses[slot] = DoseMark {
                taken: true,
                taken_at: Some(now_ms()),
            };
            Ok(())
        })
    }

    /// Mark a meal eaten, creating its entry on first touch.
    pub fn eat_meal(&self, date_key: &str, name: &str, note: Option<&str>) -> Result<DayRecord> {
        ensure!(!name.trim().is_empty(), "Meal name must not be empty");
        let name = name.trim().to_lowercase();
        self.mutate(date_key, |rec| {
            let idx = match rec.meals.iter().position(|m| m.name == name) {
                Some(idx) => idx,
                None => {
                    rec.meals.push(MealMark {
                        name: name.clone(),
                        ..MealMark::default()
                    });
                    rec.meals.len() - 1
                }
            };
            let meal = &mut rec.meals[idx];
            meal.eaten = true;
            meal.eaten_at = Some(now_ms());
            if let Some(note) = note {
                meal.note = note.to_string();
            }
            Ok(())
        })
    }

    pub fn add_water(&self, date_key: &str, amount_ml: i64) -> Result<DayRecord> {
        validate_water_amount(amount_ml)?;
        self.mutate(date_key, |rec| {
            rec.water_ml += amount_ml;
            rec.water_log.push(WaterLogEntry {
                amount_ml,
                at: Some(now_ms()),
            });
            Ok(())
        })
    }

    pub fn log_workout(&self, date_key: &str, minutes: i64) -> Result<DayRecord> {
        ensure!(minutes > 0, "Workout minutes must be greater than 0");
        self.mutate(date_key, |rec| {
            rec.workout_minutes = Some(minutes);
            Ok(())
        })
    }

    pub fn mark_walk(&self, date_key: &str) -> Result<DayRecord> {
        self.mutate(date_key, |rec| {
            rec.walk_done = true;
            Ok(())
        })
    }

    pub fn log_steps(&self, date_key: &str, count: i64) -> Result<DayRecord> {
        ensure!(count >= 0, "Step count must not be negative");
        self.mutate(date_key, |rec| {
            rec.steps_count = Some(count);
            Ok(())
        })
    }

    pub fn log_weight(&self, date_key: &str, kg: f64) -> Result<DayRecord> {
        validate_weight(kg)?;
        self.mutate(date_key, |rec| {
            rec.weight_kg = Some(kg);
            rec.weight_logged_at = Some(now_ms());
            Ok(())
        })
    }

    pub fn log_sleep(
        &self,
        date_key: &str,
        bedtime: Option<&str>,
        wake_time: Option<&str>,
    ) -> Result<DayRecord> {
        ensure!(
            bedtime.is_some() || wake_time.is_some(),
            "Provide a bedtime, a wake time, or both"
        );
        if let Some(t) = bedtime {
            validate_time_of_day(t)?;
        }
        if let Some(t) = wake_time {
            validate_time_of_day(t)?;
        }
        self.mutate(date_key, |rec| {
            if let Some(t) = bedtime {
                rec.bedtime = Some(t.to_string());
            }
            if let Some(t) = wake_time {
                rec.wake_time = Some(t.to_string());
            }
            Ok(())
        })
    }

    pub fn set_mood(&self, date_key: &str, slot: &str, rating: i64) -> Result<DayRecord> {
        let slot = validate_mood_slot(slot)?;
        validate_mood_rating(rating)?;
        self.mutate(date_key, |rec| {
            match slot.as_str() {
                "morning" => rec.mood.morning = Some(rating),
                "midday" => rec.mood.midday = Some(rating),
                _ => rec.mood.evening = Some(rating),
            }
            Ok(())
        })
    }

    /// Mark a custom item (by id) taken for the day.
    pub fn take_custom(&self, date_key: &str, item_id: &str) -> Result<DayRecord> {
        let settings = self.db.settings()?;
        ensure!(
            settings.custom_items.iter().any(|i| i.id == item_id),
            "No custom item with id '{item_id}'"
        );
        self.mutate(date_key, |rec| {
            rec.custom_taken.insert(
                item_id.to_string(),
                DoseMark {
                    taken: true,
                    taken_at: Some(now_ms()),
                },
            );
            Ok(())
        })
    }

    /// Record an imported workout session (from the external fitness
    /// importer), deduplicated by session id.
    pub fn record_workout_session(
        &self,
        date_key: &str,
        session: crate::models::WorkoutSession,
    ) -> Result<DayRecord> {
        ensure!(!session.id.is_empty(), "Workout session id must not be empty");
        self.mutate(date_key, |rec| {
            if !rec.workout_sessions.iter().any(|s| s.id == session.id) {
                rec.workout_sessions.push(session);
            }
            Ok(())
        })
    }

    /// Reset today to a fresh empty record. Does not mark the key modified:
    /// an empty record never wins a push, and a later pull may legitimately
    /// restore the account's copy.
    pub fn reset_today(&self) -> Result<()> {
        self.db.reset_today()
    }

    // --- Custom items ---

    pub fn add_custom_item(
        &self,
        name: &str,
        time: &str,
        pills_per_day: i64,
        supply: i64,
    ) -> Result<CustomItem> {
        ensure!(!name.trim().is_empty(), "Item name must not be empty");
        validate_time_of_day(time)?;
        ensure!(pills_per_day > 0, "pills_per_day must be greater than 0");
        let item = CustomItem {
            id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            time: time.to_string(),
            pills_per_day,
            supply,
        };
        let mut settings = self.db.settings()?;
        settings.custom_items.push(item.clone());
        self.db.set_settings(&settings)?;
        Ok(item)
    }

    pub fn remove_custom_item(&self, item_id: &str) -> Result<bool> {
        let mut settings = self.db.settings()?;
        let before = settings.custom_items.len();
        settings.custom_items.retain(|i| i.id != item_id);
        let removed = settings.custom_items.len() < before;
        if removed {
            self.db.set_settings(&settings)?;
        }
        Ok(removed)
    }

    // --- Sync ---

    pub async fn sync(&self, remote: &dyn RemoteStore, identity: &dyn Identity) -> SyncResult {
        sync::sync_now(&self.db, remote, identity, &self.ctx).await
    }
}
