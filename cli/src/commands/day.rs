use anyhow::Result;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use tend_core::models::{DayRecord, Settings, weight_to_kg};
use tend_core::service::TrackerService;

use super::helpers::{check_mark, parse_date_key};

fn print_record(record: &DayRecord, json: bool, confirmation: &str) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(record)?);
    } else {
        println!("{confirmation}");
    }
    Ok(())
}

pub(crate) fn cmd_today(svc: &TrackerService, date: Option<String>, json: bool) -> Result<()> {
    let date_key = parse_date_key(date)?;
    let record = svc.day(&date_key)?;
    let settings = svc.settings()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    println!("{date_key}");

    let doses: Vec<String> = settings
        .dose_times
        .iter()
        .enumerate()
        .map(|(i, time)| {
            let taken = record.med_doses.get(i).is_some_and(|d| d.taken);
            format!("{} {time} [{}]", i + 1, check_mark(taken))
        })
        .collect();
    println!("  Medication: {}", if doses.is_empty() { "none scheduled".to_string() } else { doses.join("  ") });

    if record.meals.is_empty() {
        println!("  Meals:      none logged");
    } else {
        let meals: Vec<String> = record
            .meals
            .iter()
            .map(|m| {
                let mut s = format!("{} [{}]", m.name, check_mark(m.eaten));
                if !m.note.is_empty() {
                    s.push_str(&format!(" ({})", m.note));
                }
                s
            })
            .collect();
        println!("  Meals:      {}", meals.join("  "));
    }

    println!(
        "  Water:      {} ml / {} ml goal",
        record.water_ml, settings.water_goal_ml
    );

    let workout = record
        .workout_minutes
        .map_or("-".to_string(), |m| format!("{m} min"));
    let steps = record
        .steps_count
        .map_or("-".to_string(), |s| s.to_string());
    println!(
        "  Movement:   workout {workout}  walk [{}]  steps {steps}",
        check_mark(record.walk_done)
    );

    if !record.workout_sessions.is_empty() {
        let sessions: Vec<String> = record
            .workout_sessions
            .iter()
            .map(|s| format!("{} {} min", s.kind, s.minutes))
            .collect();
        println!("  Sessions:   {}", sessions.join(", "));
    }

    let weight = record
        .weight_kg
        .map_or("-".to_string(), |kg| format!("{kg:.1} kg"));
    println!("  Weight:     {weight}");

    println!(
        "  Sleep:      bed {}  wake {}",
        record.bedtime.as_deref().unwrap_or("-"),
        record.wake_time.as_deref().unwrap_or("-")
    );

    let mood = |v: Option<i64>| v.map_or("-".to_string(), |r| r.to_string());
    println!(
        "  Mood:       morning {}  midday {}  evening {}",
        mood(record.mood.morning),
        mood(record.mood.midday),
        mood(record.mood.evening)
    );

    if !settings.custom_items.is_empty() {
        let items: Vec<String> = settings
            .custom_items
            .iter()
            .map(|item| {
                let taken = record
                    .custom_taken
                    .get(&item.id)
                    .is_some_and(|mark| mark.taken);
                format!("{} [{}]", item.name, check_mark(taken))
            })
            .collect();
        println!("  Items:      {}", items.join("  "));
    }

    Ok(())
}

pub(crate) fn cmd_take_dose(
    svc: &TrackerService,
    slot: usize,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    anyhow::ensure!(slot >= 1, "Dose slots are numbered from 1");
    let date_key = parse_date_key(date)?;
    let record = svc.take_dose(&date_key, slot - 1)?;
    print_record(
        &record,
        json,
        &format!("Marked dose {slot} taken for {date_key}"),
    )
}

pub(crate) fn cmd_eat_meal(
    svc: &TrackerService,
    name: &str,
    note: Option<String>,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let date_key = parse_date_key(date)?;
    let record = svc.eat_meal(&date_key, name, note.as_deref())?;
    print_record(
        &record,
        json,
        &format!("Marked {} eaten for {date_key}", name.to_lowercase()),
    )
}

pub(crate) fn cmd_water(
    svc: &TrackerService,
    ml: i64,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let date_key = parse_date_key(date)?;
    let record = svc.add_water(&date_key, ml)?;
    print_record(
        &record,
        json,
        &format!("Logged {ml} ml for {date_key} ({} ml total)", record.water_ml),
    )
}

pub(crate) fn cmd_workout(
    svc: &TrackerService,
    minutes: i64,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let date_key = parse_date_key(date)?;
    let record = svc.log_workout(&date_key, minutes)?;
    print_record(
        &record,
        json,
        &format!("Logged a {minutes} minute workout for {date_key}"),
    )
}

pub(crate) fn cmd_walk(svc: &TrackerService, date: Option<String>, json: bool) -> Result<()> {
    let date_key = parse_date_key(date)?;
    let record = svc.mark_walk(&date_key)?;
    print_record(&record, json, &format!("Marked the walk done for {date_key}"))
}

pub(crate) fn cmd_steps(
    svc: &TrackerService,
    count: i64,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let date_key = parse_date_key(date)?;
    let record = svc.log_steps(&date_key, count)?;
    print_record(&record, json, &format!("Logged {count} steps for {date_key}"))
}

pub(crate) fn cmd_weight(
    svc: &TrackerService,
    value: f64,
    unit: &str,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let kg = weight_to_kg(value, unit)?;
    let date_key = parse_date_key(date)?;
    let record = svc.log_weight(&date_key, kg)?;
    print_record(&record, json, &format!("Logged {kg:.1} kg for {date_key}"))
}

pub(crate) fn cmd_sleep(
    svc: &TrackerService,
    bed: Option<String>,
    wake: Option<String>,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let date_key = parse_date_key(date)?;
    let record = svc.log_sleep(&date_key, bed.as_deref(), wake.as_deref())?;
    print_record(
        &record,
        json,
        &format!(
            "Logged sleep for {date_key} (bed {}, wake {})",
            record.bedtime.as_deref().unwrap_or("-"),
            record.wake_time.as_deref().unwrap_or("-")
        ),
    )
}

pub(crate) fn cmd_mood(
    svc: &TrackerService,
    slot: &str,
    rating: i64,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let date_key = parse_date_key(date)?;
    let record = svc.set_mood(&date_key, slot, rating)?;
    print_record(
        &record,
        json,
        &format!("Logged {} mood {rating}/5 for {date_key}", slot.to_lowercase()),
    )
}

pub(crate) fn cmd_item_add(
    svc: &TrackerService,
    name: &str,
    time: &str,
    pills: i64,
    supply: i64,
    json: bool,
) -> Result<()> {
    let item = svc.add_custom_item(name, time, pills, supply)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&item)?);
    } else {
        println!("Added item '{}' at {} (id {})", item.name, item.time, item.id);
    }
    Ok(())
}

pub(crate) fn cmd_item_take(
    svc: &TrackerService,
    id: &str,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let date_key = parse_date_key(date)?;
    let record = svc.take_custom(&date_key, id)?;
    print_record(&record, json, &format!("Marked item taken for {date_key}"))
}

pub(crate) fn cmd_item_remove(svc: &TrackerService, id: &str, json: bool) -> Result<()> {
    let removed = svc.remove_custom_item(id)?;
    if json {
        println!("{}", serde_json::json!({ "removed": removed }));
    } else if removed {
        println!("Removed item {id}");
    } else {
        eprintln!("No item with id {id}");
    }
    Ok(())
}

pub(crate) fn cmd_item_list(svc: &TrackerService, json: bool) -> Result<()> {
    let settings: Settings = svc.settings()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&settings.custom_items)?);
    } else if settings.custom_items.is_empty() {
        eprintln!("No custom items. Use `tend item add` to create one.");
    } else {
        #[derive(Tabled)]
        struct ItemRow {
            #[tabled(rename = "ID")]
            id: String,
            #[tabled(rename = "Name")]
            name: String,
            #[tabled(rename = "Time")]
            time: String,
            #[tabled(rename = "Per day")]
            pills_per_day: i64,
            #[tabled(rename = "Supply")]
            supply: i64,
        }

        let rows: Vec<ItemRow> = settings
            .custom_items
            .iter()
            .map(|i| ItemRow {
                id: i.id.clone(),
                name: i.name.clone(),
                time: i.time.clone(),
                pills_per_day: i.pills_per_day,
                supply: i.supply,
            })
            .collect();

        let table = Table::new(&rows)
            .with(Style::rounded())
            .with(Modify::new(Columns::new(3..5)).with(Alignment::right()))
            .to_string();
        println!("{table}");
    }

    Ok(())
}

pub(crate) fn cmd_reset(svc: &TrackerService, json: bool) -> Result<()> {
    svc.reset_today()?;
    if json {
        println!("{}", serde_json::json!({ "reset": true }));
    } else {
        println!("Reset today to an empty record");
    }
    Ok(())
}
