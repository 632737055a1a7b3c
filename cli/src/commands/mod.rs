mod day;
mod helpers;
mod sync;

pub(crate) use day::{
    cmd_eat_meal, cmd_item_add, cmd_item_list, cmd_item_remove, cmd_item_take, cmd_mood,
    cmd_reset, cmd_sleep, cmd_steps, cmd_take_dose, cmd_today, cmd_walk, cmd_water, cmd_weight,
    cmd_workout,
};
pub(crate) use sync::{BootstrapAction, cmd_bootstrap, cmd_connect, cmd_status, cmd_sync};
