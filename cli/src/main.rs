mod commands;
mod config;
mod remote;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process;

use crate::commands::{
    BootstrapAction, cmd_bootstrap, cmd_connect, cmd_eat_meal, cmd_item_add, cmd_item_list,
    cmd_item_remove, cmd_item_take, cmd_mood, cmd_reset, cmd_sleep, cmd_status, cmd_steps,
    cmd_sync, cmd_take_dose, cmd_today, cmd_walk, cmd_water, cmd_weight, cmd_workout,
};
use crate::config::Config;
use tend_core::hosted::HostedStore;
use tend_core::service::TrackerService;

#[derive(Parser)]
#[command(
    name = "tend",
    version,
    about = "A simple, local-first daily habit & health tracker",
    long_about = "\n\n  ████████╗███████╗███╗   ██╗██████╗
  ╚══██╔══╝██╔════╝████╗  ██║██╔══██╗
     ██║   █████╗  ██╔██╗ ██║██║  ██║
     ██║   ██╔══╝  ██║╚██╗██║██║  ██║
     ██║   ███████╗██║ ╚████║██████╔╝
     ╚═╝   ╚══════╝╚═╝  ╚═══╝╚═════╝
          tend to your days.
"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show everything logged for a day (defaults to today)
    Today {
        /// Date to show (YYYY-MM-DD, today, yesterday)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Track medication doses
    Med {
        #[command(subcommand)]
        command: MedCommands,
    },
    /// Track meals
    Meal {
        #[command(subcommand)]
        command: MealCommands,
    },
    /// Log water (in ml, accumulates over the day)
    Water {
        /// Amount in ml
        ml: i64,
        /// Date to log for (YYYY-MM-DD, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Log workout minutes
    Workout {
        /// Workout length in minutes
        minutes: i64,
        /// Date to log for (YYYY-MM-DD, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Mark the daily walk done
    Walk {
        /// Date to log for (YYYY-MM-DD, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Log a step count
    Steps {
        /// Steps for the day
        count: i64,
        /// Date to log for (YYYY-MM-DD, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Log body weight
    Weight {
        /// Weight value (number)
        value: f64,
        /// Unit: kg or lbs (default: kg)
        #[arg(short, long, default_value = "kg")]
        unit: String,
        /// Date to log for (YYYY-MM-DD, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Log bedtime and/or wake time
    Sleep {
        /// Bedtime as HH:MM
        #[arg(long)]
        bed: Option<String>,
        /// Wake time as HH:MM
        #[arg(long)]
        wake: Option<String>,
        /// Date to log for (YYYY-MM-DD, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Log a mood rating for a time-of-day slot
    Mood {
        /// Slot: morning, midday, evening
        slot: String,
        /// Rating 1-5
        rating: i64,
        /// Date to log for (YYYY-MM-DD, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage custom daily items (supplements, extra medication, ...)
    Item {
        #[command(subcommand)]
        command: ItemCommands,
    },
    /// Reset today to an empty record
    Reset {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Synchronize with your account
    Sync {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show connection and last-sync status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve the first-sync decision (upload, download, merge, later)
    Bootstrap {
        /// Action to take; omit to see the pending decision
        #[arg(value_enum)]
        action: Option<BootstrapAction>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Connect this device to a sync server
    Connect {
        /// Server URL (e.g. http://192.168.1.10:8080)
        url: String,
        /// Access token printed by `tend serve`
        token: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Start the sync backend server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
    },
}

#[derive(Subcommand)]
enum MedCommands {
    /// Mark a scheduled dose taken (slots are numbered from 1)
    Take {
        /// Dose slot number
        slot: usize,
        /// Date to log for (YYYY-MM-DD, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum MealCommands {
    /// Mark a meal eaten
    Eat {
        /// Meal name (e.g. lunch, smoothie, snack)
        name: String,
        /// Optional free-text note
        #[arg(long)]
        note: Option<String>,
        /// Date to log for (YYYY-MM-DD, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ItemCommands {
    /// Add a custom item
    Add {
        /// Item name
        name: String,
        /// Reminder time as HH:MM
        #[arg(long, default_value = "21:00")]
        time: String,
        /// Pills/portions per day
        #[arg(long, default_value = "1")]
        pills: i64,
        /// Current supply count
        #[arg(long, default_value = "0")]
        supply: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Mark an item taken for the day
    Take {
        /// Item id (see `tend item list`)
        id: String,
        /// Date to log for (YYYY-MM-DD, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List custom items
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a custom item
    Remove {
        /// Item id
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

#[allow(clippy::too_many_lines)]
async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let svc = TrackerService::open(&config.db_path)?;

    match cli.command {
        Commands::Serve { port, bind } => {
            let store = HostedStore::open(&config.hosted_db_path)?;
            let (token, _account, new_token) = config.load_or_create_server_token(&store)?;
            server::start_server(store, port, &bind, &token, new_token).await
        }
        Commands::Today { date, json } => cmd_today(&svc, date, json),
        Commands::Med { command } => match command {
            MedCommands::Take { slot, date, json } => cmd_take_dose(&svc, slot, date, json),
        },
        Commands::Meal { command } => match command {
            MealCommands::Eat {
                name,
                note,
                date,
                json,
            } => cmd_eat_meal(&svc, &name, note, date, json),
        },
        Commands::Water { ml, date, json } => cmd_water(&svc, ml, date, json),
        Commands::Workout {
            minutes,
            date,
            json,
        } => cmd_workout(&svc, minutes, date, json),
        Commands::Walk { date, json } => cmd_walk(&svc, date, json),
        Commands::Steps { count, date, json } => cmd_steps(&svc, count, date, json),
        Commands::Weight {
            value,
            unit,
            date,
            json,
        } => cmd_weight(&svc, value, &unit, date, json),
        Commands::Sleep {
            bed,
            wake,
            date,
            json,
        } => cmd_sleep(&svc, bed, wake, date, json),
        Commands::Mood {
            slot,
            rating,
            date,
            json,
        } => cmd_mood(&svc, &slot, rating, date, json),
        Commands::Item { command } => match command {
            ItemCommands::Add {
                name,
                time,
                pills,
                supply,
                json,
            } => cmd_item_add(&svc, &name, &time, pills, supply, json),
            ItemCommands::Take { id, date, json } => cmd_item_take(&svc, &id, date, json),
            ItemCommands::List { json } => cmd_item_list(&svc, json),
            ItemCommands::Remove { id, json } => cmd_item_remove(&svc, &id, json),
        },
        Commands::Reset { json } => cmd_reset(&svc, json),
        Commands::Sync { json } => cmd_sync(&svc, &config, json).await,
        Commands::Status { json } => cmd_status(&svc, &config, json),
        Commands::Bootstrap { action, json } => cmd_bootstrap(&svc, &config, action, json).await,
        Commands::Connect { url, token, json } => cmd_connect(&config, &url, &token, json).await,
    }
}
