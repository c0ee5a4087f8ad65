//! Application plumbing for the cellfield runner.

pub mod runner;
pub mod seeding;
pub mod settings;

pub use runner::{RunReport, run_steps};
pub use seeding::{SPECIES, SeedSettings, seed_population};
pub use settings::{SettingsError, apply_overrides, load_config, parse_config, parse_override};
