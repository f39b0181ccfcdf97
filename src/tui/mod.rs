//! Terminal miniplayer
//!
//! Ratatui front end over the playback controller.

mod app;
mod help;
mod ui;

pub use app::run;
