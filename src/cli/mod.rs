pub mod analyze;
pub mod engine;
pub mod setup;
pub mod ui;
