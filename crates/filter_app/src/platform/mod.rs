mod app;
mod cli;
mod logging;
mod persistence;

pub use app::run_app;
