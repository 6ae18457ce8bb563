pub mod engine;
pub mod phase;
pub mod runner;
pub mod settings;
