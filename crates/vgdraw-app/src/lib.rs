//! vgdraw replay tool
//!
//! Drives a kernel view from a JSON touch script, headless, and writes the
//! resulting `.vg` document.

pub mod script;

pub use script::{Event, Replay, ReplaySummary, Script, ScriptError, Step, run_file};
