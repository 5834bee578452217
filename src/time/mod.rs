//! Pure time-window evaluation — no I/O, no cloud calls.

pub mod window;

pub use window::{evaluate, TimeWindow, TimeWindowError, WeekdaySet};
