//! Recurring embedding schedules: descriptors, descriptions and the
//! countdown engine.

pub mod describe;
pub mod descriptor;
pub mod engine;

pub use describe::{describe, format_countdown};
pub use descriptor::{ScheduleDescriptor, ScheduleType};
pub use engine::{EngineSettings, ScheduleEngine, ScheduleView};
