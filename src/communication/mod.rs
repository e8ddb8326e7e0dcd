pub mod messages;
pub mod telemetry;
