pub mod arbiter;
pub mod controller;
pub mod detection;
pub mod passage;
pub mod signal_commander;
pub mod topology;
