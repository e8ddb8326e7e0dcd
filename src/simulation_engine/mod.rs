// simulation_engine/mod.rs
pub mod intersection;
pub mod lanes;
pub mod simulation;
pub mod vehicles;
