pub mod analysis;
pub mod baseline;
pub mod bootstrap;
pub mod calibration;
pub mod config;
pub mod control;
pub mod error;
pub mod events;
pub mod fat_tail;
pub mod leverage;
pub mod regime;
pub mod returns;
pub mod simulation;
pub mod stats;
pub mod types;
