//! Domain layer

pub mod container;
pub mod recording;
pub mod script;
pub mod types;
