//! Service layer

pub mod backend;
pub mod container;
pub mod recorder;
pub mod session;
pub mod tracker;
