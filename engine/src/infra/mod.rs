//! Infrastructure layer

pub mod docker;
pub mod pty;
