//! Reference scripts built on the runtime

pub mod idle;

pub use idle::{IdleData, IdleScript};
