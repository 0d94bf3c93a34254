#![forbid(unsafe_code)]

pub mod model;
pub mod policy;
pub mod time;

pub use policy::{GatingPolicy, PolicyError};
pub use time::Clock;
