#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

mod limiter;
pub use limiter::*;

mod rules;
pub use rules::*;

mod engine;
pub use engine::*;

mod time;
pub use time::*;

mod error;
pub use error::*;

mod script;

#[cfg(test)]
mod tests;
