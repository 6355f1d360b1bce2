#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// #![warn(clippy::cargo)]

pub mod config;
pub mod constants;
pub mod diagnostics;
pub mod math;
pub mod minimisation;
pub mod outlier;
pub mod schedule;
pub mod time;
pub mod timelag;

pub type Result<T> = ::std::result::Result<T, Box<dyn ::std::error::Error>>;
