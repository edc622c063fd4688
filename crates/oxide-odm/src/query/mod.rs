//! Query building blocks.
//!
//! This module provides:
//! - [`Lookup`] values accepted by `filter`
//! - the [`Operator`] suffixes of the `field__op` key grammar
//! - driver-native [`expressions`]

pub mod expressions;
mod filter;

pub use expressions::{or, regex, Raw};
pub use filter::{Lookup, Operator};

pub(crate) use filter::compile;
