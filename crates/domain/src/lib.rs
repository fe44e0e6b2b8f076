//! `tn-domain`: types shared by every topicnode crate: the error
//! taxonomy, node configuration, and structured trace events.

pub mod config;
pub mod error;
pub mod trace;

pub use error::{Error, Result};
