//! Code shared between the B-Fabric app runner tools.
//!
//! The pipeline runs in four stages: a workunit is dispatched into chunks
//! ([`dispatch`]), the inputs of each chunk are staged ([`inputs`]), the
//! application command processes the chunk ([`commands`]), and the produced
//! files are registered with the LIMS ([`outputs`]). The [`runner`] module
//! strings these together.

#![warn(missing_docs)]

pub mod checksums;
pub mod client;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod entities;
pub mod errors;
pub mod inputs;
pub mod outputs;
pub mod process;
pub mod runner;
pub mod scp;
pub mod specs;
pub mod tabular;
#[cfg(test)]
mod testing;
pub mod tracing_support;
pub mod workunit_definition;

/// Common imports used by many modules.
pub mod prelude {
    pub use anyhow::{format_err, Context as _};
    pub use chrono::NaiveDateTime;
    pub use serde::{Deserialize, Serialize};
    pub use std::{
        collections::{BTreeMap, HashMap},
        fmt,
        fs::{self, File},
        io::Write,
        path::{Path, PathBuf},
    };
    pub use tracing::{debug, error, info, instrument, trace, warn};

    pub use super::client::{Client, Query, Record};
    pub use super::entities::{EntityType, Lims};
    pub use super::errors::RunnerError;
    pub use super::{Error, Result};
}

/// Error type for this crate's functions.
pub use anyhow::Error;

/// Result type for this crate's functions.
pub type Result<T, E = Error> = std::result::Result<T, E>;
