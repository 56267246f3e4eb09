//! Code shared between the data bookkeeping (provenance) service and its
//! tools.
//!
//! The heart of this crate is [`provenance::Provenance`], which takes one
//! denormalized dataset description and stores it as a consistent graph of
//! rows in a single transaction.

#![warn(missing_docs)]

#[macro_use]
pub extern crate diesel;
#[macro_use]
extern crate diesel_migrations;
#[macro_use]
extern crate lazy_static;

pub use anyhow;
pub use chrono;
pub use serde_json;
pub use tracing;

#[macro_use]
pub mod db;
pub mod config;
pub mod errors;
pub mod ids;
pub mod lexicon;
pub mod links;
pub mod models;
pub mod provenance;
pub mod query;
pub mod record;
pub mod resolve;
pub mod rest_api;
#[allow(missing_docs, unused_imports)]
mod schema;
pub mod tracing_support;
pub mod upsert;

/// Common imports used by many modules.
pub mod prelude {
    pub use anyhow::{format_err, Context};
    pub use chrono::Utc;
    pub use diesel::{self, prelude::*, PgConnection, SqliteConnection};
    pub use serde::{Deserialize, Serialize};
    pub use std::{
        collections::HashMap,
        fmt,
        io::{self, Write},
        path::{Path, PathBuf},
        sync::Arc,
    };
    pub use tracing::{debug, error, info, instrument, trace, warn};

    pub use super::db::{Backend, Conn};
    pub use super::errors::{DbsError, ErrorKind};
    pub use super::ids::{Entity, SurrogateIds};
    pub use super::models::*;
    pub use super::{Error, Result};
}

/// Error type for this crate's functions.
pub use anyhow::Error;

/// Result type for this crate's functions.
pub type Result<T, E = Error> = ::std::result::Result<T, E>;

/// The version of `dbs_common` in use. The server reports this from
/// `/version`.
pub fn dbs_common_version() -> semver::Version {
    semver::Version::parse(env!("CARGO_PKG_VERSION"))
        .expect("could not parse built-in version")
}
