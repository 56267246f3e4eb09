//! Database models.
//!
//! Every model carries its own surrogate id, which is zero until the row has
//! been assigned one by [`crate::upsert::upsert`] or [`Dataset::insert`].

mod bucket;
mod dataset;
mod environment;
mod file;
mod osinfo;
mod processing;
mod script;
mod site;

pub use self::bucket::*;
pub use self::dataset::*;
pub use self::environment::*;
pub use self::file::*;
pub use self::osinfo::*;
pub use self::processing::*;
pub use self::script::*;
pub use self::site::*;
