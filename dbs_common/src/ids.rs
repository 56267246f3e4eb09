//! Surrogate id assignment.
//!
//! Every row we create gets an integer id which we pick ourselves before
//! inserting, so that the same code works whether or not the backend has
//! sequences. Which strategy we use is decided once, from configuration.

use diesel::dsl::max;

use crate::prelude::*;
use crate::schema::*;

mod functions {
    use diesel::sql_types::*;

    sql_function!(fn nextval(sequence: Text) -> BigInt);
}

use self::functions::nextval;

/// A table holding entities with surrogate ids and natural keys.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Entity {
    /// `datasets`, keyed by `did`.
    Dataset,
    /// `sites`, keyed by `site`.
    Site,
    /// `osinfo`, keyed by `name`.
    OsInfo,
    /// `environments`, keyed by `name`.
    Environment,
    /// `scripts`, keyed by `name`.
    Script,
    /// `processing`, keyed by `name`.
    Processing,
    /// `buckets`, keyed by `bucket`.
    Bucket,
    /// `files`, keyed by `file`.
    File,
}

impl Entity {
    /// The table this entity lives in.
    pub fn table_name(self) -> &'static str {
        match self {
            Entity::Dataset => "datasets",
            Entity::Site => "sites",
            Entity::OsInfo => "osinfo",
            Entity::Environment => "environments",
            Entity::Script => "scripts",
            Entity::Processing => "processing",
            Entity::Bucket => "buckets",
            Entity::File => "files",
        }
    }

    /// The PostgreSQL sequence which hands out ids for this entity.
    pub fn sequence_name(self) -> &'static str {
        match self {
            Entity::Dataset => "seq_datasets",
            Entity::Site => "seq_sites",
            Entity::OsInfo => "seq_osinfo",
            Entity::Environment => "seq_environments",
            Entity::Script => "seq_scripts",
            Entity::Processing => "seq_processing",
            Entity::Bucket => "seq_buckets",
            Entity::File => "seq_files",
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.table_name().fmt(f)
    }
}

/// Hands out the next surrogate id for a table. Implementations are called
/// inside the active transaction, immediately before the insert which uses
/// the id.
pub trait SurrogateIds: fmt::Debug + Send + Sync {
    /// Return an id for a new row of `entity`.
    fn next_id(&self, conn: Conn<'_>, entity: Entity) -> Result<i64>;
}

/// How should we assign surrogate ids?
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    /// Read the largest id in the table and add one. Works everywhere.
    LastId,
    /// Ask a named sequence. PostgreSQL only.
    Sequence,
}

impl IdStrategy {
    /// The natural strategy for `backend`.
    pub fn default_for(backend: Backend) -> IdStrategy {
        match backend {
            Backend::Postgres => IdStrategy::Sequence,
            Backend::Sqlite => IdStrategy::LastId,
        }
    }

    /// Can `backend` use this strategy?
    pub fn is_supported_by(self, backend: Backend) -> bool {
        !(self == IdStrategy::Sequence && backend == Backend::Sqlite)
    }

    /// Build the id source for this strategy.
    pub fn surrogate_ids(self) -> Arc<dyn SurrogateIds> {
        match self {
            IdStrategy::LastId => Arc::new(LastIdPlusOne),
            IdStrategy::Sequence => Arc::new(Sequences),
        }
    }
}

/// `MAX(id) + 1`, for backends without sequences.
#[derive(Debug, Default)]
pub struct LastIdPlusOne;

impl SurrogateIds for LastIdPlusOne {
    fn next_id(&self, conn: Conn<'_>, entity: Entity) -> Result<i64> {
        let last: QueryResult<Option<i64>> = with_conn!(conn, |c| match entity {
            Entity::Dataset => datasets::table
                .select(max(datasets::dataset_id))
                .first::<Option<i64>>(c),
            Entity::Site => sites::table.select(max(sites::site_id)).first::<Option<i64>>(c),
            Entity::OsInfo => osinfo::table.select(max(osinfo::os_id)).first::<Option<i64>>(c),
            Entity::Environment => environments::table
                .select(max(environments::environment_id))
                .first::<Option<i64>>(c),
            Entity::Script => scripts::table
                .select(max(scripts::script_id))
                .first::<Option<i64>>(c),
            Entity::Processing => processing::table
                .select(max(processing::processing_id))
                .first::<Option<i64>>(c),
            Entity::Bucket => buckets::table
                .select(max(buckets::bucket_id))
                .first::<Option<i64>>(c),
            Entity::File => files::table.select(max(files::file_id)).first::<Option<i64>>(c),
        });
        let last = last.with_context(|| {
            DbsError::storage(format!("cannot read last id of {}", entity), "dbs.ids.last_id")
        })?;
        Ok(last.unwrap_or(0) + 1)
    }
}

/// `nextval('seq_<table>')`, for PostgreSQL.
#[derive(Debug, Default)]
pub struct Sequences;

impl SurrogateIds for Sequences {
    fn next_id(&self, conn: Conn<'_>, entity: Entity) -> Result<i64> {
        match conn {
            Conn::Postgres(c) => Ok(diesel::select(nextval(entity.sequence_name()))
                .get_result::<i64>(c)
                .with_context(|| {
                    DbsError::storage(
                        format!("cannot increment {}", entity.sequence_name()),
                        "dbs.ids.sequence",
                    )
                })?),
            Conn::Sqlite(_) => Err(DbsError::storage(
                format!("{} has no sequences for {}", conn.backend(), entity),
                "dbs.ids.sequence",
            )
            .into()),
        }
    }
}
