//! Database utilities.
//!
//! We support two backends: PostgreSQL, which has sequences, and SQLite,
//! which does not. Most of our code is written against [`Conn`], a cheap
//! handle which can point at either, and uses [`with_conn!`] to run the same
//! diesel query against whichever connection type is present.

use diesel::{
    connection::{SimpleConnection, TransactionManager},
    r2d2::{ConnectionManager, CustomizeConnection, Error as R2d2Error},
    result::{DatabaseErrorKind, Error as DieselError},
    Connection as DieselConnection,
};
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::prelude::*;

/// Evaluate `$body` with `$c` bound to the concrete diesel connection
/// inside `$conn`, which must be a [`Conn`].
#[macro_export]
macro_rules! with_conn {
    ($conn:expr, |$c:ident| $body:expr) => {
        match $conn {
            $crate::db::Conn::Postgres($c) => $body,
            $crate::db::Conn::Sqlite($c) => $body,
        }
    };
}

/// Embed our migrations directly into the executable. We use submodules so
/// we can configure warnings, and because each backend needs its own SQL.
#[allow(unused_imports)]
mod postgres_migrations {
    embed_migrations!("migrations/postgres");

    // Re-export everything because it's private.
    pub use self::embedded_migrations::*;
}

#[allow(unused_imports)]
mod sqlite_migrations {
    embed_migrations!("migrations/sqlite");

    pub use self::embedded_migrations::*;
}

/// Which kind of database are we talking to?
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// PostgreSQL, which supports sequences.
    Postgres,
    /// SQLite, which does not.
    Sqlite,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Backend::Postgres => "postgres".fmt(f),
            Backend::Sqlite => "sqlite".fmt(f),
        }
    }
}

/// A borrowed connection to one of our backends. This is `Copy`, so it can
/// be handed to every step of a transaction.
#[derive(Clone, Copy)]
pub enum Conn<'a> {
    /// A PostgreSQL connection.
    Postgres(&'a PgConnection),
    /// A SQLite connection.
    Sqlite(&'a SqliteConnection),
}

impl<'a> Conn<'a> {
    /// Which backend does this connection talk to?
    pub fn backend(self) -> Backend {
        match self {
            Conn::Postgres(_) => Backend::Postgres,
            Conn::Sqlite(_) => Backend::Sqlite,
        }
    }

    /// Run `f` inside a transaction. If `f` fails, everything it wrote is
    /// rolled back. Failures which `f` did not classify itself (typically
    /// `BEGIN` or `COMMIT` failing) are reported as
    /// `ErrorKind::Transaction`, and so is a database which stayed busy for
    /// longer than our busy timeout.
    ///
    /// On SQLite, an outermost transaction starts with `BEGIN IMMEDIATE`, so
    /// it holds the write lock before its first read.
    pub fn transaction<T, F>(self, origin: &'static str, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let result = match self {
            Conn::Postgres(c) => c.transaction::<T, Error, _>(f),
            Conn::Sqlite(c) if TransactionManager::<SqliteConnection>::get_transaction_depth(c.transaction_manager()) == 0 => {
                c.immediate_transaction::<T, Error, _>(f)
            }
            Conn::Sqlite(c) => c.transaction::<T, Error, _>(f),
        };
        result.map_err(|err| {
            if is_busy(&err) {
                err.context(DbsError::new(
                    ErrorKind::Transaction,
                    "database is busy, try again",
                    origin,
                ))
            } else if err.downcast_ref::<DbsError>().is_some() {
                err
            } else {
                err.context(DbsError::new(
                    ErrorKind::Transaction,
                    "transaction failed",
                    origin,
                ))
            }
        })
    }

    /// Run `f` inside a savepoint nested in the current transaction. If `f`
    /// fails, only its own writes are discarded, and the enclosing
    /// transaction remains usable (PostgreSQL would otherwise refuse every
    /// later statement).
    pub fn savepoint<T, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        with_conn!(self, |c| c.transaction::<T, Error, _>(f))
    }
}

impl fmt::Debug for Conn<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Conn({})", self.backend())
    }
}

/// An owned connection to one of our backends.
pub enum Connection {
    /// A PostgreSQL connection.
    Postgres(PgConnection),
    /// A SQLite connection.
    Sqlite(SqliteConnection),
}

impl Connection {
    /// Borrow this connection.
    pub fn conn(&self) -> Conn<'_> {
        match self {
            Connection::Postgres(c) => Conn::Postgres(c),
            Connection::Sqlite(c) => Conn::Sqlite(c),
        }
    }
}

/// A pool of database connections.
#[derive(Clone)]
pub enum Pool {
    /// A pool of PostgreSQL connections.
    Postgres(r2d2::Pool<ConnectionManager<PgConnection>>),
    /// A pool of SQLite connections.
    Sqlite(r2d2::Pool<ConnectionManager<SqliteConnection>>),
}

impl Pool {
    /// Create a new connection pool as described by `config`.
    pub fn new(config: &DatabaseConfig) -> Result<Pool> {
        let url = config.url()?;
        debug!(backend = %config.backend, size = config.pool_size, "creating connection pool");
        let pool = match config.backend {
            Backend::Postgres => Pool::Postgres(build_pool(
                ConnectionManager::<PgConnection>::new(url),
                config,
                None,
            )?),
            Backend::Sqlite => Pool::Sqlite(build_pool(
                ConnectionManager::<SqliteConnection>::new(url),
                config,
                Some(Box::new(SqlitePragmas::from(config))),
            )?),
        };
        Ok(pool)
    }

    /// Check out a connection from the pool.
    pub fn get(&self) -> Result<PooledConnection> {
        match self {
            Pool::Postgres(pool) => Ok(PooledConnection::Postgres(
                pool.get().context("could not get a PostgreSQL connection")?,
            )),
            Pool::Sqlite(pool) => Ok(PooledConnection::Sqlite(
                pool.get().context("could not get a SQLite connection")?,
            )),
        }
    }
}

fn build_pool<C>(
    manager: ConnectionManager<C>,
    config: &DatabaseConfig,
    customizer: Option<Box<dyn CustomizeConnection<C, R2d2Error>>>,
) -> Result<r2d2::Pool<ConnectionManager<C>>>
where
    C: DieselConnection + 'static,
{
    let mut builder = r2d2::Pool::builder()
        .max_size(config.pool_size)
        .connection_timeout(config.connection_timeout);
    if let Some(customizer) = customizer {
        builder = builder.connection_customizer(customizer);
    }
    Ok(builder
        .build(manager)
        .context("could not create database connection pool")?)
}

/// Settings applied to every SQLite connection we open. Writers wait up to
/// `busy_timeout` for the lock instead of failing at once, and WAL mode lets
/// readers proceed while a writer holds it.
#[derive(Debug)]
struct SqlitePragmas {
    busy_timeout: Duration,
}

impl<'a> From<&'a DatabaseConfig> for SqlitePragmas {
    fn from(config: &'a DatabaseConfig) -> SqlitePragmas {
        SqlitePragmas {
            busy_timeout: config.busy_timeout,
        }
    }
}

impl SqlitePragmas {
    fn apply(&self, conn: &SqliteConnection) -> QueryResult<()> {
        conn.batch_execute(&format!(
            "PRAGMA busy_timeout = {}; PRAGMA journal_mode = WAL;",
            self.busy_timeout.as_millis(),
        ))
    }
}

impl CustomizeConnection<SqliteConnection, R2d2Error> for SqlitePragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), R2d2Error> {
        self.apply(conn).map_err(R2d2Error::QueryError)
    }
}

/// A connection checked out from a [`Pool`].
pub enum PooledConnection {
    /// A pooled PostgreSQL connection.
    Postgres(r2d2::PooledConnection<ConnectionManager<PgConnection>>),
    /// A pooled SQLite connection.
    Sqlite(r2d2::PooledConnection<ConnectionManager<SqliteConnection>>),
}

impl PooledConnection {
    /// Borrow this connection.
    pub fn conn(&self) -> Conn<'_> {
        match self {
            PooledConnection::Postgres(c) => Conn::Postgres(&**c),
            PooledConnection::Sqlite(c) => Conn::Sqlite(&**c),
        }
    }
}

/// Open a single connection, retrying with exponential backoff if the
/// configuration asks for it.
pub fn connect(config: &DatabaseConfig) -> Result<Connection> {
    let url = config.url()?;
    let retry = config.retry_connection;
    let conn = backoff::retry(backoff::ExponentialBackoff::default(), || {
        establish(config, &url).map_err(|err| {
            if retry {
                warn!("could not connect to database, will retry: {}", err);
                backoff::Error::transient(err)
            } else {
                backoff::Error::permanent(err)
            }
        })
    })
    // Unwrap the backoff error into something we can handle.
    .map_err(|err| match err {
        backoff::Error::Permanent(err) => err,
        backoff::Error::Transient { err, .. } => err,
    })?;
    Ok(conn)
}

fn establish(config: &DatabaseConfig, url: &str) -> Result<Connection> {
    match config.backend {
        Backend::Postgres => Ok(Connection::Postgres(
            PgConnection::establish(url)
                .with_context(|| format!("error connecting to {}", url))?,
        )),
        Backend::Sqlite => {
            let conn = SqliteConnection::establish(url)
                .with_context(|| format!("error opening {}", url))?;
            SqlitePragmas::from(config)
                .apply(&conn)
                .with_context(|| format!("error configuring {}", url))?;
            Ok(Connection::Sqlite(conn))
        }
    }
}

/// Run any pending migrations, and print them to `out`.
pub fn run_pending_migrations(conn: Conn<'_>, out: &mut dyn Write) -> Result<()> {
    debug!("Running pending migrations");
    match conn {
        Conn::Postgres(c) => postgres_migrations::run_with_output(c, out),
        Conn::Sqlite(c) => sqlite_migrations::run_with_output(c, out),
    }
    .context("could not run database migrations")?;
    Ok(())
}

/// Did `err` come from a unique or primary key constraint?
pub fn is_unique_violation(err: &Error) -> bool {
    match err.downcast_ref::<DieselError>() {
        Some(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => true,
        // Some SQLite builds report primary key conflicts without the
        // extended result code diesel looks for.
        Some(DieselError::DatabaseError(_, info)) => {
            info.message().contains("UNIQUE constraint failed")
        }
        _ => false,
    }
}

/// Did `err` come from a database which was too busy to serve us, or from
/// a transaction the backend could not serialize? Both are worth retrying.
pub fn is_busy(err: &Error) -> bool {
    match err.downcast_ref::<DieselError>() {
        Some(DieselError::DatabaseError(DatabaseErrorKind::SerializationFailure, _)) => true,
        Some(DieselError::DatabaseError(_, info)) => {
            let message = info.message();
            message.contains("database is locked") || message.contains("database is busy")
        }
        _ => false,
    }
}

/// Classify an error from an `INSERT` or `UPDATE`: uniqueness violations are
/// conflicts, and everything else is a storage error.
pub fn write_error<M: Into<String>>(err: Error, message: M, origin: &'static str) -> Error {
    let kind = if is_unique_violation(&err) {
        ErrorKind::Conflict
    } else {
        ErrorKind::Storage
    };
    err.context(DbsError::new(kind, message, origin))
}

/// An empty in-memory SQLite database with our schema.
#[cfg(test)]
pub(crate) fn test_connection() -> Connection {
    let conn = SqliteConnection::establish(":memory:")
        .expect("could not open in-memory database");
    sqlite_migrations::run(&conn).expect("could not migrate in-memory database");
    Connection::Sqlite(conn)
}

/// A pool of connections to a fresh SQLite file in `dir`, with our schema.
#[cfg(test)]
pub(crate) fn test_file_pool(dir: &tempfile::TempDir, busy_timeout: &str) -> Pool {
    let path = dir.path().join("dbs.db").display().to_string();
    let yaml = format!(
        "database:\n  backend: sqlite\n  url: {:?}\n  pool_size: 4\n  busy_timeout: {}\n",
        path, busy_timeout,
    );
    let config = yaml
        .parse::<crate::config::Config>()
        .expect("could not parse test configuration");
    let pool = Pool::new(&config.database).expect("could not open test pool");
    let conn = pool.get().expect("could not get test connection");
    run_pending_migrations(conn.conn(), &mut io::sink())
        .expect("could not migrate test database");
    pool
}
