//! Resolve-or-create for rows with a natural key.

use crate::db::is_unique_violation;
use crate::prelude::*;
use crate::resolve::resolve;

/// A row which can be looked up by a natural key and created on demand.
pub trait Dimension: fmt::Debug {
    /// Which table does this row belong to?
    const ENTITY: Entity;

    /// The unique, business-meaningful key of this row.
    fn natural_key(&self) -> &str;

    /// Set the surrogate id this row will be inserted with.
    fn set_id(&mut self, id: i64);

    /// Insert this row as-is.
    fn insert(&self, conn: Conn<'_>) -> Result<()>;
}

/// The outcome of [`upsert`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Upserted {
    /// The surrogate id of the row.
    pub id: i64,
    /// Did we create the row, or did it already exist?
    pub created: bool,
}

/// Find `row` by its natural key, or insert it with a fresh id from `ids`.
///
/// The insert runs in a savepoint. If it fails because somebody else
/// created the same key first, we look the key up again and use their row.
#[instrument(level = "debug", skip(ids, conn))]
pub fn upsert<D: Dimension>(
    ids: &dyn SurrogateIds,
    conn: Conn<'_>,
    mut row: D,
) -> Result<Upserted> {
    let entity = D::ENTITY;
    if let Some(id) = resolve(conn, entity, row.natural_key())? {
        return Ok(Upserted { id, created: false });
    }

    let id = ids.next_id(conn, entity)?;
    row.set_id(id);
    match conn.savepoint(|| row.insert(conn)) {
        Ok(()) => {
            debug!(%entity, id, key = row.natural_key(), "created");
            Ok(Upserted { id, created: true })
        }
        Err(err) if is_unique_violation(&err) => {
            match resolve(conn, entity, row.natural_key())? {
                Some(id) => {
                    warn!(
                        %entity,
                        id,
                        key = row.natural_key(),
                        "lost insert race, using existing row"
                    );
                    Ok(Upserted { id, created: false })
                }
                // The conflict was on the id, not the natural key.
                None => Err(err),
            }
        }
        Err(err) => Err(err),
    }
}
