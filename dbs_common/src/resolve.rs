//! Looking up surrogate ids by natural key.

use crate::prelude::*;
use crate::schema::*;

/// Find the surrogate id of the `entity` row whose natural key is `key`.
///
/// Returns `Ok(None)` if there's no such row. This runs on whatever
/// transaction `conn` is in, so it sees rows written earlier in the same
/// submission.
pub fn resolve(conn: Conn<'_>, entity: Entity, key: &str) -> Result<Option<i64>> {
    let id: QueryResult<Option<i64>> = with_conn!(conn, |c| match entity {
        Entity::Dataset => datasets::table
            .select(datasets::dataset_id)
            .filter(datasets::did.eq(key))
            .first::<i64>(c)
            .optional(),
        Entity::Site => sites::table
            .select(sites::site_id)
            .filter(sites::site.eq(key))
            .first::<i64>(c)
            .optional(),
        Entity::OsInfo => osinfo::table
            .select(osinfo::os_id)
            .filter(osinfo::name.eq(key))
            .first::<i64>(c)
            .optional(),
        Entity::Environment => environments::table
            .select(environments::environment_id)
            .filter(environments::name.eq(key))
            .first::<i64>(c)
            .optional(),
        Entity::Script => scripts::table
            .select(scripts::script_id)
            .filter(scripts::name.eq(key))
            .first::<i64>(c)
            .optional(),
        Entity::Processing => processing::table
            .select(processing::processing_id)
            .filter(processing::name.eq(key))
            .first::<i64>(c)
            .optional(),
        Entity::Bucket => buckets::table
            .select(buckets::bucket_id)
            .filter(buckets::bucket.eq(key))
            .first::<i64>(c)
            .optional(),
        Entity::File => files::table
            .select(files::file_id)
            .filter(files::file.eq(key))
            .first::<i64>(c)
            .optional(),
    });
    let id = id.with_context(|| {
        DbsError::storage(format!("cannot look up {} {:?}", entity, key), "dbs.resolve")
    })?;
    trace!(%entity, key, ?id, "resolved");
    Ok(id)
}
