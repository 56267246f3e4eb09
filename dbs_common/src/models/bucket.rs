use crate::db::write_error;
use crate::prelude::*;
use crate::schema::*;
use crate::upsert::Dimension;

/// A storage bucket holding a dataset's data.
#[derive(Clone, Debug, Insertable, PartialEq, Queryable, Serialize)]
#[table_name = "buckets"]
pub struct Bucket {
    /// The surrogate id of this bucket.
    pub bucket_id: i64,
    /// The unique name of this bucket.
    pub bucket: String,
    /// The dataset which owns this bucket.
    pub dataset_id: i64,
}

impl Bucket {
    /// A bucket owned by `dataset_id` which has not been stored yet.
    pub fn new(bucket: &str, dataset_id: i64) -> Bucket {
        Bucket {
            bucket_id: 0,
            bucket: bucket.to_owned(),
            dataset_id,
        }
    }
}

impl Dimension for Bucket {
    const ENTITY: Entity = Entity::Bucket;

    fn natural_key(&self) -> &str {
        &self.bucket
    }

    fn set_id(&mut self, id: i64) {
        self.bucket_id = id;
    }

    fn insert(&self, conn: Conn<'_>) -> Result<()> {
        with_conn!(conn, |c| diesel::insert_into(buckets::table)
            .values(self)
            .execute(c))
        .map_err(|err| {
            write_error(
                err.into(),
                format!("cannot insert bucket {:?}", self.bucket),
                "dbs.buckets.insert",
            )
        })?;
        Ok(())
    }
}
