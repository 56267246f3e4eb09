use crate::db::write_error;
use crate::prelude::*;
use crate::schema::*;
use crate::upsert::Dimension;

/// A file belonging to a dataset.
#[derive(Clone, Debug, Insertable, PartialEq, Queryable, Serialize)]
#[table_name = "files"]
pub struct File {
    /// The surrogate id of this file.
    pub file_id: i64,
    /// The unique name of this file.
    pub file: String,
    /// 1 if this file is valid, 0 otherwise.
    pub is_file_valid: i32,
    /// The dataset which owns this file.
    pub dataset_id: i64,
    /// When this record was created.
    pub create_at: i64,
    /// Who created this record.
    pub create_by: String,
    /// When this record was last modified.
    pub modify_at: i64,
    /// Who last modified this record.
    pub modify_by: String,
}

impl File {
    /// A valid file owned by `dataset_id` which has not been stored yet.
    pub fn new(file: &str, dataset_id: i64, actor: &str) -> File {
        let now = Utc::now().timestamp();
        File {
            file_id: 0,
            file: file.to_owned(),
            is_file_valid: 1,
            dataset_id,
            create_at: now,
            create_by: actor.to_owned(),
            modify_at: now,
            modify_by: actor.to_owned(),
        }
    }
}

impl Dimension for File {
    const ENTITY: Entity = Entity::File;

    fn natural_key(&self) -> &str {
        &self.file
    }

    fn set_id(&mut self, id: i64) {
        self.file_id = id;
    }

    fn insert(&self, conn: Conn<'_>) -> Result<()> {
        with_conn!(conn, |c| diesel::insert_into(files::table)
            .values(self)
            .execute(c))
        .map_err(|err| {
            write_error(
                err.into(),
                format!("cannot insert file {:?}", self.file),
                "dbs.files.insert",
            )
        })?;
        Ok(())
    }
}
