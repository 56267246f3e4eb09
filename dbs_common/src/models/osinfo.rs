use crate::db::write_error;
use crate::prelude::*;
use crate::record::OsInfoRecord;
use crate::schema::*;
use crate::upsert::Dimension;

/// The operating system a dataset was produced on.
#[derive(Clone, Debug, Insertable, PartialEq, Queryable, Serialize)]
#[table_name = "osinfo"]
pub struct OsInfo {
    /// The surrogate id of this OS.
    pub os_id: i64,
    /// The unique name of this OS.
    pub name: String,
    /// The kernel it was running.
    pub kernel: String,
    /// The OS release.
    pub version: String,
}

impl<'a> From<&'a OsInfoRecord> for OsInfo {
    fn from(record: &'a OsInfoRecord) -> OsInfo {
        OsInfo {
            os_id: 0,
            name: record.name.clone(),
            kernel: record.kernel.clone(),
            version: record.version.clone(),
        }
    }
}

impl Dimension for OsInfo {
    const ENTITY: Entity = Entity::OsInfo;

    fn natural_key(&self) -> &str {
        &self.name
    }

    fn set_id(&mut self, id: i64) {
        self.os_id = id;
    }

    fn insert(&self, conn: Conn<'_>) -> Result<()> {
        with_conn!(conn, |c| diesel::insert_into(osinfo::table)
            .values(self)
            .execute(c))
        .map_err(|err| {
            write_error(
                err.into(),
                format!("cannot insert osinfo {:?}", self.name),
                "dbs.osinfo.insert",
            )
        })?;
        Ok(())
    }
}
