use crate::db::write_error;
use crate::prelude::*;
use crate::record::ScriptRecord;
use crate::schema::*;
use crate::upsert::Dimension;

/// The script which was run to produce a dataset.
#[derive(Clone, Debug, Insertable, PartialEq, Queryable, Serialize)]
#[table_name = "scripts"]
pub struct Script {
    /// The surrogate id of this script.
    pub script_id: i64,
    /// The unique name of this script.
    pub name: String,
    /// Options the script was run with.
    pub options: String,
}

impl<'a> From<&'a ScriptRecord> for Script {
    fn from(record: &'a ScriptRecord) -> Script {
        Script {
            script_id: 0,
            name: record.name.clone(),
            options: record.options.clone(),
        }
    }
}

impl Dimension for Script {
    const ENTITY: Entity = Entity::Script;

    fn natural_key(&self) -> &str {
        &self.name
    }

    fn set_id(&mut self, id: i64) {
        self.script_id = id;
    }

    fn insert(&self, conn: Conn<'_>) -> Result<()> {
        with_conn!(conn, |c| diesel::insert_into(scripts::table)
            .values(self)
            .execute(c))
        .map_err(|err| {
            write_error(
                err.into(),
                format!("cannot insert script {:?}", self.name),
                "dbs.scripts.insert",
            )
        })?;
        Ok(())
    }
}
