use crate::db::write_error;
use crate::prelude::*;
use crate::record::EnvironmentRecord;
use crate::schema::*;
use crate::upsert::Dimension;

/// A software environment (for example, a Python installation) used to
/// produce a dataset.
#[derive(Clone, Debug, Insertable, PartialEq, Queryable, Serialize)]
#[table_name = "environments"]
pub struct Environment {
    /// The surrogate id of this environment.
    pub environment_id: i64,
    /// The unique name of this environment.
    pub name: String,
    /// The version of this environment.
    pub version: String,
    /// Free-form details, such as a package list.
    pub details: String,
    /// The OS this environment was first recorded on.
    pub os_id: Option<i64>,
}

impl Environment {
    /// An environment which has not been stored yet, recorded on `os_id`.
    pub fn new(record: &EnvironmentRecord, os_id: i64) -> Environment {
        Environment {
            environment_id: 0,
            name: record.name.clone(),
            version: record.version.clone(),
            details: record.details.clone(),
            os_id: Some(os_id),
        }
    }
}

impl Dimension for Environment {
    const ENTITY: Entity = Entity::Environment;

    fn natural_key(&self) -> &str {
        &self.name
    }

    fn set_id(&mut self, id: i64) {
        self.environment_id = id;
    }

    fn insert(&self, conn: Conn<'_>) -> Result<()> {
        with_conn!(conn, |c| diesel::insert_into(environments::table)
            .values(self)
            .execute(c))
        .map_err(|err| {
            write_error(
                err.into(),
                format!("cannot insert environment {:?}", self.name),
                "dbs.environments.insert",
            )
        })?;
        Ok(())
    }
}
