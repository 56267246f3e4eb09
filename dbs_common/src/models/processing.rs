use crate::db::write_error;
use crate::prelude::*;
use crate::schema::*;
use crate::upsert::Dimension;

/// A named processing step which produced a dataset.
#[derive(Clone, Debug, Insertable, PartialEq, Queryable, Serialize)]
#[table_name = "processing"]
pub struct Processing {
    /// The surrogate id of this processing step.
    pub processing_id: i64,
    /// The unique label of this processing step.
    pub name: String,
}

impl Processing {
    /// A processing step which has not been stored yet.
    pub fn new(name: &str) -> Processing {
        Processing {
            processing_id: 0,
            name: name.to_owned(),
        }
    }
}

impl Dimension for Processing {
    const ENTITY: Entity = Entity::Processing;

    fn natural_key(&self) -> &str {
        &self.name
    }

    fn set_id(&mut self, id: i64) {
        self.processing_id = id;
    }

    fn insert(&self, conn: Conn<'_>) -> Result<()> {
        with_conn!(conn, |c| diesel::insert_into(processing::table)
            .values(self)
            .execute(c))
        .map_err(|err| {
            write_error(
                err.into(),
                format!("cannot insert processing {:?}", self.name),
                "dbs.processing.insert",
            )
        })?;
        Ok(())
    }
}
