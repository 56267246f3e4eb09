use crate::db::write_error;
use crate::prelude::*;
use crate::schema::*;
use crate::upsert::Dimension;

/// A facility at which data was taken or processed.
#[derive(Clone, Debug, Insertable, PartialEq, Queryable, Serialize)]
#[table_name = "sites"]
pub struct Site {
    /// The surrogate id of this site.
    pub site_id: i64,
    /// The unique name of this site.
    pub site: String,
}

impl Site {
    /// A site which has not been stored yet.
    pub fn new(site: &str) -> Site {
        Site {
            site_id: 0,
            site: site.to_owned(),
        }
    }
}

impl Dimension for Site {
    const ENTITY: Entity = Entity::Site;

    fn natural_key(&self) -> &str {
        &self.site
    }

    fn set_id(&mut self, id: i64) {
        self.site_id = id;
    }

    fn insert(&self, conn: Conn<'_>) -> Result<()> {
        with_conn!(conn, |c| diesel::insert_into(sites::table)
            .values(self)
            .execute(c))
        .map_err(|err| {
            write_error(
                err.into(),
                format!("cannot insert site {:?}", self.site),
                "dbs.sites.insert",
            )
        })?;
        Ok(())
    }
}
