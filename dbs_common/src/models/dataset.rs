use crate::db::write_error;
use crate::lexicon;
use crate::prelude::*;
use crate::schema::*;

/// A dataset: the primary record of the bookkeeping service.
///
/// A new `Dataset` starts out with `dataset_id == 0`. Call
/// [`set_defaults`](Dataset::set_defaults) and
/// [`validate`](Dataset::validate) before filling in its foreign keys and
/// calling [`insert`](Dataset::insert).
#[derive(Clone, Debug, Insertable, PartialEq, Queryable, Serialize)]
#[table_name = "datasets"]
pub struct Dataset {
    /// The surrogate id of this dataset. Zero until inserted.
    pub dataset_id: i64,
    /// The externally-assigned identity of this dataset.
    pub did: String,
    /// Where this dataset was produced, if known.
    pub site_id: Option<i64>,
    /// The processing step which produced this dataset.
    pub processing_id: i64,
    /// The OS this dataset was produced on.
    pub osinfo_id: i64,
    /// The dataset this one was derived from, if any.
    pub parent_id: Option<i64>,
    /// When this record was created, as a Unix timestamp.
    pub create_at: i64,
    /// Who created this record.
    pub create_by: String,
    /// When this record was last modified, as a Unix timestamp.
    pub modify_at: i64,
    /// Who last modified this record.
    pub modify_by: String,
}

impl Dataset {
    /// An empty dataset record for `did`, owned by `actor`.
    pub fn new(did: &str, actor: &str) -> Dataset {
        Dataset {
            dataset_id: 0,
            did: did.to_owned(),
            site_id: None,
            processing_id: 0,
            osinfo_id: 0,
            parent_id: None,
            create_at: 0,
            create_by: actor.to_owned(),
            modify_at: 0,
            modify_by: actor.to_owned(),
        }
    }

    /// Find a dataset by id.
    pub fn find(id: i64, conn: Conn<'_>) -> Result<Dataset> {
        with_conn!(conn, |c| datasets::table.find(id).first::<Dataset>(c))
            .with_context(|| format!("could not load dataset {}", id))
    }

    /// Find a dataset by `did`, if it exists.
    pub fn find_by_did(did: &str, conn: Conn<'_>) -> Result<Option<Dataset>> {
        with_conn!(conn, |c| datasets::table
            .filter(datasets::did.eq(did))
            .first::<Dataset>(c)
            .optional())
        .with_context(|| {
            DbsError::storage(format!("could not load dataset {:?}", did), "dbs.datasets.find")
        })
    }

    /// Fill in our timestamps, if they haven't been set yet.
    pub fn set_defaults(&mut self) {
        let now = Utc::now().timestamp();
        if self.create_at == 0 {
            self.create_at = now;
        }
        if self.modify_at == 0 {
            self.modify_at = now;
        }
    }

    /// Record that `actor` modified this dataset just now.
    pub fn touch(&mut self, actor: &str) {
        self.modify_at = Utc::now().timestamp();
        self.modify_by = actor.to_owned();
    }

    /// Check that this record can be stored, naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        const ORIGIN: &str = "dbs.datasets.validate";
        lexicon::check_did(&self.did)?;
        if self.create_at == 0 {
            return Err(DbsError::validation("missing create_at", ORIGIN).into());
        }
        if !lexicon::is_unix_time(self.create_at) {
            return Err(
                DbsError::validation("invalid pattern for creation date", ORIGIN).into(),
            );
        }
        if self.create_by.is_empty() {
            return Err(DbsError::validation("missing create_by", ORIGIN).into());
        }
        if self.modify_at == 0 {
            return Err(DbsError::validation("missing modify_at", ORIGIN).into());
        }
        if self.modify_by.is_empty() {
            return Err(DbsError::validation("missing modify_by", ORIGIN).into());
        }
        Ok(())
    }

    /// Insert this dataset, assigning it an id from `ids` if it doesn't have
    /// one yet. Returns the id.
    pub fn insert(&mut self, ids: &dyn SurrogateIds, conn: Conn<'_>) -> Result<i64> {
        const ORIGIN: &str = "dbs.datasets.insert";
        if self.dataset_id == 0 {
            self.dataset_id = ids.next_id(conn, Entity::Dataset)?;
        }
        self.set_defaults();
        self.validate()?;
        debug!(dataset = ?self, "inserting dataset");
        with_conn!(conn, |c| diesel::insert_into(datasets::table)
            .values(&*self)
            .execute(c))
        .map_err(|err| {
            write_error(err.into(), format!("cannot insert dataset {:?}", self.did), ORIGIN)
        })?;
        Ok(self.dataset_id)
    }

    /// Rewrite the mutable columns of an existing dataset: site, processing,
    /// parent and the modification audit fields.
    pub fn update(&mut self, conn: Conn<'_>) -> Result<()> {
        const ORIGIN: &str = "dbs.datasets.update";
        if self.dataset_id == 0 {
            return Err(DbsError::validation("dataset should have valid id", ORIGIN).into());
        }
        self.set_defaults();
        self.validate()?;
        debug!(dataset = ?self, "updating dataset");
        let target = datasets::table.filter(datasets::dataset_id.eq(self.dataset_id));
        let updated = with_conn!(conn, |c| diesel::update(target)
            .set((
                datasets::site_id.eq(self.site_id),
                datasets::processing_id.eq(self.processing_id),
                datasets::parent_id.eq(self.parent_id),
                datasets::modify_at.eq(self.modify_at),
                datasets::modify_by.eq(&self.modify_by),
            ))
            .execute(c))
        .map_err(|err| {
            write_error(err.into(), format!("cannot update dataset {:?}", self.did), ORIGIN)
        })?;
        if updated == 0 {
            return Err(DbsError::not_found(
                format!("no dataset with id {}", self.dataset_id),
                ORIGIN,
            )
            .into());
        }
        Ok(())
    }

    /// Delete this dataset, along with its files, buckets and association
    /// rows. Refuses if another dataset is derived from this one, or uses
    /// one of its files.
    pub fn delete(&self, conn: Conn<'_>) -> Result<()> {
        const ORIGIN: &str = "dbs.datasets.delete";
        let id = self.dataset_id;

        let linked_children: i64 = with_conn!(conn, |c| parents::table
            .filter(parents::parent_id.eq(id))
            .filter(parents::dataset_id.ne(id))
            .count()
            .get_result(c))
        .context("cannot count child datasets")?;
        let children: i64 = with_conn!(conn, |c| datasets::table
            .filter(datasets::parent_id.eq(id))
            .filter(datasets::dataset_id.ne(id))
            .count()
            .get_result(c))
        .context("cannot count child datasets")?;
        if linked_children + children > 0 {
            return Err(DbsError::conflict(
                format!("dataset {:?} is the parent of other datasets", self.did),
                ORIGIN,
            )
            .into());
        }

        let file_ids: Vec<i64> = with_conn!(conn, |c| files::table
            .select(files::file_id)
            .filter(files::dataset_id.eq(id))
            .load(c))
        .context("cannot list dataset files")?;
        let borrowed: i64 = with_conn!(conn, |c| datasets_files::table
            .filter(datasets_files::file_id.eq_any(&file_ids))
            .filter(datasets_files::dataset_id.ne(id))
            .count()
            .get_result(c))
        .context("cannot count file links")?;
        if borrowed > 0 {
            return Err(DbsError::conflict(
                format!("files of dataset {:?} are used by other datasets", self.did),
                ORIGIN,
            )
            .into());
        }

        debug!(dataset = ?self, files = file_ids.len(), "deleting dataset");
        let deleted = with_conn!(conn, |c| {
            diesel::delete(datasets_files::table.filter(datasets_files::dataset_id.eq(id)))
                .execute(c)
                .context("cannot delete file links")?;
            diesel::delete(files::table.filter(files::dataset_id.eq(id)))
                .execute(c)
                .context("cannot delete files")?;
            diesel::delete(buckets::table.filter(buckets::dataset_id.eq(id)))
                .execute(c)
                .context("cannot delete buckets")?;
            diesel::delete(
                dataset_environments::table.filter(dataset_environments::dataset_id.eq(id)),
            )
            .execute(c)
            .context("cannot delete environment links")?;
            diesel::delete(dataset_scripts::table.filter(dataset_scripts::dataset_id.eq(id)))
                .execute(c)
                .context("cannot delete script links")?;
            diesel::delete(
                parents::table.filter(parents::dataset_id.eq(id).or(parents::parent_id.eq(id))),
            )
            .execute(c)
            .context("cannot delete parent links")?;
            diesel::delete(datasets::table.filter(datasets::dataset_id.eq(id))).execute(c)
        })
        .with_context(|| {
            DbsError::storage(format!("cannot delete dataset {:?}", self.did), ORIGIN)
        })?;
        if deleted == 0 {
            return Err(DbsError::not_found(format!("no dataset {:?}", self.did), ORIGIN).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_connection;
    use crate::ids::LastIdPlusOne;

    #[test]
    fn set_defaults_is_idempotent() {
        let mut dataset = Dataset::new("ds-1", "alice");
        dataset.set_defaults();
        let (create_at, modify_at) = (dataset.create_at, dataset.modify_at);
        assert!(create_at > 0);
        dataset.set_defaults();
        assert_eq!(dataset.create_at, create_at);
        assert_eq!(dataset.modify_at, modify_at);
    }

    #[test]
    fn set_defaults_keeps_explicit_timestamps() {
        let mut dataset = Dataset::new("ds-1", "alice");
        dataset.create_at = 1_600_000_000;
        dataset.set_defaults();
        assert_eq!(dataset.create_at, 1_600_000_000);
        assert!(dataset.modify_at > 1_600_000_000);
    }

    fn validation_message(dataset: &Dataset) -> String {
        let err = dataset.validate().unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::Validation);
        err.downcast_ref::<DbsError>().unwrap().message.clone()
    }

    #[test]
    fn validate_names_the_bad_field() {
        let mut dataset = Dataset::new("ds-1", "alice");
        assert_eq!(validation_message(&dataset), "missing create_at");

        dataset.set_defaults();
        dataset.validate().unwrap();

        dataset.create_at = 12345;
        assert_eq!(validation_message(&dataset), "invalid pattern for creation date");

        dataset.set_defaults();
        dataset.create_at = 1_600_000_000;
        dataset.create_by = String::new();
        assert_eq!(validation_message(&dataset), "missing create_by");

        dataset.create_by = "alice".to_owned();
        dataset.modify_by = String::new();
        assert_eq!(validation_message(&dataset), "missing modify_by");
    }

    #[test]
    fn validate_checks_did() {
        let mut dataset = Dataset::new("not a did", "alice");
        dataset.set_defaults();
        let err = dataset.validate().unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::Validation);
    }

    #[test]
    fn insert_assigns_id_only_once() {
        let conn = test_connection();
        let conn = conn.conn();
        let mut dataset = Dataset::new("ds-1", "alice");
        assert_eq!(dataset.insert(&LastIdPlusOne, conn).unwrap(), 1);
        assert!(dataset.create_at > 0);

        let mut explicit = Dataset::new("ds-2", "alice");
        explicit.dataset_id = 10;
        assert_eq!(explicit.insert(&LastIdPlusOne, conn).unwrap(), 10);

        let found = Dataset::find_by_did("ds-2", conn).unwrap().unwrap();
        assert_eq!(found, explicit);
        assert_eq!(Dataset::find(1, conn).unwrap().did, "ds-1");
        assert!(Dataset::find_by_did("ds-3", conn).unwrap().is_none());
    }

    #[test]
    fn duplicate_did_is_a_conflict() {
        let conn = test_connection();
        let conn = conn.conn();
        Dataset::new("ds-1", "alice").insert(&LastIdPlusOne, conn).unwrap();
        let err = Dataset::new("ds-1", "bob").insert(&LastIdPlusOne, conn).unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::Conflict);
    }

    #[test]
    fn update_requires_an_id() {
        let conn = test_connection();
        let mut dataset = Dataset::new("ds-1", "alice");
        let err = dataset.update(conn.conn()).unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::Validation);
    }

    #[test]
    fn update_rewrites_mutable_columns() {
        let conn = test_connection();
        let conn = conn.conn();
        let mut dataset = Dataset::new("ds-1", "alice");
        dataset.insert(&LastIdPlusOne, conn).unwrap();

        dataset.site_id = Some(3);
        dataset.processing_id = 4;
        dataset.parent_id = Some(5);
        dataset.touch("bob");
        dataset.update(conn).unwrap();

        let stored = Dataset::find(dataset.dataset_id, conn).unwrap();
        assert_eq!(stored.site_id, Some(3));
        assert_eq!(stored.processing_id, 4);
        assert_eq!(stored.parent_id, Some(5));
        assert_eq!(stored.modify_by, "bob");
        assert_eq!(stored.create_by, "alice");
    }

    #[test]
    fn update_of_missing_row_is_not_found() {
        let conn = test_connection();
        let mut dataset = Dataset::new("ds-1", "alice");
        dataset.dataset_id = 99;
        let err = dataset.update(conn.conn()).unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::NotFound);
    }
}
