//! Storing dataset descriptions as a graph of rows.
//!
//! A client describes a dataset in one denormalized [`DatasetRecord`]. We
//! resolve or create every dimension it mentions, insert (or find) the
//! dataset, and link it to everything else, all inside one transaction.
//! Either the whole graph is written, or none of it is.

use crate::config::DatabaseConfig;
use crate::errors::rewrap;
use crate::links::{link, unlink_parents, FileRole, Join};
use crate::lexicon;
use crate::prelude::*;
use crate::record::DatasetRecord;
use crate::resolve::resolve;
use crate::upsert::upsert;

/// Writes datasets. Cheap to share between threads.
#[derive(Clone, Debug)]
pub struct Provenance {
    /// Where new surrogate ids come from.
    ids: Arc<dyn SurrogateIds>,
}

impl Provenance {
    /// Create a writer which assigns ids using `ids`.
    pub fn new(ids: Arc<dyn SurrogateIds>) -> Provenance {
        Provenance { ids }
    }

    /// Create a writer using the id strategy chosen by `config`.
    pub fn from_config(config: &DatabaseConfig) -> Provenance {
        let strategy = config.id_strategy();
        info!(?strategy, backend = %config.backend, "assigning surrogate ids");
        Provenance::new(strategy.surrogate_ids())
    }

    /// Decode a JSON [`DatasetRecord`] and store it. Returns the stored
    /// dataset.
    #[instrument(level = "debug", skip(self, conn, payload))]
    pub fn insert_dataset(&self, conn: Conn<'_>, payload: &[u8], actor: &str) -> Result<Dataset> {
        let record = DatasetRecord::decode(payload)?;
        self.insert_record(conn, &record, actor)
    }

    /// Store an already-decoded record.
    pub fn insert_record(
        &self,
        conn: Conn<'_>,
        record: &DatasetRecord,
        actor: &str,
    ) -> Result<Dataset> {
        const ORIGIN: &str = "dbs.datasets.insert_dataset";
        record.validate()?;
        record.check_required()?;

        let mut dataset = Dataset::new(&record.did, actor);
        dataset.set_defaults();
        dataset.validate()?;

        let dataset = conn
            .transaction(ORIGIN, || self.write_record(conn, record, dataset, actor))
            .map_err(|err| rewrap(err, "fail to insert parts of dataset", ORIGIN))?;
        info!(did = %dataset.did, id = dataset.dataset_id, "stored dataset");
        Ok(dataset)
    }

    /// Everything `insert_record` does once the transaction is open.
    fn write_record(
        &self,
        conn: Conn<'_>,
        record: &DatasetRecord,
        mut dataset: Dataset,
        actor: &str,
    ) -> Result<Dataset> {
        let ids = &*self.ids;

        let site_id = self.upsert_site(conn, &record.site)?;
        let os_id = upsert(ids, conn, OsInfo::from(&record.osinfo))?.id;
        let mut environment_ids = vec![];
        for env in record.named_environments() {
            environment_ids.push(upsert(ids, conn, Environment::new(env, os_id))?.id);
        }
        let script_id = upsert(ids, conn, Script::from(&record.script))?.id;
        let processing_id = upsert(ids, conn, Processing::new(&record.processing))?.id;
        let parent_id = resolve_parent(conn, &record.parent_did)?;

        let mut parent_changed = false;
        match Dataset::find_by_did(&record.did, conn)? {
            None => {
                dataset.site_id = site_id;
                dataset.osinfo_id = os_id;
                dataset.processing_id = processing_id;
                dataset.parent_id = parent_id;
                dataset.insert(ids, conn)?;
            }
            Some(mut existing) => {
                debug!(did = %existing.did, id = existing.dataset_id, "dataset already exists");
                if parent_id.is_some() && existing.parent_id != parent_id {
                    existing.parent_id = parent_id;
                    existing.touch(actor);
                    existing.update(conn)?;
                    parent_changed = true;
                }
                dataset = existing;
            }
        }
        let dataset_id = dataset.dataset_id;
        if parent_id == Some(dataset_id) {
            warn!(did = %dataset.did, "dataset is its own parent");
        }

        for environment_id in environment_ids {
            link(conn, Join::DatasetEnvironment, dataset_id, environment_id, None)?;
        }
        link(conn, Join::DatasetScript, dataset_id, script_id, None)?;
        if let Some(parent_id) = parent_id {
            if parent_changed {
                unlink_parents(conn, dataset_id)?;
            }
            link(conn, Join::DatasetParent, dataset_id, parent_id, None)?;
        }

        for name in &record.buckets {
            let bucket = upsert(ids, conn, Bucket::new(name, dataset_id))?;
            if !bucket.created {
                info!(bucket = %name, id = bucket.id, "bucket already exists");
            }
        }
        let files = [
            (FileRole::Input, &record.input_files),
            (FileRole::Output, &record.output_files),
        ];
        for &(role, names) in files.iter() {
            for name in names {
                let file = upsert(ids, conn, File::new(name, dataset_id, actor))?;
                if !file.created {
                    info!(file = %name, id = file.id, "file already exists");
                }
                link(conn, Join::DatasetFile, dataset_id, file.id, Some(role))?;
            }
        }
        Ok(dataset)
    }

    /// Change the site, processing or parent of an existing dataset. Fields
    /// left empty in the record are left alone.
    #[instrument(level = "debug", skip(self, conn, payload))]
    pub fn update_dataset(&self, conn: Conn<'_>, payload: &[u8], actor: &str) -> Result<Dataset> {
        const ORIGIN: &str = "dbs.datasets.update_dataset";
        let record = DatasetRecord::decode(payload)?;
        record.validate()?;

        let dataset = conn
            .transaction(ORIGIN, || {
                let ids = &*self.ids;
                let mut dataset = Dataset::find_by_did(&record.did, conn)?.ok_or_else(|| {
                    DbsError::not_found(format!("no dataset {:?}", record.did), ORIGIN)
                })?;
                if let Some(site_id) = self.upsert_site(conn, &record.site)? {
                    dataset.site_id = Some(site_id);
                }
                if !record.processing.is_empty() {
                    dataset.processing_id =
                        upsert(ids, conn, Processing::new(&record.processing))?.id;
                }
                let parent_id = resolve_parent(conn, &record.parent_did)?;
                if parent_id.is_some() {
                    dataset.parent_id = parent_id;
                }
                dataset.touch(actor);
                dataset.update(conn)?;
                if let Some(parent_id) = parent_id {
                    unlink_parents(conn, dataset.dataset_id)?;
                    link(conn, Join::DatasetParent, dataset.dataset_id, parent_id, None)?;
                }
                Ok(dataset)
            })
            .map_err(|err| rewrap(err, "fail to update dataset", ORIGIN))?;
        info!(did = %dataset.did, id = dataset.dataset_id, "updated dataset");
        Ok(dataset)
    }

    /// Delete a dataset and everything it owns. Shared dimension rows are
    /// kept.
    #[instrument(level = "debug", skip(self, conn))]
    pub fn delete_dataset(&self, conn: Conn<'_>, did: &str) -> Result<()> {
        const ORIGIN: &str = "dbs.datasets.delete_dataset";
        lexicon::check_did(did)?;
        conn.transaction(ORIGIN, || {
            let dataset = Dataset::find_by_did(did, conn)?
                .ok_or_else(|| DbsError::not_found(format!("no dataset {:?}", did), ORIGIN))?;
            dataset.delete(conn)
        })
        .map_err(|err| rewrap(err, "fail to delete dataset", ORIGIN))?;
        info!(%did, "deleted dataset");
        Ok(())
    }

    /// Resolve or create `site`, unless it's empty.
    fn upsert_site(&self, conn: Conn<'_>, site: &str) -> Result<Option<i64>> {
        if site.is_empty() {
            return Ok(None);
        }
        Ok(Some(upsert(&*self.ids, conn, Site::new(site))?.id))
    }
}

/// Look up the id of the parent dataset `parent_did`. An empty `parent_did`
/// means "no parent"; a parent we don't know about is an error, because we
/// never create parents implicitly.
pub fn resolve_parent(conn: Conn<'_>, parent_did: &str) -> Result<Option<i64>> {
    if parent_did.is_empty() {
        return Ok(None);
    }
    match resolve(conn, Entity::Dataset, parent_did)? {
        Some(id) => Ok(Some(id)),
        None => Err(DbsError::not_found(
            format!("parent dataset {:?} does not exist", parent_did),
            "dbs.datasets.resolve_parent",
        )
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{test_connection, test_file_pool};
    use std::thread;
    use crate::ids::LastIdPlusOne;
    use crate::schema::*;

    fn provenance() -> Provenance {
        Provenance::new(Arc::new(LastIdPlusOne))
    }

    /// Count the rows of every table.
    fn counts(conn: Conn<'_>) -> HashMap<&'static str, i64> {
        macro_rules! count {
            ($($table:ident),*) => {
                vec![$((
                    stringify!($table),
                    with_conn!(conn, |c| $table::table.count().get_result::<i64>(c)).unwrap(),
                )),*]
            };
        }
        count!(
            sites,
            osinfo,
            environments,
            scripts,
            processing,
            datasets,
            buckets,
            files,
            dataset_environments,
            dataset_scripts,
            datasets_files,
            parents
        )
        .into_iter()
        .collect()
    }

    fn assert_empty(conn: Conn<'_>) {
        for (table, count) in counts(conn) {
            assert_eq!(count, 0, "rows left in {}", table);
        }
    }

    const SCENARIO_A: &str = r#"{
        "did": "ds-1",
        "osinfo": {"name": "linux", "kernel": "5.15", "version": "22.04"},
        "script": {"name": "run.sh", "options": "-v"},
        "processing": "proc-A",
        "site": "site-1",
        "environments": [{"name": "env-x", "version": "3.11"}],
        "input_files": ["f1.root"],
        "output_files": ["f2.root"]
    }"#;

    #[test]
    fn stores_a_complete_dataset() {
        let conn = test_connection();
        let conn = conn.conn();
        let dataset = provenance()
            .insert_dataset(conn, SCENARIO_A.as_bytes(), "alice")
            .unwrap();
        assert_ne!(dataset.dataset_id, 0);
        assert_eq!(dataset.did, "ds-1");
        assert!(dataset.site_id.is_some());
        assert_ne!(dataset.osinfo_id, 0);
        assert_ne!(dataset.processing_id, 0);
        assert_eq!(dataset.parent_id, None);
        assert_eq!(dataset.create_by, "alice");

        let counts = counts(conn);
        for table in &["sites", "osinfo", "environments", "scripts", "processing", "datasets"] {
            assert_eq!(counts[table], 1, "{}", table);
        }
        assert_eq!(counts["files"], 2);
        assert_eq!(counts["dataset_environments"], 1);
        assert_eq!(counts["dataset_scripts"], 1);
        assert_eq!(counts["datasets_files"], 2);
        assert_eq!(counts["parents"], 0);

        let stored = Dataset::find_by_did("ds-1", conn).unwrap().unwrap();
        assert_eq!(stored, dataset);
    }

    #[test]
    fn resubmission_writes_nothing_new() {
        let conn = test_connection();
        let conn = conn.conn();
        let prov = provenance();
        let first = prov.insert_dataset(conn, SCENARIO_A.as_bytes(), "alice").unwrap();
        let before = counts(conn);
        let second = prov.insert_dataset(conn, SCENARIO_A.as_bytes(), "bob").unwrap();
        assert_eq!(counts(conn), before);
        assert_eq!(second.dataset_id, first.dataset_id);
        assert_eq!(second.create_by, "alice");
    }

    #[test]
    fn missing_osinfo_writes_nothing() {
        let conn = test_connection();
        let conn = conn.conn();
        let payload = SCENARIO_A.replace(r#""name": "linux""#, r#""name": """#);
        let err = provenance()
            .insert_dataset(conn, payload.as_bytes(), "alice")
            .unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::NotFound);
        assert_empty(conn);
    }

    #[test]
    fn missing_script_writes_nothing() {
        let conn = test_connection();
        let conn = conn.conn();
        let payload = SCENARIO_A.replace(r#""name": "run.sh""#, r#""name": """#);
        let err = provenance()
            .insert_dataset(conn, payload.as_bytes(), "alice")
            .unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::NotFound);
        assert!(format!("{:#}", err).contains("script"));
        assert_empty(conn);
    }

    #[test]
    fn concurrent_submissions_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_file_pool(&dir, "5s");
        let provenance = Arc::new(provenance());

        // Every dataset shares its dimensions and its input file.
        let workers = (0..4)
            .map(|worker| {
                let pool = pool.clone();
                let provenance = provenance.clone();
                thread::spawn(move || {
                    for i in 0..25 {
                        let payload = SCENARIO_A
                            .replace(r#""ds-1""#, &format!(r#""ds-{}-{}""#, worker, i))
                            .replace("f2.root", &format!("out-{}-{}.root", worker, i));
                        let conn = pool.get().unwrap();
                        provenance
                            .insert_dataset(conn.conn(), payload.as_bytes(), "alice")
                            .unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();
        for worker in workers {
            worker.join().unwrap();
        }

        let conn = pool.get().unwrap();
        let counts = counts(conn.conn());
        assert_eq!(counts["datasets"], 100);
        for table in &["sites", "osinfo", "environments", "scripts", "processing"] {
            assert_eq!(counts[table], 1, "rows in {}", table);
        }
        assert_eq!(counts["files"], 101);
        assert_eq!(counts["datasets_files"], 200);
    }

    #[test]
    fn missing_processing_writes_nothing() {
        let conn = test_connection();
        let conn = conn.conn();
        let payload = SCENARIO_A.replace(r#""proc-A""#, r#""""#);
        let err = provenance()
            .insert_dataset(conn, payload.as_bytes(), "alice")
            .unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::NotFound);
        assert_empty(conn);
    }

    #[test]
    fn bad_payloads_are_rejected() {
        let conn = test_connection();
        let conn = conn.conn();
        let prov = provenance();
        let err = prov.insert_dataset(conn, b"not json", "alice").unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::Decode);
        let payload = SCENARIO_A.replace(r#""ds-1""#, r#""ds 1""#);
        let err = prov.insert_dataset(conn, payload.as_bytes(), "alice").unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::Validation);
        let err = prov.insert_dataset(conn, SCENARIO_A.as_bytes(), "").unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::Validation);
        assert_empty(conn);
    }

    #[test]
    fn unknown_parent_rolls_everything_back() {
        let conn = test_connection();
        let conn = conn.conn();
        let payload = SCENARIO_A.replace(
            r#""did": "ds-1","#,
            r#""did": "ds-1", "parent_did": "ds-0","#,
        );
        let err = provenance()
            .insert_dataset(conn, payload.as_bytes(), "alice")
            .unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::NotFound);
        let outer = err.downcast_ref::<DbsError>().unwrap();
        assert_eq!(outer.origin, "dbs.datasets.insert_dataset");
        // The site, OS, script and processing were created before we got to
        // the parent, and must be gone too.
        assert_empty(conn);
    }

    /// Hands out ids normally, except for one entity.
    #[derive(Debug)]
    struct FailingIds(Entity);

    impl SurrogateIds for FailingIds {
        fn next_id(&self, conn: Conn<'_>, entity: Entity) -> Result<i64> {
            if entity == self.0 {
                Err(DbsError::storage("id source broke", "dbs.test").into())
            } else {
                LastIdPlusOne.next_id(conn, entity)
            }
        }
    }

    #[test]
    fn late_failures_roll_everything_back() {
        let conn = test_connection();
        let conn = conn.conn();
        let prov = Provenance::new(Arc::new(FailingIds(Entity::File)));
        let err = prov.insert_dataset(conn, SCENARIO_A.as_bytes(), "alice").unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::Storage);
        assert_empty(conn);
    }

    #[test]
    fn datasets_share_dimensions() {
        let conn = test_connection();
        let conn = conn.conn();
        let prov = provenance();
        prov.insert_dataset(conn, SCENARIO_A.as_bytes(), "alice").unwrap();
        let payload = SCENARIO_A
            .replace(r#""did": "ds-1","#, r#""did": "ds-2", "parent": "ds-1", "buckets": ["b1"],"#)
            .replace(r#"["f2.root"]"#, r#"["f3.root"]"#)
            .replace(r#"["f1.root"]"#, r#"["f2.root"]"#);
        let child = prov.insert_dataset(conn, payload.as_bytes(), "bob").unwrap();

        let parent = Dataset::find_by_did("ds-1", conn).unwrap().unwrap();
        assert_eq!(child.parent_id, Some(parent.dataset_id));
        assert_eq!(child.osinfo_id, parent.osinfo_id);
        assert_eq!(child.site_id, parent.site_id);

        let counts = counts(conn);
        assert_eq!(counts["datasets"], 2);
        assert_eq!(counts["osinfo"], 1);
        assert_eq!(counts["environments"], 1);
        assert_eq!(counts["buckets"], 1);
        assert_eq!(counts["files"], 3);
        assert_eq!(counts["dataset_environments"], 2);
        assert_eq!(counts["datasets_files"], 4);
        assert_eq!(counts["parents"], 1);
    }

    #[test]
    fn resubmitting_with_a_new_parent_updates_the_dataset() {
        let conn = test_connection();
        let conn = conn.conn();
        let prov = provenance();
        prov.insert_dataset(conn, SCENARIO_A.as_bytes(), "alice").unwrap();
        let other = SCENARIO_A
            .replace(r#""ds-1""#, r#""ds-0""#)
            .replace(r#""f1.root""#, r#""g1.root""#)
            .replace(r#""f2.root""#, r#""g2.root""#);
        let parent = prov.insert_dataset(conn, other.as_bytes(), "alice").unwrap();

        let payload = SCENARIO_A.replace(
            r#""did": "ds-1","#,
            r#""did": "ds-1", "parent_did": "ds-0","#,
        );
        let dataset = prov.insert_dataset(conn, payload.as_bytes(), "bob").unwrap();
        assert_eq!(dataset.parent_id, Some(parent.dataset_id));
        assert_eq!(dataset.create_by, "alice");
        assert_eq!(dataset.modify_by, "bob");
        assert_eq!(counts(conn)["parents"], 1);
    }

    #[test]
    fn update_changes_only_given_fields() {
        let conn = test_connection();
        let conn = conn.conn();
        let prov = provenance();
        let original = prov.insert_dataset(conn, SCENARIO_A.as_bytes(), "alice").unwrap();

        let updated = prov
            .update_dataset(conn, br#"{"did": "ds-1", "processing": "proc-B"}"#, "bob")
            .unwrap();
        assert_eq!(updated.dataset_id, original.dataset_id);
        assert_ne!(updated.processing_id, original.processing_id);
        assert_eq!(updated.site_id, original.site_id);
        assert_eq!(updated.modify_by, "bob");
        assert_eq!(counts(conn)["processing"], 2);

        let err = prov
            .update_dataset(conn, br#"{"did": "ds-9", "processing": "proc-B"}"#, "bob")
            .unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::NotFound);

        let err = prov
            .update_dataset(conn, br#"{"did": "ds-1", "parent": "ds-9"}"#, "bob")
            .unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::NotFound);
        let stored = Dataset::find_by_did("ds-1", conn).unwrap().unwrap();
        assert_eq!(stored, updated);
    }

    #[test]
    fn delete_refuses_datasets_with_children() {
        let conn = test_connection();
        let conn = conn.conn();
        let prov = provenance();
        prov.insert_dataset(conn, SCENARIO_A.as_bytes(), "alice").unwrap();
        let child = SCENARIO_A
            .replace(r#""did": "ds-1","#, r#""did": "ds-2", "parent": "ds-1", "buckets": ["b1"],"#)
            .replace(r#""f1.root""#, r#""g1.root""#)
            .replace(r#""f2.root""#, r#""g2.root""#);
        prov.insert_dataset(conn, child.as_bytes(), "alice").unwrap();

        let err = prov.delete_dataset(conn, "ds-1").unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::Conflict);
        assert_eq!(counts(conn)["datasets"], 2);

        prov.delete_dataset(conn, "ds-2").unwrap();
        prov.delete_dataset(conn, "ds-1").unwrap();
        let counts = counts(conn);
        for table in &["datasets", "files", "buckets", "datasets_files", "parents"] {
            assert_eq!(counts[table], 0, "{}", table);
        }
        assert_eq!(counts["osinfo"], 1);
        assert_eq!(counts["processing"], 1);

        let err = prov.delete_dataset(conn, "ds-1").unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::NotFound);
    }

    #[test]
    fn delete_refuses_datasets_whose_files_are_used() {
        let conn = test_connection();
        let conn = conn.conn();
        let prov = provenance();
        prov.insert_dataset(conn, SCENARIO_A.as_bytes(), "alice").unwrap();
        let reader = SCENARIO_A
            .replace(r#""ds-1""#, r#""ds-2""#)
            .replace(r#"["f2.root"]"#, r#"["g2.root"]"#)
            .replace(r#"["f1.root"]"#, r#"["f2.root"]"#);
        prov.insert_dataset(conn, reader.as_bytes(), "alice").unwrap();
        let err = prov.delete_dataset(conn, "ds-1").unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::Conflict);
    }
}
