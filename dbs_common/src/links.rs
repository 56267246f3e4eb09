//! Association rows between datasets and the things they refer to.

use crate::db::{is_unique_violation, write_error};
use crate::prelude::*;
use crate::schema::*;

/// The association tables we can write to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Join {
    /// `dataset_environments`: dataset, environment.
    DatasetEnvironment,
    /// `dataset_scripts`: dataset, script.
    DatasetScript,
    /// `datasets_files`: dataset, file, role.
    DatasetFile,
    /// `parents`: dataset, parent dataset.
    DatasetParent,
}

impl Join {
    fn table_name(self) -> &'static str {
        match self {
            Join::DatasetEnvironment => "dataset_environments",
            Join::DatasetScript => "dataset_scripts",
            Join::DatasetFile => "datasets_files",
            Join::DatasetParent => "parents",
        }
    }
}

impl fmt::Display for Join {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.table_name().fmt(f)
    }
}

/// How a dataset uses a file.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileRole {
    /// The file was read to produce the dataset.
    Input,
    /// The file is part of the dataset.
    Output,
}

impl FileRole {
    /// The value stored in `datasets_files.file_type`.
    pub fn as_str(self) -> &'static str {
        match self {
            FileRole::Input => "input",
            FileRole::Output => "output",
        }
    }
}

impl fmt::Display for FileRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

/// The outcome of [`link`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Linked {
    /// We wrote a new association row.
    Inserted,
    /// The row was already there.
    AlreadyPresent,
}

/// Associate `left` (always a dataset id) with `right` in the table selected
/// by `join`. File links need a `role`; nothing else takes one.
///
/// Writing a link which already exists is not an error.
pub fn link(
    conn: Conn<'_>,
    join: Join,
    left: i64,
    right: i64,
    role: Option<FileRole>,
) -> Result<Linked> {
    const ORIGIN: &str = "dbs.links.link";
    match (join, role) {
        (Join::DatasetFile, None) => {
            return Err(DbsError::validation("file links need a file_type", ORIGIN).into());
        }
        (Join::DatasetFile, Some(_)) | (_, None) => {}
        (_, Some(role)) => {
            return Err(DbsError::validation(
                format!("{} links do not take a role, got {}", join, role),
                ORIGIN,
            )
            .into());
        }
    }

    let inserted = conn.savepoint(|| {
        let written = match (join, role) {
            (Join::DatasetEnvironment, _) => with_conn!(conn, |c| diesel::insert_into(
                dataset_environments::table
            )
            .values((
                dataset_environments::dataset_id.eq(left),
                dataset_environments::environment_id.eq(right),
            ))
            .execute(c)),
            (Join::DatasetScript, _) => with_conn!(conn, |c| diesel::insert_into(
                dataset_scripts::table
            )
            .values((
                dataset_scripts::dataset_id.eq(left),
                dataset_scripts::script_id.eq(right),
            ))
            .execute(c)),
            (Join::DatasetFile, role) => {
                let file_type = role.map(FileRole::as_str).unwrap_or_default();
                with_conn!(conn, |c| diesel::insert_into(datasets_files::table)
                    .values((
                        datasets_files::dataset_id.eq(left),
                        datasets_files::file_id.eq(right),
                        datasets_files::file_type.eq(file_type),
                    ))
                    .execute(c))
            }
            (Join::DatasetParent, _) => with_conn!(conn, |c| diesel::insert_into(parents::table)
                .values((parents::dataset_id.eq(left), parents::parent_id.eq(right)))
                .execute(c)),
        };
        written.map_err(Error::from)
    });

    match inserted {
        Ok(_) => {
            trace!(%join, left, right, ?role, "linked");
            Ok(Linked::Inserted)
        }
        Err(err) if is_unique_violation(&err) => {
            debug!(%join, left, right, ?role, "link already present");
            Ok(Linked::AlreadyPresent)
        }
        Err(err) => Err(write_error(
            err,
            format!("cannot link {} {} to {}", join, left, right),
            ORIGIN,
        )),
    }
}

/// Remove every parent link of `dataset_id`. Returns how many we removed.
pub fn unlink_parents(conn: Conn<'_>, dataset_id: i64) -> Result<usize> {
    with_conn!(conn, |c| diesel::delete(
        parents::table.filter(parents::dataset_id.eq(dataset_id))
    )
    .execute(c))
    .with_context(|| {
        DbsError::storage(
            format!("cannot remove parent links of dataset {}", dataset_id),
            "dbs.links.unlink_parents",
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_connection;

    fn count_file_links(conn: Conn<'_>) -> i64 {
        with_conn!(conn, |c| datasets_files::table.count().get_result(c)).unwrap()
    }

    #[test]
    fn duplicate_links_are_harmless() {
        let conn = test_connection();
        let conn = conn.conn();
        conn.transaction("dbs.test", || {
            let first = link(conn, Join::DatasetEnvironment, 1, 2, None)?;
            assert_eq!(first, Linked::Inserted);
            let second = link(conn, Join::DatasetEnvironment, 1, 2, None)?;
            assert_eq!(second, Linked::AlreadyPresent);
            Ok(())
        })
        .unwrap();
        let count: i64 =
            with_conn!(conn, |c| dataset_environments::table.count().get_result(c)).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn file_roles_are_part_of_the_link() {
        let conn = test_connection();
        let conn = conn.conn();
        let input = link(conn, Join::DatasetFile, 1, 7, Some(FileRole::Input)).unwrap();
        let output = link(conn, Join::DatasetFile, 1, 7, Some(FileRole::Output)).unwrap();
        let again = link(conn, Join::DatasetFile, 1, 7, Some(FileRole::Output)).unwrap();
        assert_eq!(input, Linked::Inserted);
        assert_eq!(output, Linked::Inserted);
        assert_eq!(again, Linked::AlreadyPresent);
        assert_eq!(count_file_links(conn), 2);

        let roles: Vec<String> = with_conn!(conn, |c| datasets_files::table
            .select(datasets_files::file_type)
            .order(datasets_files::file_type)
            .load(c))
        .unwrap();
        assert_eq!(roles, vec!["input", "output"]);
    }

    #[test]
    fn roles_are_checked() {
        let conn = test_connection();
        let conn = conn.conn();
        let err = link(conn, Join::DatasetFile, 1, 7, None).unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::Validation);
        let err = link(conn, Join::DatasetScript, 1, 7, Some(FileRole::Input)).unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::Validation);
        assert_eq!(count_file_links(conn), 0);
    }

    #[test]
    fn unlinks_parents() {
        let conn = test_connection();
        let conn = conn.conn();
        link(conn, Join::DatasetParent, 2, 1, None).unwrap();
        link(conn, Join::DatasetParent, 3, 1, None).unwrap();
        assert_eq!(unlink_parents(conn, 2).unwrap(), 1);
        assert_eq!(unlink_parents(conn, 2).unwrap(), 0);
        let left: i64 = with_conn!(conn, |c| parents::table.count().get_result(c)).unwrap();
        assert_eq!(left, 1);
    }
}
