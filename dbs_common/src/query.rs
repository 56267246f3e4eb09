//! Reading datasets back out, with their names filled in.

use crate::lexicon;
use crate::prelude::*;
use crate::schema::*;

/// How many ids we put in one `IN (...)` list.
const CHUNK_SIZE: usize = 500;

/// A dataset as reported to clients.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DatasetInfo {
    /// The surrogate id of the dataset.
    pub dataset_id: i64,
    /// The dataset identifier.
    pub did: String,
    /// The site which produced it.
    pub site: Option<String>,
    /// The processing step which produced it.
    pub processing: String,
    /// The OS it was produced on.
    pub osinfo: String,
    /// The `did` of its parent.
    pub parent_did: Option<String>,
    /// Creation time, as a Unix timestamp.
    pub create_at: i64,
    /// Who created it.
    pub create_by: String,
    /// Modification time, as a Unix timestamp.
    pub modify_at: i64,
    /// Who last modified it.
    pub modify_by: String,
}

impl DatasetInfo {
    const COLUMNS: &'static [&'static str] = &[
        "dataset_id",
        "did",
        "site",
        "processing",
        "osinfo",
        "parent_did",
        "create_at",
        "create_by",
        "modify_at",
        "modify_by",
    ];

    fn fields(&self) -> Vec<String> {
        vec![
            self.dataset_id.to_string(),
            self.did.clone(),
            self.site.clone().unwrap_or_default(),
            self.processing.clone(),
            self.osinfo.clone(),
            self.parent_did.clone().unwrap_or_default(),
            self.create_at.to_string(),
            self.create_by.clone(),
            self.modify_at.to_string(),
            self.modify_by.clone(),
        ]
    }
}

/// Reject any parameter other than `did`, and return `did` if it's set.
fn did_param<'a>(
    params: &'a HashMap<String, String>,
    origin: &'static str,
) -> Result<Option<&'a str>> {
    for key in params.keys() {
        if key != "did" {
            return Err(DbsError::validation(format!("invalid parameter {}", key), origin).into());
        }
    }
    match params.get("did").map(|did| did.as_str()) {
        Some(did) if !did.is_empty() => {
            lexicon::check_did(did)?;
            Ok(Some(did))
        }
        _ => Ok(None),
    }
}

/// List datasets. The only parameter allowed is `did`; without it, we list
/// every dataset.
#[instrument(level = "debug", skip(conn))]
pub fn get_datasets(conn: Conn<'_>, params: &HashMap<String, String>) -> Result<Vec<DatasetInfo>> {
    const ORIGIN: &str = "dbs.datasets.get_datasets";
    let did = did_param(params, ORIGIN)?;
    let rows = with_conn!(conn, |c| {
        let mut query = datasets::table.order(datasets::dataset_id).into_boxed();
        if let Some(did) = did {
            query = query.filter(datasets::did.eq(did));
        }
        query.load::<Dataset>(c)
    })
    .with_context(|| DbsError::storage("cannot list datasets", ORIGIN))?;
    describe(conn, rows, ORIGIN)
}

/// List the datasets derived from the dataset named by the `did` parameter.
#[instrument(level = "debug", skip(conn))]
pub fn get_children(conn: Conn<'_>, params: &HashMap<String, String>) -> Result<Vec<DatasetInfo>> {
    const ORIGIN: &str = "dbs.children.get_children";
    let did = did_param(params, ORIGIN)?
        .ok_or_else(|| DbsError::validation("missing did", ORIGIN))?;
    let parent = match Dataset::find_by_did(did, conn)? {
        Some(parent) => parent,
        None => return Ok(vec![]),
    };
    let rows = with_conn!(conn, |c| datasets::table
        .inner_join(parents::table.on(parents::dataset_id.eq(datasets::dataset_id)))
        .filter(parents::parent_id.eq(parent.dataset_id))
        .select(datasets::all_columns)
        .order(datasets::dataset_id)
        .load::<Dataset>(c))
    .with_context(|| DbsError::storage(format!("cannot list children of {:?}", did), ORIGIN))?;
    describe(conn, rows, ORIGIN)
}

/// Look up the names behind the foreign keys of `rows`.
fn describe(conn: Conn<'_>, rows: Vec<Dataset>, origin: &'static str) -> Result<Vec<DatasetInfo>> {
    let site_ids = rows.iter().filter_map(|d| d.site_id).collect();
    let site_names = load_names(site_ids, origin, |ids| {
        with_conn!(conn, |c| sites::table
            .select((sites::site_id, sites::site))
            .filter(sites::site_id.eq_any(ids))
            .load(c))
    })?;
    let processing_ids = rows.iter().map(|d| d.processing_id).collect();
    let processing_names = load_names(processing_ids, origin, |ids| {
        with_conn!(conn, |c| processing::table
            .select((processing::processing_id, processing::name))
            .filter(processing::processing_id.eq_any(ids))
            .load(c))
    })?;
    let os_ids = rows.iter().map(|d| d.osinfo_id).collect();
    let os_names = load_names(os_ids, origin, |ids| {
        with_conn!(conn, |c| osinfo::table
            .select((osinfo::os_id, osinfo::name))
            .filter(osinfo::os_id.eq_any(ids))
            .load(c))
    })?;
    let parent_ids = rows.iter().filter_map(|d| d.parent_id).collect();
    let parent_dids = load_names(parent_ids, origin, |ids| {
        with_conn!(conn, |c| datasets::table
            .select((datasets::dataset_id, datasets::did))
            .filter(datasets::dataset_id.eq_any(ids))
            .load(c))
    })?;

    Ok(rows
        .into_iter()
        .map(|d| DatasetInfo {
            site: d.site_id.and_then(|id| site_names.get(&id).cloned()),
            processing: processing_names.get(&d.processing_id).cloned().unwrap_or_default(),
            osinfo: os_names.get(&d.osinfo_id).cloned().unwrap_or_default(),
            parent_did: d.parent_id.and_then(|id| parent_dids.get(&id).cloned()),
            dataset_id: d.dataset_id,
            did: d.did,
            create_at: d.create_at,
            create_by: d.create_by,
            modify_at: d.modify_at,
            modify_by: d.modify_by,
        })
        .collect())
}

fn load_names<F>(
    mut ids: Vec<i64>,
    origin: &'static str,
    mut load: F,
) -> Result<HashMap<i64, String>>
where
    F: FnMut(&[i64]) -> QueryResult<Vec<(i64, String)>>,
{
    ids.sort_unstable();
    ids.dedup();
    let mut names = HashMap::with_capacity(ids.len());
    for chunk in ids.chunks(CHUNK_SIZE) {
        let loaded = load(chunk).with_context(|| DbsError::storage("cannot load names", origin))?;
        names.extend(loaded);
    }
    Ok(names)
}

/// Write `rows` to `sink`. Without a `separator`, we write a JSON array.
/// With one, we write a header line and then one line per row, with fields
/// joined by `separator`.
pub fn write_rows(
    sink: &mut dyn Write,
    rows: &[DatasetInfo],
    separator: Option<&str>,
) -> Result<()> {
    match separator {
        Some(sep) if !sep.is_empty() => {
            writeln!(sink, "{}", DatasetInfo::COLUMNS.join(sep))?;
            for row in rows {
                writeln!(sink, "{}", row.fields().join(sep))?;
            }
        }
        _ => {
            serde_json::to_writer(&mut *sink, rows).context("cannot serialize datasets")?;
            writeln!(sink)?;
        }
    }
    Ok(())
}
