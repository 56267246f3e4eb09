//! The denormalized dataset description which clients submit.

use crate::lexicon;
use crate::prelude::*;

/// The operating system a dataset was produced on.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct OsInfoRecord {
    /// The OS name. Required.
    pub name: String,
    /// The kernel release.
    pub kernel: String,
    /// The OS version.
    pub version: String,
}

/// A software environment a dataset was produced in.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct EnvironmentRecord {
    /// The environment name. Entries with an empty name are ignored.
    pub name: String,
    /// The environment version.
    pub version: String,
    /// Free-form details.
    pub details: String,
}

/// The script which produced a dataset.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct ScriptRecord {
    /// The script name. Required.
    pub name: String,
    /// The options it was run with.
    pub options: String,
}

/// Everything a client tells us about one dataset. Empty strings mean
/// "not given".
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct DatasetRecord {
    /// The dataset identifier.
    pub did: String,
    /// The site which produced the dataset.
    pub site: String,
    /// The OS the dataset was produced on.
    pub osinfo: OsInfoRecord,
    /// The environments the dataset was produced in.
    pub environments: Vec<EnvironmentRecord>,
    /// The script which produced the dataset.
    pub script: ScriptRecord,
    /// The name of the processing step.
    pub processing: String,
    /// The `did` of the dataset this one was derived from.
    #[serde(alias = "parent")]
    pub parent_did: String,
    /// Storage buckets holding the dataset.
    pub buckets: Vec<String>,
    /// Files read to produce the dataset.
    pub input_files: Vec<String>,
    /// Files the dataset consists of.
    pub output_files: Vec<String>,
}

impl DatasetRecord {
    /// Decode a JSON payload.
    pub fn decode(payload: &[u8]) -> Result<DatasetRecord> {
        let record = serde_json::from_slice::<DatasetRecord>(payload).with_context(|| {
            DbsError::decode("fail to decode dataset record", "dbs.record.decode")
        })?;
        trace!(?record, "decoded dataset record");
        Ok(record)
    }

    /// Check the shape of this record.
    pub fn validate(&self) -> Result<()> {
        const ORIGIN: &str = "dbs.record.validate";
        lexicon::check_did(&self.did)?;
        if !self.parent_did.is_empty() {
            lexicon::check_did(&self.parent_did)?;
        }
        if self.buckets.iter().any(|b| b.is_empty()) {
            return Err(DbsError::validation("empty bucket name", ORIGIN).into());
        }
        if self
            .input_files
            .iter()
            .chain(&self.output_files)
            .any(|f| f.is_empty())
        {
            return Err(DbsError::validation("empty file name", ORIGIN).into());
        }
        Ok(())
    }

    /// Check that the dimensions every dataset needs are present.
    pub fn check_required(&self) -> Result<()> {
        const ORIGIN: &str = "dbs.record.required";
        if self.osinfo.name.is_empty() {
            return Err(DbsError::not_found("no osinfo is provided", ORIGIN).into());
        }
        if self.script.name.is_empty() {
            return Err(DbsError::not_found("no script is provided", ORIGIN).into());
        }
        if self.processing.is_empty() {
            return Err(DbsError::not_found("no processing is provided", ORIGIN).into());
        }
        Ok(())
    }

    /// The environments which actually name something.
    pub fn named_environments(&self) -> impl Iterator<Item = &EnvironmentRecord> {
        self.environments.iter().filter(|env| !env.name.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_partial_records() {
        let record = DatasetRecord::decode(
            br#"{"did": "ds-1", "osinfo": {"name": "linux"}, "parent": "ds-0",
                 "environments": [{"name": "env-x"}, {"name": ""}]}"#,
        )
        .unwrap();
        assert_eq!(record.did, "ds-1");
        assert_eq!(record.osinfo.name, "linux");
        assert_eq!(record.osinfo.kernel, "");
        assert_eq!(record.parent_did, "ds-0");
        assert_eq!(record.named_environments().count(), 1);
        assert!(record.buckets.is_empty());
    }

    #[test]
    fn bad_json_is_a_decode_error() {
        let err = DatasetRecord::decode(b"{\"did\": ").unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::Decode);
        let err = DatasetRecord::decode(br#"{"buckets": "b1"}"#).unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::Decode);
    }

    #[test]
    fn validate_checks_names() {
        let mut record = DatasetRecord {
            did: "ds-1".to_owned(),
            ..DatasetRecord::default()
        };
        record.validate().unwrap();

        record.output_files = vec!["".to_owned()];
        let err = record.validate().unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::Validation);

        record.output_files.clear();
        record.parent_did = "bad parent".to_owned();
        assert!(record.validate().is_err());

        record.did = String::new();
        record.parent_did.clear();
        assert!(record.validate().is_err());
    }

    #[test]
    fn required_dimensions_are_not_found_errors() {
        let mut record = DatasetRecord {
            did: "ds-1".to_owned(),
            ..DatasetRecord::default()
        };
        let err = record.check_required().unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::NotFound);
        assert!(err.to_string().contains("osinfo"));

        record.osinfo.name = "linux".to_owned();
        let err = record.check_required().unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::NotFound);
        assert!(err.to_string().contains("script"));

        record.script.name = "run.sh".to_owned();
        let err = record.check_required().unwrap_err();
        assert!(err.to_string().contains("processing"));

        record.processing = "proc-A".to_owned();
        record.check_required().unwrap();
    }
}
