//! Types used in `dbsd`'s REST API.

use crate::prelude::*;

/// The query parameter which selects delimited output instead of JSON.
pub const SEPARATOR_PARAM: &str = "separator";

/// The JSON body we send back when a request fails.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ErrorRecord {
    /// The numeric code of the error kind.
    pub code: u16,
    /// The error kind.
    pub kind: String,
    /// What went wrong, at the outermost level.
    pub message: String,
    /// The operation which reported the error.
    pub origin: String,
    /// The complete chain of causes.
    pub reason: String,
}

impl ErrorRecord {
    /// Describe `err` for a client.
    pub fn from_error(err: &Error) -> ErrorRecord {
        let kind = ErrorKind::of(err);
        let (message, origin) = match err.downcast_ref::<DbsError>() {
            Some(dbs_err) => (dbs_err.message.clone(), dbs_err.origin.to_owned()),
            None => (err.to_string(), String::new()),
        };
        ErrorRecord {
            code: kind.code(),
            kind: kind.to_string(),
            message,
            origin,
            reason: format!("{:#}", err),
        }
    }
}

#[test]
fn error_records_describe_the_outer_error() {
    let err: Error = DbsError::not_found("no osinfo is provided", "dbs.record.required").into();
    let err = crate::errors::rewrap(
        err,
        "fail to insert parts of dataset",
        "dbs.datasets.insert_dataset",
    );
    let record = ErrorRecord::from_error(&err);
    assert_eq!(record.code, 103);
    assert_eq!(record.kind, "not found");
    assert_eq!(record.message, "fail to insert parts of dataset");
    assert_eq!(record.origin, "dbs.datasets.insert_dataset");
    assert!(record.reason.contains("no osinfo is provided"));

    let record = ErrorRecord::from_error(&format_err!("disk on fire"));
    assert_eq!(record.code, 106);
    assert_eq!(record.message, "disk on fire");
    assert_eq!(record.origin, "");
}
