//! Patterns which identifiers and timestamps must match.

use regex::Regex;

use crate::prelude::*;

/// The longest `did` we accept.
pub const MAX_DID_LEN: usize = 1024;

lazy_static! {
    static ref DID: Regex = Regex::new(r"^[A-Za-z0-9/][A-Za-z0-9_.:=/+\-]*$")
        .expect("could not parse did pattern");
    static ref UNIX_TIME: Regex =
        Regex::new(r"^[1-9][0-9]{9}$").expect("could not parse unix time pattern");
}

/// Check that `did` is a well-formed dataset identifier.
pub fn check_did(did: &str) -> Result<()> {
    const ORIGIN: &str = "dbs.lexicon.did";
    if did.is_empty() {
        return Err(DbsError::validation("missing did", ORIGIN).into());
    }
    if did.len() > MAX_DID_LEN {
        return Err(DbsError::validation(
            format!("did is longer than {} characters", MAX_DID_LEN),
            ORIGIN,
        )
        .into());
    }
    if !DID.is_match(did) {
        return Err(
            DbsError::validation(format!("invalid pattern for did {:?}", did), ORIGIN).into(),
        );
    }
    Ok(())
}

/// Does `ts` look like a Unix timestamp in seconds?
pub fn is_unix_time(ts: i64) -> bool {
    UNIX_TIME.is_match(&ts.to_string())
}

#[test]
fn accepts_plain_and_path_dids() {
    check_did("ds-1").unwrap();
    check_did("/beamline=3a/btr=x/cycle=2023-1/sample_name=s").unwrap();
    check_did("run:42+final").unwrap();
}

#[test]
fn rejects_malformed_dids() {
    for did in &["", "-ds", "ds 1", "ds;drop", "ds\n"] {
        let err = check_did(did).unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::Validation, "{:?}", did);
    }
    let long = "d".repeat(MAX_DID_LEN + 1);
    assert!(check_did(&long).is_err());
}

#[test]
fn recognizes_unix_times() {
    assert!(is_unix_time(1_600_000_000));
    assert!(!is_unix_time(0));
    assert!(!is_unix_time(12345));
    assert!(!is_unix_time(-1_600_000_000));
    assert!(!is_unix_time(16_000_000_000));
}
