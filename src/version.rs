//! Version handling: digits-only semver validation and ordering.
//!
//! The registry only accepts plain `MAJOR.MINOR.PATCH` versions. Validation
//! runs before any comparison, so the `semver` comparator never sees
//! pre-release or build-metadata identifiers.

use semver::Version;

use crate::error::{Error, Result};

/// Parse a digits-only `MAJOR.MINOR.PATCH` version string.
pub fn parse(version: &str) -> Result<Version> {
    if !is_valid(version) {
        return Err(Error::validation(format!(
            "invalid version '{version}': expected MAJOR.MINOR.PATCH with digits only"
        ))
        .with_solution("use a plain semantic version such as 1.0.0"));
    }
    Version::parse(version).map_err(|e| {
        Error::validation(format!("invalid version '{version}'")).with_cause(e)
    })
}

/// True iff `version` is exactly three dot-separated runs of ASCII digits.
pub fn is_valid(version: &str) -> bool {
    let parts: Vec<&str> = version.split('.').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
}

/// Compare two already-registered version strings, newest first.
///
/// Registered versions always pass [`is_valid`]; anything unparseable sorts
/// last so a corrupt entry can never become `latest`.
pub fn cmp_desc(a: &str, b: &str) -> std::cmp::Ordering {
    match (Version::parse(a), Version::parse(b)) {
        (Ok(va), Ok(vb)) => vb.cmp(&va),
        (Ok(_), Err(_)) => std::cmp::Ordering::Less,
        (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
        (Err(_), Err(_)) => b.cmp(a),
    }
}

/// True iff `candidate` is strictly newer than `current`.
pub fn is_newer(candidate: &str, current: &str) -> bool {
    matches!(
        (Version::parse(candidate), Version::parse(current)),
        (Ok(c), Ok(cur)) if c > cur
    )
}

/// Split a `name@version` spec into its parts.
///
/// Returns `(name, None)` when no `@` is present. An empty version after
/// `@` is a validation error.
pub fn split_spec(spec: &str) -> Result<(&str, Option<&str>)> {
    match spec.split_once('@') {
        None => Ok((spec, None)),
        Some((name, version)) if !version.is_empty() => Ok((name, Some(version))),
        Some(_) => Err(Error::validation(format!(
            "invalid skill spec '{spec}': empty version after '@'"
        ))
        .with_solution("use name or name@1.2.3")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    #[test]
    fn test_is_valid() {
        assert!(is_valid("1.0.0"));
        assert!(is_valid("0.0.1"));
        assert!(is_valid("10.20.30"));
        assert!(!is_valid("1.0"));
        assert!(!is_valid("1.0.0.0"));
        assert!(!is_valid("1.0.0-beta"));
        assert!(!is_valid("1.0.0+build"));
        assert!(!is_valid("v1.0.0"));
        assert!(!is_valid("1..0"));
        assert!(!is_valid(""));
    }

    #[test]
    fn test_parse_rejects_prerelease() {
        assert!(parse("1.0.0-rc.1").is_err());
        assert!(parse("1.0.0").is_ok());
    }

    #[test]
    fn test_cmp_desc_orders_newest_first() {
        let mut versions = vec!["1.0.0", "2.1.0", "0.9.9", "2.0.5"];
        versions.sort_by(|a, b| cmp_desc(a, b));
        assert_eq!(versions, vec!["2.1.0", "2.0.5", "1.0.0", "0.9.9"]);
    }

    #[test]
    fn test_cmp_desc_numeric_not_lexicographic() {
        assert_eq!(cmp_desc("10.0.0", "9.0.0"), Ordering::Less);
    }

    #[test]
    fn test_is_newer() {
        assert!(is_newer("1.0.1", "1.0.0"));
        assert!(is_newer("2.0.0", "1.9.9"));
        assert!(!is_newer("1.0.0", "1.0.0"));
        assert!(!is_newer("1.0.0", "1.0.1"));
    }

    #[test]
    fn test_split_spec() {
        assert_eq!(split_spec("ao-basics").unwrap(), ("ao-basics", None));
        assert_eq!(
            split_spec("ao-basics@1.2.0").unwrap(),
            ("ao-basics", Some("1.2.0"))
        );
        assert!(split_spec("ao-basics@").is_err());
    }
}
