// Module: Loader
// Reads Test and Suite templates from JSON files and resolves
// suite-element file references relative to the suite's directory.

use std::path::Path;

use anyhow::{Context, Result};

use crate::model::{Suite, Test};

pub fn load_test_from_file<P: AsRef<Path>>(path: P) -> Result<Test> {
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("cannot read test file {}", path.as_ref().display()))?;
    let test = serde_json::from_str(&content)
        .with_context(|| format!("cannot parse test file {}", path.as_ref().display()))?;
    Ok(test)
}

/// Loads a suite and resolves every element's `file` reference into an
/// inline test. Paths are relative to the suite file's directory.
pub fn load_suite_from_file<P: AsRef<Path>>(path: P) -> Result<Suite> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read suite file {}", path.display()))?;
    let mut suite: Suite = serde_json::from_str(&content)
        .with_context(|| format!("cannot parse suite file {}", path.display()))?;

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    for element in suite
        .setup
        .iter_mut()
        .chain(suite.main.iter_mut())
        .chain(suite.teardown.iter_mut())
    {
        if element.test.is_none() {
            if let Some(file) = &element.file {
                element.test = Some(load_test_from_file(base.join(file))?);
            }
        }
    }
    Ok(suite)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_suite_resolves_file_references() {
        let dir = tempfile::tempdir().unwrap();

        let mut test_file = std::fs::File::create(dir.path().join("ping.json")).unwrap();
        test_file
            .write_all(
                br#"{
                    "name": "ping",
                    "request": {"url": "http://example.org/ping"},
                    "checks": [{"Check": "StatusCode", "expect": 200}]
                }"#,
            )
            .unwrap();

        let suite_path = dir.path().join("suite.json");
        let mut suite_file = std::fs::File::create(&suite_path).unwrap();
        suite_file
            .write_all(
                br#"{
                    "name": "smoke",
                    "main": [
                        {"file": "ping.json", "variables": {"HOST": "example.org"}}
                    ]
                }"#,
            )
            .unwrap();

        let suite = load_suite_from_file(&suite_path).unwrap();
        assert_eq!(suite.name, "smoke");
        let test = suite.main[0].test.as_ref().expect("file reference resolved");
        assert_eq!(test.name, "ping");
        assert_eq!(test.checks.len(), 1);
        assert_eq!(suite.main[0].variables["HOST"], "example.org");
    }

    #[test]
    fn test_load_missing_file_fails_with_context() {
        let err = load_test_from_file("/no/such/test.json").unwrap_err();
        assert!(err.to_string().contains("cannot read test file"));
    }
}
