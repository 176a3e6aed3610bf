//! Sysfs attribute helpers
//!
//! Small read/write wrappers that map I/O failures onto [`GovernorError`]
//! with the offending path attached.

use regex::Regex;
use std::fs;
use std::path::Path;

use crate::error::{GovernorError, Result};

/// Read an attribute and trim trailing whitespace
pub fn read_attr(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|source| GovernorError::FileRead {
            path: path.to_path_buf(),
            source,
        })
}

/// Read an attribute as an integer
pub fn read_int(path: &Path) -> Result<i64> {
    let content = read_attr(path)?;
    content.parse::<i64>().map_err(|e| {
        GovernorError::generic(format!(
            "Failed to parse '{}' from {}: {}",
            content,
            path.display(),
            e
        ))
    })
}

/// Read a frequency attribute (kHz)
pub fn read_khz(path: &Path) -> Result<u32> {
    let value = read_int(path)?;
    u32::try_from(value).map_err(|_| {
        GovernorError::generic(format!("Frequency {} out of range in {}", value, path.display()))
    })
}

/// Write an attribute value
pub fn write_attr(path: &Path, value: impl ToString) -> Result<()> {
    fs::write(path, value.to_string()).map_err(|source| GovernorError::FileWrite {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse a kernel CPU list such as `0-3,6,8-9`
pub fn parse_cpu_list(list: &str) -> Result<Vec<usize>> {
    let mut cpus = Vec::new();
    let list = list.trim();
    if list.is_empty() {
        return Ok(cpus);
    }

    let range_pattern = Regex::new(r"^(\d+)(?:-(\d+))?$")
        .map_err(|e| GovernorError::generic(format!("CPU list pattern: {}", e)))?;

    for item in list.split(',') {
        let item = item.trim();
        let caps = range_pattern
            .captures(item)
            .ok_or_else(|| GovernorError::generic(format!("Malformed CPU list entry '{}'", item)))?;

        let parse = |s: &str| {
            s.parse::<usize>()
                .map_err(|e| GovernorError::generic(format!("Bad CPU number '{}': {}", s, e)))
        };
        let start = parse(&caps[1])?;
        let end = match caps.get(2) {
            Some(m) => parse(m.as_str())?,
            None => start,
        };
        if end < start {
            return Err(GovernorError::generic(format!("Descending CPU range '{}'", item)));
        }
        cpus.extend(start..=end);
    }

    cpus.sort_unstable();
    cpus.dedup();
    Ok(cpus)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_cpu_list() {
        assert_eq!(parse_cpu_list("0-3").unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(parse_cpu_list("0-3,6,8-9\n").unwrap(), vec![0, 1, 2, 3, 6, 8, 9]);
        assert_eq!(parse_cpu_list("5").unwrap(), vec![5]);
        assert!(parse_cpu_list("").unwrap().is_empty());
        assert!(parse_cpu_list("3-1").is_err());
        assert!(parse_cpu_list("a-b").is_err());
    }

    #[test]
    fn test_read_write_roundtrip_and_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scaling_max_freq");
        write_attr(&path, 1_190_400u32).unwrap();
        assert_eq!(read_khz(&path).unwrap(), 1_190_400);

        let missing = dir.path().join("missing");
        match read_attr(&missing) {
            Err(GovernorError::FileRead { path, .. }) => assert_eq!(path, missing),
            other => panic!("unexpected {:?}", other),
        }

        fs::write(&path, "garbage").unwrap();
        assert!(read_int(&path).is_err());
    }
}
