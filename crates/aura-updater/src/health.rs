//! Post-replace health check.
//!
//! Verifies the load-bearing files exist after the replace. The checker
//! only reports; deciding to roll back is the orchestrator's job.

use std::path::{Path, PathBuf};

/// Returns the critical paths missing under `install_root`, relative form.
pub fn missing_critical_paths(install_root: &Path, critical: &[PathBuf]) -> Vec<String> {
    critical
        .iter()
        .filter(|rel| !install_root.join(rel).exists())
        .map(|rel| rel.display().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_all_present() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("package.json"), "{}").unwrap();
        std::fs::write(temp.path().join("index.js"), "").unwrap();

        let critical = vec![PathBuf::from("package.json"), PathBuf::from("index.js")];
        assert!(missing_critical_paths(temp.path(), &critical).is_empty());
    }

    #[test]
    fn test_missing_files_reported_by_name() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("index.js"), "").unwrap();

        let critical = vec![PathBuf::from("package.json"), PathBuf::from("index.js")];
        let missing = missing_critical_paths(temp.path(), &critical);
        assert_eq!(missing, vec!["package.json".to_string()]);
    }
}
