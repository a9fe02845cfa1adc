//! Flat-file JSON persistence.
//!
//! Bundles are written whole, pretty-printed, over the previous file. Each write lands in a
//! uniquely named sibling first and is then renamed into place, so readers always see one
//! complete bundle. Concurrent writers are not coordinated: the last rename wins.

use crate::{CoreError, CoreResult};
use fhir::Bundle;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Reads and writes the output bundle file.
#[derive(Clone, Debug)]
pub struct BundleStore {
    path: PathBuf,
}

impl BundleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the bundle file with `bundle`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Persistence`] if the temporary file cannot be written or renamed,
    /// and [`CoreError::Fhir`] if the bundle cannot be rendered.
    pub fn write(&self, bundle: &Bundle) -> CoreResult<()> {
        let rendered = bundle.render()?;
        self.replace_via(&self.tmp_path(), rendered.as_bytes())
    }

    /// Write `bytes` to `tmp_path`, then rename it over the bundle file. `tmp_path` is removed
    /// on either failure.
    fn replace_via(&self, tmp_path: &Path, bytes: &[u8]) -> CoreResult<()> {
        let result = fs::write(tmp_path, bytes).and_then(|()| fs::rename(tmp_path, &self.path));
        if let Err(source) = result {
            let _ = fs::remove_file(tmp_path);
            return Err(CoreError::Persistence {
                path: self.path.clone(),
                source,
            });
        }

        Ok(())
    }

    /// Read the current bundle file.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BundleRead`] if the file cannot be read, and [`CoreError::Fhir`] if
    /// it does not hold a valid Bundle.
    pub fn read(&self) -> CoreResult<Bundle> {
        let text = fs::read_to_string(&self.path).map_err(|source| CoreError::BundleRead {
            path: self.path.clone(),
            source,
        })?;
        Ok(Bundle::parse(&text)?)
    }

    fn tmp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "bundle".into());
        self.path
            .with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()))
    }
}

/// Read an input record file as JSON.
///
/// # Errors
///
/// Returns [`CoreError::SourceRead`] if the file cannot be read, and [`CoreError::InvalidJson`]
/// if it is not JSON.
pub fn read_records(path: &Path) -> CoreResult<Value> {
    let bytes = fs::read(path).map_err(|source| CoreError::SourceRead {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(CoreError::InvalidJson)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fhir::BundleAssembler;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn bundle_for(date: &str) -> Bundle {
        BundleAssembler::default().assemble_bundle(&json!([
            {"dateRep": date, "cases": 1, "deaths": 0, "countryterritoryCode": "ALB"}
        ]))
    }

    #[test]
    fn writes_and_reads_back() {
        let temp_dir = TempDir::new().expect("temp dir");
        let store = BundleStore::new(temp_dir.path().join("fhir_sample.json"));
        let bundle = bundle_for("14/12/2020");

        store.write(&bundle).expect("write");
        assert_eq!(store.read().expect("read"), bundle);

        let text = fs::read_to_string(store.path()).expect("raw read");
        assert!(text.contains("\n    \"resourceType\": \"Bundle\""));
    }

    #[test]
    fn rewrite_replaces_previous_bundle() {
        let temp_dir = TempDir::new().expect("temp dir");
        let store = BundleStore::new(temp_dir.path().join("fhir_sample.json"));

        store.write(&bundle_for("14/12/2020")).expect("first write");
        store.write(&Bundle::empty()).expect("second write");
        assert_eq!(store.read().expect("read"), Bundle::empty());
    }

    #[test]
    fn leaves_no_temporary_files() {
        let temp_dir = TempDir::new().expect("temp dir");
        let store = BundleStore::new(temp_dir.path().join("fhir_sample.json"));
        store.write(&bundle_for("14/12/2020")).expect("write");

        let names: Vec<String> = fs::read_dir(temp_dir.path())
            .expect("list")
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["fhir_sample.json".to_string()]);
    }

    #[test]
    fn write_into_missing_directory_fails() {
        let temp_dir = TempDir::new().expect("temp dir");
        let store = BundleStore::new(temp_dir.path().join("missing").join("fhir_sample.json"));

        let err = store.write(&Bundle::empty()).expect_err("no parent directory");
        assert!(matches!(err, CoreError::Persistence { .. }));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn failed_write_removes_temporary_file() {
        // Writes through a link to /dev/full open fine and then fail with ENOSPC.
        let dev_full = Path::new("/dev/full");
        if !dev_full.exists() {
            return;
        }
        let temp_dir = TempDir::new().expect("temp dir");
        let store = BundleStore::new(temp_dir.path().join("fhir_sample.json"));
        let tmp_path = store.tmp_path();
        std::os::unix::fs::symlink(dev_full, &tmp_path).expect("link tmp path");

        let err = store
            .replace_via(&tmp_path, b"{}")
            .expect_err("device is full");
        assert!(matches!(err, CoreError::Persistence { .. }));
        assert!(fs::symlink_metadata(&tmp_path).is_err());
        assert!(!store.path().exists());
    }

    #[test]
    fn concurrent_writers_leave_one_complete_bundle() {
        let temp_dir = TempDir::new().expect("temp dir");
        let store = Arc::new(BundleStore::new(temp_dir.path().join("fhir_sample.json")));
        let dates: Vec<String> = (1..=8).map(|day| format!("{day:02}/12/2020")).collect();

        let handles: Vec<_> = dates
            .iter()
            .cloned()
            .map(|date| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        store.write(&bundle_for(&date)).expect("write");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("writer thread");
        }

        // Last writer wins: whichever bundle survived is intact and came from one writer.
        let survivor = store.read().expect("read");
        assert_eq!(survivor.len(), 1);
        let date = &survivor.entry[0].resource.effective_date_time;
        assert!(dates.contains(date));
    }

    #[test]
    fn read_records_reports_missing_file_and_bad_json() {
        let temp_dir = TempDir::new().expect("temp dir");
        let missing = temp_dir.path().join("sample.json");
        assert!(matches!(
            read_records(&missing),
            Err(CoreError::SourceRead { .. })
        ));

        fs::write(&missing, b"[{").expect("write");
        assert!(matches!(
            read_records(&missing),
            Err(CoreError::InvalidJson(_))
        ));
    }
}
