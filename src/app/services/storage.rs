use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::app::error::AppError;

pub const RUNFILES_AREA: &str = "test_runfiles";
pub const OUTPUT_FILES_AREA: &str = "test_outputfiles";
pub const EXPORT_PROPERTIES_AREA: &str = "test_exportproperties";
pub const ARGS_AREA: &str = "test_args";

const PROPERTIES_FILE: &str = "properties.json";
const ARGS_FILE: &str = "args.json";

pub fn validate_relative_path(path: &str) -> Result<(), String> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err("path is required".to_string());
    }
    if trimmed.starts_with('/') || trimmed.starts_with('\\') {
        return Err("path must be relative to the storage area".to_string());
    }
    if trimmed.contains('\0') {
        return Err("path contains invalid characters".to_string());
    }
    for segment in trimmed.split(['/', '\\']) {
        if segment == ".." {
            return Err("path must not contain '..' segments".to_string());
        }
    }
    Ok(())
}

/// File areas shared between the test process and the orchestrator.
#[derive(Debug, Clone)]
pub struct TestStorage {
    root: PathBuf,
}

impl TestStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn area(&self, area: &str) -> PathBuf {
        self.root.join(area)
    }

    fn resolve(&self, area: &str, path: &str) -> Result<PathBuf, AppError> {
        validate_relative_path(path).map_err(|message| AppError::validation(message, ""))?;
        Ok(self.area(area).join(path.trim()))
    }

    /// Opens a file shipped with the test under `test_runfiles`.
    pub fn open_input_file(&self, path: &str) -> Result<File, AppError> {
        let resolved = self.resolve(RUNFILES_AREA, path)?;
        File::open(&resolved).map_err(|err| {
            AppError::dependency(format!("Failed to open {}: {err}", resolved.display()), "")
        })
    }

    /// Opens (creating parents) a file under `test_outputfiles`, truncating unless `append`.
    pub fn open_output_file(&self, path: &str, append: bool) -> Result<File, AppError> {
        let resolved = self.resolve(OUTPUT_FILES_AREA, path)?;
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| AppError::system(format!("Failed to create output dir: {err}"), ""))?;
        }
        let mut options = OpenOptions::new();
        options.create(true).write(true);
        if append {
            options.append(true);
        } else {
            options.truncate(true);
        }
        debug!(path = %resolved.display(), append, "opening output file");
        options.open(&resolved).map_err(|err| {
            AppError::system(format!("Failed to open {}: {err}", resolved.display()), "")
        })
    }

    /// Arguments the orchestrator passed to this run. Missing file means no arguments.
    pub fn input_args(&self) -> Result<BTreeMap<String, String>, AppError> {
        read_json_map(&self.area(ARGS_AREA).join(ARGS_FILE))
    }

    pub fn write_input_args(&self, args: &BTreeMap<String, String>) -> Result<(), AppError> {
        write_json_map(&self.area(ARGS_AREA).join(ARGS_FILE), args)
    }

    /// Merges `properties` into the exported properties; later values replace earlier ones.
    pub fn add_output_properties(&self, properties: &BTreeMap<String, String>) -> Result<(), AppError> {
        let path = self.area(EXPORT_PROPERTIES_AREA).join(PROPERTIES_FILE);
        let mut merged = read_json_map(&path)?;
        merged.extend(properties.iter().map(|(key, value)| (key.clone(), value.clone())));
        write_json_map(&path, &merged)
    }

    pub fn output_properties(&self) -> Result<BTreeMap<String, String>, AppError> {
        read_json_map(&self.area(EXPORT_PROPERTIES_AREA).join(PROPERTIES_FILE))
    }
}

fn read_json_map(path: &Path) -> Result<BTreeMap<String, String>, AppError> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| AppError::system(format!("Failed to read {}: {err}", path.display()), ""))?;
    serde_json::from_str(&raw)
        .map_err(|err| AppError::validation(format!("Failed to parse {}: {err}", path.display()), ""))
}

fn write_json_map(path: &Path, values: &BTreeMap<String, String>) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| AppError::system(format!("Failed to create {}: {err}", parent.display()), ""))?;
    }
    let payload = serde_json::to_string_pretty(values)
        .map_err(|err| AppError::system(format!("Failed to serialize properties: {err}"), ""))?;
    fs::write(path, payload)
        .map_err(|err| AppError::system(format!("Failed to write {}: {err}", path.display()), ""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn validate_relative_path_rejects_escapes() {
        assert!(validate_relative_path("").is_err());
        assert!(validate_relative_path("/etc/passwd").is_err());
        assert!(validate_relative_path("logs/../../secret").is_err());
        assert!(validate_relative_path("..").is_err());
        assert!(validate_relative_path("logs/run.txt").is_ok());
    }

    #[test]
    fn output_files_truncate_or_append() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = TestStorage::new(dir.path());
        {
            let mut file = storage.open_output_file("logs/run.txt", false).expect("open");
            file.write_all(b"first\n").expect("write");
        }
        {
            let mut file = storage.open_output_file("logs/run.txt", true).expect("append");
            file.write_all(b"second\n").expect("write");
        }
        let written = fs::read_to_string(dir.path().join(OUTPUT_FILES_AREA).join("logs/run.txt")).expect("read");
        assert_eq!(written, "first\nsecond\n");

        {
            let mut file = storage.open_output_file("logs/run.txt", false).expect("truncate");
            file.write_all(b"third\n").expect("write");
        }
        let written = fs::read_to_string(dir.path().join(OUTPUT_FILES_AREA).join("logs/run.txt")).expect("read");
        assert_eq!(written, "third\n");
    }

    #[test]
    fn input_files_come_from_runfiles() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runfiles = dir.path().join(RUNFILES_AREA);
        fs::create_dir_all(&runfiles).expect("mkdir");
        fs::write(runfiles.join("data.txt"), "payload").expect("seed");
        let storage = TestStorage::new(dir.path());
        let mut contents = String::new();
        storage
            .open_input_file("data.txt")
            .expect("open")
            .read_to_string(&mut contents)
            .expect("read");
        assert_eq!(contents, "payload");
        assert_eq!(storage.open_input_file("missing.txt").expect_err("missing").code, "ERR_DEPENDENCY");
        assert_eq!(storage.open_input_file("../escape").expect_err("escape").code, "ERR_VALIDATION");
    }

    #[test]
    fn properties_merge_and_args_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = TestStorage::new(dir.path());
        assert!(storage.output_properties().expect("empty").is_empty());
        assert!(storage.input_args().expect("no args").is_empty());

        storage
            .add_output_properties(&BTreeMap::from([("a".to_string(), "1".to_string())]))
            .expect("first");
        storage
            .add_output_properties(&BTreeMap::from([
                ("a".to_string(), "2".to_string()),
                ("b".to_string(), "3".to_string()),
            ]))
            .expect("second");
        let properties = storage.output_properties().expect("read");
        assert_eq!(properties.get("a").map(String::as_str), Some("2"));
        assert_eq!(properties.len(), 2);

        let args = BTreeMap::from([("class".to_string(), "org.example.A#one".to_string())]);
        storage.write_input_args(&args).expect("write args");
        assert_eq!(storage.input_args().expect("args"), args);
    }
}
