use std::fs::{self, File, create_dir_all};
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;

use crate::error::{AppError, AppResult};

/// A JSON array of records persisted in one file
///
/// Every call reads or rewrites the whole file. Nothing is cached between calls, so edits made
/// by hand while the server is running are picked up by the next request.
#[derive(Debug, Clone)]
pub struct JsonFile<T> {
    path: PathBuf,
    _records: PhantomData<fn() -> T>,
}

impl<T> JsonFile<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _records: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every record in the file
    ///
    /// A missing file is created holding `[]`. A blank file is an empty collection. Anything else
    /// that does not parse is reported as [`AppError::CorruptStore`] so that a damaged file is
    /// never silently replaced by an empty one on the next write.
    pub fn read(&self) -> AppResult<Vec<T>> {
        if !self.path.exists() {
            self.init()?;
            return Ok(Vec::new());
        }

        let contents = fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&contents).map_err(|source| AppError::CorruptStore {
            path: self.path.clone(),
            source,
        })
    }

    /// Overwrite the file with `records`
    ///
    /// The JSON is written to a sibling temporary file first and renamed into place.
    pub fn write(&self, records: &[T]) -> AppResult<()> {
        let dir = self.parent_dir();
        create_dir_all(&dir)?;

        let mut json = serde_json::to_string_pretty(records)?;
        json.push('\n');

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| AppError::Io(e.error))?;

        Ok(())
    }

    fn init(&self) -> AppResult<()> {
        create_dir_all(self.parent_dir())?;
        let mut file = File::create(&self.path)?;
        file.write_all(b"[]\n")?;
        Ok(())
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

/// Largest record id the stores hand out or accept
///
/// Ids stay exact as JSON numbers in browsers and as spreadsheet cells, both of which hold
/// integers only up to 2^53.
pub const MAX_ID: u64 = (1 << 53) - 1;

/// One past the largest id in `ids`, or 1 for an empty collection
///
/// # Errors
/// * `Internal` when the stored ids already reach [`MAX_ID`]
pub fn next_id(ids: impl IntoIterator<Item = u64>) -> AppResult<u64> {
    let max = ids.into_iter().max().unwrap_or(0);
    max.checked_add(1)
        .filter(|id| *id <= MAX_ID)
        .ok_or_else(|| AppError::Internal(format!("no record id left after {}", max)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        id: u64,
        name: String,
    }

    #[test]
    fn missing_file_is_created_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store: JsonFile<Row> = JsonFile::new(dir.path().join("nested/rows.json"));

        assert!(store.read().unwrap().is_empty());
        assert_eq!(fs::read_to_string(store.path()).unwrap().trim(), "[]");
    }

    #[test]
    fn write_then_read_keeps_records_and_newlines() {
        let dir = tempfile::tempdir().unwrap();
        let store: JsonFile<Row> = JsonFile::new(dir.path().join("rows.json"));
        let rows = vec![
            Row { id: 1, name: "a".into() },
            Row { id: 2, name: "b".into() },
        ];

        store.write(&rows).unwrap();

        let text = fs::read_to_string(store.path()).unwrap();
        assert!(text.contains('\n'));
        assert!(text.ends_with('\n'));
        assert_eq!(store.read().unwrap(), rows);
    }

    #[test]
    fn blank_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.json");
        fs::write(&path, "  \n").unwrap();

        let store: JsonFile<Row> = JsonFile::new(path);
        assert!(store.read().unwrap().is_empty());
    }

    #[test]
    fn corrupt_file_is_an_error_and_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.json");
        fs::write(&path, "[{\"id\": 1,").unwrap();

        let store: JsonFile<Row> = JsonFile::new(&path);
        match store.read() {
            Err(AppError::CorruptStore { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected CorruptStore, got {:?}", other),
        }
        assert_eq!(fs::read_to_string(&path).unwrap(), "[{\"id\": 1,");
    }

    #[test]
    fn next_id_is_one_past_the_maximum() {
        assert_eq!(next_id(Vec::<u64>::new()).unwrap(), 1);
        assert_eq!(next_id(vec![3, 9, 4]).unwrap(), 10);
    }

    #[test]
    fn next_id_refuses_to_pass_the_ceiling() {
        assert_eq!(next_id(vec![MAX_ID - 1]).unwrap(), MAX_ID);
        assert!(matches!(next_id(vec![MAX_ID]), Err(AppError::Internal(_))));
        assert!(matches!(next_id(vec![u64::MAX]), Err(AppError::Internal(_))));
    }
}
