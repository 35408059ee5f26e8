//! Line-delimited JSON journals.
//!
//! Every entry is one self-contained JSON document followed by `\n`. Appends
//! are synced to disk before they return. A full rewrite goes through a
//! temporary sibling file that is synced and then renamed over the journal,
//! so a crash mid-rewrite leaves the previous contents intact.
//!
//! A crash or a failed append can leave a partial last line. Opening cuts the
//! file back to its last complete line, and appends start on a fresh line, so
//! later entries never merge into broken bytes.

use pinhole_core::error::{Result, StorageError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::borrow::Borrow;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const TEMP_SUFFIX: &str = "tmp";
const UNREADABLE_SUFFIX: &str = "unreadable";

/// An append-only journal of `T` entries backed by a single file.
#[derive(Debug)]
pub struct Journal<T> {
    path: PathBuf,
    _entry: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> Journal<T> {
    /// Opens the journal at `path` and replays every entry in file order.
    ///
    /// A missing file is created empty. A file that exists but cannot be read
    /// is moved aside to `<path>.unreadable` and replaced by an empty one, so
    /// the caller boots with no entries instead of failing. Lines that do not
    /// parse are skipped. An unterminated last line is dropped from the file,
    /// unless it is a complete entry, which only gets its missing `\n`.
    ///
    /// Fails if the empty replacement file cannot be created or a torn tail
    /// cannot be repaired.
    pub fn open(path: impl Into<PathBuf>) -> Result<(Self, Vec<T>)> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let journal = Self {
            path,
            _entry: PhantomData,
        };

        let entries = match fs::read(&journal.path) {
            Ok(bytes) => {
                journal.repair_tail(&bytes)?;
                journal.parse(&bytes)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %journal.path.display(), "journal missing, creating an empty one");
                journal.create_empty()?;
                Vec::new()
            }
            Err(err) => {
                warn!(
                    path = %journal.path.display(),
                    error = %err,
                    "journal unreadable, starting from an empty one"
                );
                journal.quarantine();
                journal.create_empty()?;
                Vec::new()
            }
        };

        Ok((journal, entries))
    }

    /// Returns the path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Checks that the backing file is present.
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Appends a single entry and syncs it to disk.
    ///
    /// If an earlier append left the file without a trailing `\n`, the entry
    /// is preceded by one so it lands on its own line.
    pub fn append(&self, entry: &T) -> Result<()> {
        let mut line = Vec::new();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;
        if !ends_with_newline(&mut file)? {
            line.push(b'\n');
        }

        serde_json::to_writer(&mut line, entry).map_err(serialization_error)?;
        line.push(b'\n');

        file.write_all(&line)?;
        file.flush()?;
        file.sync_data()?;

        Ok(())
    }

    /// Replaces the whole journal with `entries`.
    ///
    /// The new contents are written to a temporary sibling file, synced, and
    /// renamed over the journal. On failure the journal is left untouched.
    pub fn rewrite<I>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Borrow<T>,
    {
        let temp_path = self.sibling(TEMP_SUFFIX);

        let result = Self::write_all_to(&temp_path, entries)
            .and_then(|()| fs::rename(&temp_path, &self.path).map_err(StorageError::from));

        if result.is_err() {
            // the temp file may be half written; the journal itself is intact
            let _ = fs::remove_file(&temp_path);
        }

        result
    }

    fn write_all_to<I>(path: &Path, entries: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Borrow<T>,
    {
        let mut writer = BufWriter::new(File::create(path)?);
        for entry in entries {
            serde_json::to_writer(&mut writer, entry.borrow()).map_err(serialization_error)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;

        let file = writer
            .into_inner()
            .map_err(|err| StorageError::Persistence(err.to_string()))?;
        file.sync_all()?;

        Ok(())
    }

    fn parse(&self, bytes: &[u8]) -> Vec<T> {
        let mut entries = Vec::new();

        for (index, line) in bytes.split(|byte| *byte == b'\n').enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            match serde_json::from_slice(line) {
                Ok(entry) => entries.push(entry),
                Err(err) => warn!(
                    path = %self.path.display(),
                    line = index + 1,
                    error = %err,
                    "skipping malformed journal line"
                ),
            }
        }

        entries
    }

    /// Cuts an unterminated last line off the file. A tail that parses as a
    /// whole entry is kept and terminated instead.
    fn repair_tail(&self, bytes: &[u8]) -> Result<()> {
        if matches!(bytes.last(), None | Some(b'\n')) {
            return Ok(());
        }

        let valid_end = bytes
            .iter()
            .rposition(|&byte| byte == b'\n')
            .map_or(0, |position| position + 1);
        let tail = &bytes[valid_end..];

        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        if serde_json::from_slice::<T>(tail).is_ok() {
            debug!(path = %self.path.display(), "terminating last journal line");
            file.write_all(b"\n")?;
        } else {
            warn!(
                path = %self.path.display(),
                valid_end,
                discarded = tail.len(),
                "truncating torn journal tail"
            );
            file.set_len(valid_end as u64)?;
        }
        file.sync_all()?;

        Ok(())
    }

    fn create_empty(&self) -> Result<()> {
        File::create(&self.path)?;
        Ok(())
    }

    fn quarantine(&self) {
        let target = self.sibling(UNREADABLE_SUFFIX);
        if let Err(err) = fs::rename(&self.path, &target) {
            warn!(
                path = %self.path.display(),
                error = %err,
                "could not move unreadable journal aside"
            );
        }
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".");
        name.push(suffix);
        self.path.with_file_name(name)
    }
}

fn ends_with_newline(file: &mut File) -> io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }

    let mut last = [0_u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

fn serialization_error(err: serde_json::Error) -> StorageError {
    StorageError::Persistence(format!("failed to serialize journal entry: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Entry {
        id: u32,
        name: String,
    }

    fn entry(id: u32, name: &str) -> Entry {
        Entry {
            id,
            name: name.to_string(),
        }
    }

    #[test]
    fn missing_file_is_created_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("log.json");

        let (journal, entries) = Journal::<Entry>::open(&path).unwrap();

        assert!(entries.is_empty());
        assert!(journal.exists());
        assert_eq!(fs::read(&path).unwrap().len(), 0);
    }

    #[test]
    fn appended_entries_replay_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.json");

        let (journal, _) = Journal::<Entry>::open(&path).unwrap();
        journal.append(&entry(1, "one")).unwrap();
        journal.append(&entry(2, "two")).unwrap();
        journal.append(&entry(3, "three")).unwrap();

        let (_, entries) = Journal::<Entry>::open(&path).unwrap();
        assert_eq!(entries, vec![entry(1, "one"), entry(2, "two"), entry(3, "three")]);
    }

    #[test]
    fn each_entry_is_one_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.json");

        let (journal, _) = Journal::<Entry>::open(&path).unwrap();
        journal.append(&entry(1, "multi\nline")).unwrap();
        journal.append(&entry(2, "two")).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.json");
        fs::write(
            &path,
            "{\"id\":1,\"name\":\"one\"}\n\nnot json\n{\"id\":2,\"name\":\"two\"}\n{\"id\":3,\"na",
        )
        .unwrap();

        let (_, entries) = Journal::<Entry>::open(&path).unwrap();
        assert_eq!(entries, vec![entry(1, "one"), entry(2, "two")]);
    }

    #[test]
    fn torn_tail_is_truncated_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.json");
        fs::write(&path, "{\"id\":1,\"name\":\"one\"}\n{\"id\":2,\"na").unwrap();

        let (journal, entries) = Journal::<Entry>::open(&path).unwrap();
        assert_eq!(entries, vec![entry(1, "one")]);
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"id\":1,\"name\":\"one\"}\n");

        journal.append(&entry(3, "three")).unwrap();
        let (_, entries) = Journal::<Entry>::open(&path).unwrap();
        assert_eq!(entries, vec![entry(1, "one"), entry(3, "three")]);
    }

    #[test]
    fn complete_unterminated_entry_is_kept() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.json");
        fs::write(&path, "{\"id\":1,\"name\":\"one\"}").unwrap();

        let (journal, entries) = Journal::<Entry>::open(&path).unwrap();
        assert_eq!(entries, vec![entry(1, "one")]);

        journal.append(&entry(2, "two")).unwrap();
        let (_, entries) = Journal::<Entry>::open(&path).unwrap();
        assert_eq!(entries, vec![entry(1, "one"), entry(2, "two")]);
    }

    #[test]
    fn append_after_partial_write_starts_a_new_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.json");

        let (journal, _) = Journal::<Entry>::open(&path).unwrap();
        journal.append(&entry(1, "one")).unwrap();

        // what a write interrupted halfway leaves behind
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"id\":2,\"na").unwrap();
        drop(file);

        journal.append(&entry(3, "three")).unwrap();

        let (_, entries) = Journal::<Entry>::open(&path).unwrap();
        assert_eq!(entries, vec![entry(1, "one"), entry(3, "three")]);
    }

    #[test]
    fn rewrite_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.json");

        let (journal, _) = Journal::<Entry>::open(&path).unwrap();
        journal.append(&entry(1, "one")).unwrap();
        journal.append(&entry(2, "two")).unwrap();

        journal
            .rewrite([entry(2, "deux"), entry(4, "quatre")])
            .unwrap();

        let (_, entries) = Journal::<Entry>::open(&path).unwrap();
        assert_eq!(entries, vec![entry(2, "deux"), entry(4, "quatre")]);
        assert!(!dir.path().join("log.json.tmp").exists());
    }

    #[test]
    fn failed_rewrite_leaves_journal_intact() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.json");

        let (journal, _) = Journal::<Entry>::open(&path).unwrap();
        journal.append(&entry(1, "one")).unwrap();

        // a directory squatting on the temp path makes the rewrite fail
        fs::create_dir(dir.path().join("log.json.tmp")).unwrap();
        let err = journal.rewrite([entry(9, "nine")]).unwrap_err();
        assert!(matches!(err, StorageError::Persistence(_)));

        let (_, entries) = Journal::<Entry>::open(&path).unwrap();
        assert_eq!(entries, vec![entry(1, "one")]);
    }

    #[test]
    fn unreadable_journal_is_moved_aside() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.json");
        // reading a directory fails, which stands in for any unreadable file
        fs::create_dir(&path).unwrap();

        let (journal, entries) = Journal::<Entry>::open(&path).unwrap();

        assert!(entries.is_empty());
        assert!(journal.exists());
        assert!(dir.path().join("log.json.unreadable").is_dir());

        journal.append(&entry(1, "one")).unwrap();
        let (_, entries) = Journal::<Entry>::open(&path).unwrap();
        assert_eq!(entries, vec![entry(1, "one")]);
    }
}
