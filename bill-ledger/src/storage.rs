use std::{
    collections::HashSet,
    fs::{self, File, OpenOptions},
    io::{self, BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    time::Instant,
};

use core_types::Bill;
use log::{error, warn};

use crate::{
    config::backup_path,
    error::{LedgerError, Result},
    shard_key::ShardKey,
};

/// One calendar-day shard: newline-delimited JSON bills kept sorted by `at`.
///
/// The handle starts unopened. The first access reads whatever is on disk, sorts it and
/// rewrites the file once, leaving an append-mode handle behind. A handle whose file is `None`
/// after an operation failed mid-rewrite and must be reopened before the next write.
pub(crate) struct ShardFile {
    key: ShardKey,
    path: PathBuf,
    file: Option<File>,
    latest_record_at: i64,
    last_access_at: Instant,
}

impl ShardFile {
    pub(crate) fn unopened(key: ShardKey, path: PathBuf) -> Self {
        Self {
            key,
            path,
            file: None,
            latest_record_at: 0,
            last_access_at: Instant::now(),
        }
    }

    pub(crate) fn key(&self) -> &ShardKey {
        &self.key
    }

    pub(crate) fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub(crate) fn latest_record_at(&self) -> i64 {
        self.latest_record_at
    }

    pub(crate) fn last_access_at(&self) -> Instant {
        self.last_access_at
    }

    pub(crate) fn touch(&mut self) {
        self.last_access_at = Instant::now();
    }

    /// Opens the shard on first use. An empty or new shard counts as caught up to `now`.
    pub(crate) fn ensure_open(&mut self, now: i64) -> Result<()> {
        if self.file.is_some() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| LedgerError::io(parent, err))?;
        }
        let mut bills = self.load_with_backup()?;
        sort_bills(&mut bills);
        let latest = self.rewrite(&bills)?;
        self.latest_record_at = latest.unwrap_or(now);
        Ok(())
    }

    /// Fast path: writes one complete line at the end of the shard.
    pub(crate) fn append_line(&mut self, bill: &Bill) -> Result<()> {
        let path = &self.path;
        let file = self.file.as_mut().ok_or_else(|| {
            LedgerError::io(path.clone(), io::Error::other("shard file is not open"))
        })?;
        let mut line = serde_json::to_vec(bill).map_err(|err| LedgerError::json(path, err))?;
        line.push(b'\n');
        file.write_all(&line)
            .map_err(|err| LedgerError::io(path.clone(), err))?;
        self.latest_record_at = bill.at;
        Ok(())
    }

    /// Read-modify-rewrite of the whole shard.
    ///
    /// `edit` runs against the records currently on disk; when it fails the file is left
    /// untouched. Otherwise the edited set is stably sorted by `at` and written back.
    pub(crate) fn rebuild<R>(
        &mut self,
        now: i64,
        edit: impl FnOnce(&mut Vec<Bill>) -> Result<R>,
    ) -> Result<R> {
        let mut bills = read_bills(&self.path)?;
        let outcome = edit(&mut bills)?;
        sort_bills(&mut bills);
        let latest = self.rewrite(&bills)?;
        self.latest_record_at = latest.unwrap_or(now);
        Ok(outcome)
    }

    pub(crate) fn read_all(&self) -> Result<Vec<Bill>> {
        read_bills(&self.path)
    }

    pub(crate) fn close(&mut self) {
        self.file = None;
    }

    /// Moves the current file aside, writes `bills` into a fresh file and drops the backup.
    /// Returns the `at` of the last record written.
    fn rewrite(&mut self, bills: &[Bill]) -> Result<Option<i64>> {
        self.file = None;
        let backup = backup_path(&self.path);
        let had_file = self.path.exists();
        if had_file {
            fs::rename(&self.path, &backup).map_err(|err| LedgerError::io(&self.path, err))?;
        }

        let written = open_append(&self.path).and_then(|mut file| {
            let latest = write_bills(&mut file, &self.path, bills)?;
            Ok((file, latest))
        });
        match written {
            Ok((file, latest)) => {
                self.file = Some(file);
                if had_file {
                    if let Err(err) = fs::remove_file(&backup) {
                        warn!("failed to remove shard backup {}: {}", backup.display(), err);
                    }
                }
                Ok(latest)
            }
            Err(err) => {
                error!("rewrite of shard {} failed: {}", self.path.display(), err);
                if had_file {
                    if let Err(restore_err) = fs::rename(&backup, &self.path) {
                        error!(
                            "failed to restore shard backup {}: {}",
                            backup.display(),
                            restore_err
                        );
                    }
                }
                Err(err)
            }
        }
    }

    /// Reads the shard, folding in a backup left behind by an interrupted rewrite.
    fn load_with_backup(&self) -> Result<Vec<Bill>> {
        let backup = backup_path(&self.path);
        if !backup.exists() {
            return read_bills(&self.path);
        }
        if !self.path.exists() {
            warn!(
                "recovering shard {} from backup {}",
                self.path.display(),
                backup.display()
            );
            fs::rename(&backup, &self.path).map_err(|err| LedgerError::io(&backup, err))?;
            return read_bills(&self.path);
        }

        warn!(
            "merging stale backup {} into shard {}",
            backup.display(),
            self.path.display()
        );
        let mut bills = read_bills(&self.path)?;
        let known: HashSet<String> = bills.iter().map(|bill| bill.id.clone()).collect();
        bills.extend(
            read_bills(&backup)?
                .into_iter()
                .filter(|bill| !known.contains(&bill.id)),
        );
        fs::remove_file(&backup).map_err(|err| LedgerError::io(&backup, err))?;
        Ok(bills)
    }
}

pub(crate) fn sort_bills(bills: &mut [Bill]) {
    bills.sort_by_key(|bill| bill.at);
}

/// Reads every well-formed line of a shard file. A missing file is an empty shard; malformed
/// lines (torn writes, foreign data) are skipped and dropped by the next rewrite.
pub(crate) fn read_bills(path: &Path) -> Result<Vec<Bill>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(LedgerError::io(path, err)),
    };
    let reader = BufReader::new(file);
    let mut bills = Vec::new();
    for (line_no, line) in reader.split(b'\n').enumerate() {
        let line = line.map_err(|err| LedgerError::io(path, err))?;
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<Bill>(&line) {
            Ok(bill) => bills.push(bill),
            Err(err) => warn!(
                "skipping malformed line {} in {}: {}",
                line_no + 1,
                path.display(),
                err
            ),
        }
    }
    Ok(bills)
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| LedgerError::io(path, err))
}

fn write_bills(file: &mut File, path: &Path, bills: &[Bill]) -> Result<Option<i64>> {
    let mut writer = BufWriter::new(file);
    let mut latest = None;
    for bill in bills {
        serde_json::to_writer(&mut writer, bill).map_err(|err| LedgerError::json(path, err))?;
        writer
            .write_all(b"\n")
            .map_err(|err| LedgerError::io(path, err))?;
        latest = Some(bill.at);
    }
    writer.flush().map_err(|err| LedgerError::io(path, err))?;
    Ok(latest)
}

#[cfg(test)]
mod tests {
    use core_types::Direction;
    use tempfile::tempdir;

    use super::*;

    fn bill(id: &str, at: i64) -> Bill {
        let mut bill = Bill::new(1, 2, Direction::Outgoing, 100, at);
        bill.id = id.to_string();
        bill
    }

    fn ats(bills: &[Bill]) -> Vec<i64> {
        bills.iter().map(|bill| bill.at).collect()
    }

    fn shard(dir: &Path) -> ShardFile {
        let key = ShardKey::parse("20240101").unwrap();
        ShardFile::unopened(key, dir.join("1-20240101"))
    }

    #[test]
    fn new_shard_is_caught_up_to_now() {
        let dir = tempdir().unwrap();
        let mut shard = shard(dir.path());
        shard.ensure_open(1_000).unwrap();
        assert!(shard.is_open());
        assert_eq!(shard.latest_record_at(), 1_000);
        assert!(dir.path().join("1-20240101").exists());
    }

    #[test]
    fn open_sorts_existing_file_and_skips_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("1-20240101");
        let mut contents = String::new();
        for (id, at) in [("a", 30), ("b", 10), ("c", 20)] {
            contents.push_str(&serde_json::to_string(&bill(id, at)).unwrap());
            contents.push('\n');
        }
        contents.push_str("{\"id\":\"torn");
        fs::write(&path, contents).unwrap();

        let mut shard = shard(dir.path());
        shard.ensure_open(1_000).unwrap();
        assert_eq!(shard.latest_record_at(), 30);
        let bills = shard.read_all().unwrap();
        assert_eq!(ats(&bills), vec![10, 20, 30]);
        let raw = fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 3);
        assert!(!backup_path(&path).exists());
    }

    #[test]
    fn rebuild_keeps_equal_timestamps_in_arrival_order() {
        let dir = tempdir().unwrap();
        let mut shard = shard(dir.path());
        shard.ensure_open(1_000).unwrap();
        for (id, at) in [("x", 50), ("y", 40), ("z", 50)] {
            let entry = bill(id, at);
            shard
                .rebuild(1_000, |bills| {
                    bills.push(entry);
                    Ok(())
                })
                .unwrap();
        }
        let ids: Vec<String> = shard.read_all().unwrap().into_iter().map(|b| b.id).collect();
        assert_eq!(ids, vec!["y", "x", "z"]);
        assert_eq!(shard.latest_record_at(), 50);
    }

    #[test]
    fn failed_edit_leaves_file_untouched() {
        let dir = tempdir().unwrap();
        let mut shard = shard(dir.path());
        shard.ensure_open(0).unwrap();
        shard.append_line(&bill("a", 5)).unwrap();
        let err = shard
            .rebuild(0, |_| -> Result<()> {
                Err(LedgerError::BillNotFound {
                    group: 1,
                    id: "missing".into(),
                })
            })
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(shard.is_open());
        assert_eq!(ats(&shard.read_all().unwrap()), vec![5]);
    }

    #[test]
    fn failed_append_keeps_latest_record_at() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("1-20240101");
        let mut shard = shard(dir.path());
        shard.ensure_open(0).unwrap();
        shard.append_line(&bill("a", 20)).unwrap();

        // Swap in a read-only handle so the write itself fails.
        shard.file = Some(File::open(&path).unwrap());
        assert!(shard.append_line(&bill("b", 30)).is_err());
        assert_eq!(shard.latest_record_at(), 20);

        shard.close();
        let err = shard.append_line(&bill("c", 40)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Internal);
        assert_eq!(shard.latest_record_at(), 20);
        assert_eq!(ats(&read_bills(&path).unwrap()), vec![20]);
    }

    #[test]
    fn orphaned_backup_is_recovered_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("1-20240101");
        let line = serde_json::to_string(&bill("a", 7)).unwrap() + "\n";
        fs::write(backup_path(&path), line).unwrap();

        let mut shard = shard(dir.path());
        shard.ensure_open(1_000).unwrap();
        assert_eq!(ats(&shard.read_all().unwrap()), vec![7]);
        assert!(!backup_path(&path).exists());
    }

    #[test]
    fn stale_backup_is_merged_by_id() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("1-20240101");
        let encode = |bills: &[Bill]| {
            bills
                .iter()
                .map(|b| serde_json::to_string(b).unwrap() + "\n")
                .collect::<String>()
        };
        fs::write(&path, encode(&[bill("a", 1)])).unwrap();
        fs::write(backup_path(&path), encode(&[bill("a", 1), bill("b", 2)])).unwrap();

        let mut shard = shard(dir.path());
        shard.ensure_open(1_000).unwrap();
        let ids: Vec<String> = shard.read_all().unwrap().into_iter().map(|b| b.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(!backup_path(&path).exists());
    }
}
