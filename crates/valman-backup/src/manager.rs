//! Backup creation, rotation, and crash-safe restoration.
//!
//! The manager knows exactly two source files per backup unit: the world's
//! primary data file (`<world>.db`) and its metadata file (`<world>.fwl`).
//! Backups live at `<server_location>/backups/<world>/<timestamp>.zip`.

use crate::archive;
use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use valman_common::{BackupEntry, BackupError, BackupPolicy, BackupResult};

/// Minute-granularity timestamp encoded in backup file names. At most one
/// backup can exist per minute.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H-%M";

/// Manages the backups of one world.
pub struct BackupManager {
    world_name: String,
    worlds_dir: PathBuf,
    backup_dir: PathBuf,
    policy: BackupPolicy,
    /// Serializes create/clean/restore so a rotation can never delete a
    /// backup mid-creation and a restore never races a scheduled cycle.
    guard: tokio::sync::Mutex<()>,
    timer_task: Mutex<Option<JoinHandle<()>>>,
    timer_cancel: Mutex<CancellationToken>,
}

impl BackupManager {
    /// Create a manager for `world_name`, storing backups under
    /// `<server_location>/backups/<world_name>/`.
    pub fn new(
        server_location: &Path,
        worlds_dir: PathBuf,
        world_name: impl Into<String>,
        policy: BackupPolicy,
    ) -> BackupResult<Self> {
        let world_name = world_name.into();
        let backup_dir = server_location.join("backups").join(&world_name);
        fs::create_dir_all(&backup_dir)?;

        Ok(Self {
            world_name,
            worlds_dir,
            backup_dir,
            policy,
            guard: tokio::sync::Mutex::new(()),
            timer_task: Mutex::new(None),
            timer_cancel: Mutex::new(CancellationToken::new()),
        })
    }

    /// The world's primary data file.
    pub fn db_path(&self) -> PathBuf {
        self.worlds_dir.join(format!("{}.db", self.world_name))
    }

    /// The world's metadata file.
    pub fn fwl_path(&self) -> PathBuf {
        self.worlds_dir.join(format!("{}.fwl", self.world_name))
    }

    /// Directory holding this world's backups.
    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// The retention policy this manager was built with.
    pub fn policy(&self) -> BackupPolicy {
        self.policy
    }

    /// Create a backup of the current world file pair.
    ///
    /// Both sources must exist and be non-empty; the resulting archive is
    /// verified to be non-empty. Any failure surfaces as
    /// [`BackupError::BackupFailed`] wrapping the cause, and no partial
    /// backup is registered as valid.
    pub async fn create_backup(&self) -> BackupResult<BackupEntry> {
        let _guard = self.guard.lock().await;
        self.create_backup_inner().map_err(BackupError::backup_failed)
    }

    fn create_backup_inner(&self) -> BackupResult<BackupEntry> {
        let db = self.db_path();
        let fwl = self.fwl_path();

        for path in [&db, &fwl] {
            let metadata = fs::metadata(path)?;
            if metadata.len() == 0 {
                return Err(BackupError::EmptySource { path: path.clone() });
            }
        }

        let now = Utc::now();
        let stamp = now.format(TIMESTAMP_FORMAT).to_string();
        let file_name = format!("{stamp}.zip");
        let destination = self.backup_dir.join(&file_name);

        archive::create_archive(&[db, fwl], &destination)?;

        let size_bytes = fs::metadata(&destination)?.len();
        if size_bytes == 0 {
            return Err(BackupError::EmptyArchive { path: destination });
        }

        // The entry's creation time is the minute encoded in its name.
        let created_at = parse_backup_timestamp(&file_name).unwrap_or(now);

        Ok(BackupEntry {
            file_name,
            world_name: self.world_name.clone(),
            full_path: destination,
            created_at,
            age: chrono::Duration::zero(),
            size_bytes,
        })
    }

    /// List the backups of this world.
    ///
    /// A missing or empty backup directory yields an empty list, not an
    /// error. Ages are signed and relative to now: more negative = older.
    /// Files whose names do not parse as backup timestamps are skipped with
    /// a warning.
    pub fn list_backups(&self) -> BackupResult<Vec<BackupEntry>> {
        let entries = match fs::read_dir(&self.backup_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let now = Utc::now();
        let mut results = Vec::new();

        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().into_owned();

            match parse_backup_timestamp(&file_name) {
                Ok(created_at) => {
                    let metadata = entry.metadata()?;
                    results.push(BackupEntry {
                        file_name,
                        world_name: self.world_name.clone(),
                        full_path: entry.path(),
                        created_at,
                        age: created_at - now,
                        size_bytes: metadata.len(),
                    });
                }
                Err(e) => {
                    warn!(file = %file_name, error = %e, "skipping file with unrecognized backup name");
                }
            }
        }

        Ok(results)
    }

    /// Remove backups beyond the retention limit.
    ///
    /// Sorts ascending by age (oldest first) and deletes from the front
    /// until exactly `retention_count` entries remain. A deletion failure is
    /// logged and the remaining excess entries are still attempted; the
    /// operation is best-effort per entry, not atomic as a whole.
    pub async fn clean_backups(&self) -> BackupResult<()> {
        let _guard = self.guard.lock().await;
        self.clean_backups_inner()
    }

    fn clean_backups_inner(&self) -> BackupResult<()> {
        let mut backups = self.list_backups()?;
        let limit = self.policy.retention_count;
        if backups.len() <= limit {
            return Ok(());
        }

        backups.sort_by_key(|backup| backup.age);
        let excess = backups.len() - limit;

        for backup in &backups[..excess] {
            match fs::remove_file(&backup.full_path) {
                Ok(()) => info!(file = %backup.file_name, "removed expired backup"),
                Err(e) => {
                    error!(file = %backup.file_name, error = %e, "failed to remove a backup");
                }
            }
        }

        Ok(())
    }

    /// Restore the world from the backup at `backup_path`.
    ///
    /// The current world files are renamed to `.old` sidecars before the
    /// archive is extracted. Any failure after that rename puts the
    /// sidecars back before the error is returned: a restore never leaves
    /// the world worse than before the attempt. A successful restore leaves
    /// the sidecars in place; the next restore sweeps them.
    pub async fn restore(&self, backup_path: &Path) -> BackupResult<()> {
        let _guard = self.guard.lock().await;
        info!(backup = %backup_path.display(), "attempting to restore the world");

        // Failures up to the rename need no compensation.
        let metadata = fs::metadata(backup_path)
            .map_err(|e| BackupError::restore_failed(backup_path, e.into()))?;
        if metadata.len() == 0 {
            return Err(BackupError::restore_failed(
                backup_path,
                BackupError::EmptyArchive {
                    path: backup_path.to_path_buf(),
                },
            ));
        }

        let db = self.db_path();
        let fwl = self.fwl_path();
        let db_old = sidecar(&db);
        let fwl_old = sidecar(&fwl);

        // Sweep sidecars left by a previous interrupted restore.
        for stale in [&db_old, &fwl_old] {
            remove_if_exists(stale).map_err(|e| BackupError::restore_failed(backup_path, e.into()))?;
        }

        // Set the current pair aside. A missing current file is tolerated;
        // the world may never have been saved on this machine.
        let _ = fs::rename(&db, &db_old);
        let _ = fs::rename(&fwl, &fwl_old);

        if let Err(cause) = self.extract_and_validate(backup_path, &db, &fwl) {
            // Put the originals back, then surface the failure. A sidecar
            // that never existed is tolerated here too.
            let _ = fs::rename(&db_old, &db);
            let _ = fs::rename(&fwl_old, &fwl);
            return Err(BackupError::restore_failed(backup_path, cause));
        }

        info!(backup = %backup_path.display(), "successfully restored the world");
        Ok(())
    }

    fn extract_and_validate(&self, backup_path: &Path, db: &Path, fwl: &Path) -> BackupResult<()> {
        archive::extract_archive(backup_path, &self.worlds_dir)?;

        for path in [db, fwl] {
            let metadata = fs::metadata(path)?;
            if metadata.len() == 0 {
                return Err(BackupError::EmptySource {
                    path: path.to_path_buf(),
                });
            }
        }
        Ok(())
    }

    /// Arm the scheduled backup cycle at the configured frequency.
    pub fn resume_backups(self: Arc<Self>) {
        let interval = Duration::from_secs(self.policy.frequency_minutes * 60);
        self.resume_backups_every(interval);
    }

    /// Arm the scheduled backup cycle with an explicit interval.
    ///
    /// Each cycle creates a backup and then rotates. A failed cycle is
    /// logged and skipped; the timer itself is never torn down by a
    /// failure. Idempotent while armed.
    pub fn resume_backups_every(self: Arc<Self>, interval: Duration) {
        let mut task = self.timer_task.lock();
        if let Some(existing) = task.as_ref() {
            if !existing.is_finished() {
                return;
            }
        }

        info!(
            interval_secs = interval.as_secs(),
            "scheduling automatic backups"
        );

        let token = CancellationToken::new();
        *self.timer_cancel.lock() = token.clone();

        let manager = Arc::clone(&self);
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick fires immediately; the first backup should
            // happen one full interval from now.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("automatic backup task cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        match manager.create_backup().await {
                            Ok(entry) => {
                                info!(file = %entry.file_name, "created automatic backup");
                                if let Err(e) = manager.clean_backups().await {
                                    error!(error = %e, "automatic backup rotation failed");
                                }
                            }
                            Err(e) => {
                                error!(error = %e, "unexpected error during automatic backup");
                            }
                        }
                    }
                }
            }
        }));
    }

    /// Disarm the scheduled backup cycle.
    pub fn pause_backups(&self) {
        self.timer_cancel.lock().cancel();
        if let Some(task) = self.timer_task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for BackupManager {
    fn drop(&mut self) {
        self.timer_cancel.lock().cancel();
        if let Some(task) = self.timer_task.lock().take() {
            task.abort();
        }
    }
}

/// `<path>.old` — the rollback sidecar for a world file.
fn sidecar(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".old");
    PathBuf::from(name)
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Parse `YYYY-MM-DD HH-MM.zip` back into its creation time.
fn parse_backup_timestamp(file_name: &str) -> BackupResult<DateTime<Utc>> {
    let stem = file_name
        .strip_suffix(".zip")
        .ok_or_else(|| BackupError::InvalidName {
            name: file_name.to_string(),
        })?;

    let naive = NaiveDateTime::parse_from_str(stem, TIMESTAMP_FORMAT).map_err(|_| {
        BackupError::InvalidName {
            name: file_name.to_string(),
        }
    })?;

    Ok(naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        manager: Arc<BackupManager>,
        _dir: tempfile::TempDir,
    }

    fn fixture(retention_count: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let worlds_dir = dir.path().join("worlds");
        fs::create_dir_all(&worlds_dir).unwrap();
        fs::write(worlds_dir.join("Test.db"), b"primary world data").unwrap();
        fs::write(worlds_dir.join("Test.fwl"), b"world metadata").unwrap();

        let manager = BackupManager::new(
            &dir.path().join("server"),
            worlds_dir,
            "Test",
            BackupPolicy {
                frequency_minutes: 60,
                retention_count,
            },
        )
        .unwrap();

        Fixture {
            manager: Arc::new(manager),
            _dir: dir,
        }
    }

    fn plant_backup(manager: &BackupManager, name: &str) {
        fs::write(manager.backup_dir().join(name), b"zipdata").unwrap();
    }

    fn backup_names(manager: &BackupManager) -> Vec<String> {
        let mut names: Vec<String> = manager
            .list_backups()
            .unwrap()
            .into_iter()
            .map(|b| b.file_name)
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_create_backup_produces_nonempty_archive() {
        let fx = fixture(6);

        let entry = fx.manager.create_backup().await.unwrap();
        assert_eq!(entry.world_name, "Test");
        assert!(entry.file_name.ends_with(".zip"));
        assert!(entry.size_bytes > 0);
        assert_eq!(entry.age, chrono::Duration::zero());
        assert!(entry.full_path.exists());
    }

    #[tokio::test]
    async fn test_create_backup_rejects_empty_source() {
        let fx = fixture(6);
        fs::write(fx.manager.db_path(), b"").unwrap();

        let err = fx.manager.create_backup().await.unwrap_err();
        match err {
            BackupError::BackupFailed { source } => {
                assert!(matches!(*source, BackupError::EmptySource { .. }));
            }
            e => panic!("expected BackupFailed, got: {:?}", e),
        }
        assert!(backup_names(&fx.manager).is_empty(), "no partial backup may remain registered");
    }

    #[test]
    fn test_list_backups_empty_directory() {
        let fx = fixture(6);
        assert!(fx.manager.list_backups().unwrap().is_empty());
    }

    #[test]
    fn test_list_backups_ages_are_negative_for_old_entries() {
        let fx = fixture(6);
        plant_backup(&fx.manager, "2020-01-01 00-00.zip");

        let backups = fx.manager.list_backups().unwrap();
        assert_eq!(backups.len(), 1);
        assert!(backups[0].age < chrono::Duration::zero());
    }

    #[test]
    fn test_list_backups_skips_unrecognized_names() {
        let fx = fixture(6);
        plant_backup(&fx.manager, "2020-01-01 00-00.zip");
        fs::write(fx.manager.backup_dir().join("notes.txt"), b"hi").unwrap();
        fs::write(fx.manager.backup_dir().join("not-a-date.zip"), b"hi").unwrap();

        let backups = fx.manager.list_backups().unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].file_name, "2020-01-01 00-00.zip");
    }

    #[tokio::test]
    async fn test_clean_removes_only_the_oldest_beyond_retention() {
        let fx = fixture(2);
        // Ages roughly -10d, -5d, -1d relative to the newest.
        plant_backup(&fx.manager, "2024-01-01 00-00.zip");
        plant_backup(&fx.manager, "2024-01-06 00-00.zip");
        plant_backup(&fx.manager, "2024-01-10 00-00.zip");

        fx.manager.clean_backups().await.unwrap();

        assert_eq!(
            backup_names(&fx.manager),
            vec!["2024-01-06 00-00.zip", "2024-01-10 00-00.zip"]
        );
    }

    #[tokio::test]
    async fn test_clean_retention_scenario_seven_backups_keep_six() {
        let fx = fixture(6);
        for hour in 0..=6 {
            plant_backup(&fx.manager, &format!("2024-01-01 0{hour}-00.zip"));
        }

        fx.manager.clean_backups().await.unwrap();

        let names = backup_names(&fx.manager);
        assert_eq!(names.len(), 6);
        assert!(!names.contains(&"2024-01-01 00-00.zip".to_string()));
        assert_eq!(names[0], "2024-01-01 01-00.zip");
        assert_eq!(names[5], "2024-01-01 06-00.zip");
    }

    #[tokio::test]
    async fn test_clean_twice_is_a_noop_the_second_time() {
        let fx = fixture(2);
        plant_backup(&fx.manager, "2024-01-01 00-00.zip");
        plant_backup(&fx.manager, "2024-01-02 00-00.zip");
        plant_backup(&fx.manager, "2024-01-03 00-00.zip");

        fx.manager.clean_backups().await.unwrap();
        let after_first = backup_names(&fx.manager);

        fx.manager.clean_backups().await.unwrap();
        let after_second = backup_names(&fx.manager);

        assert_eq!(after_first, after_second);
        assert_eq!(after_second.len(), 2);
    }

    #[tokio::test]
    async fn test_restore_replaces_world_files() {
        let fx = fixture(6);
        let entry = fx.manager.create_backup().await.unwrap();

        // The world moves on after the backup.
        fs::write(fx.manager.db_path(), b"newer state").unwrap();
        fs::write(fx.manager.fwl_path(), b"newer meta").unwrap();

        fx.manager.restore(&entry.full_path).await.unwrap();

        assert_eq!(fs::read(fx.manager.db_path()).unwrap(), b"primary world data");
        assert_eq!(fs::read(fx.manager.fwl_path()).unwrap(), b"world metadata");
    }

    #[tokio::test]
    async fn test_failed_restore_rolls_back_and_leaves_no_sidecars() {
        let fx = fixture(6);
        // Non-empty but not a zip: passes the pre-check, fails extraction,
        // which is after the rename step.
        let bogus = fx.manager.backup_dir().join("2024-01-01 00-00.zip");
        fs::write(&bogus, b"garbage, not an archive").unwrap();

        let err = fx.manager.restore(&bogus).await.unwrap_err();
        assert!(matches!(err, BackupError::RestoreFailed { .. }));

        // The originals are back, unchanged.
        assert_eq!(fs::read(fx.manager.db_path()).unwrap(), b"primary world data");
        assert_eq!(fs::read(fx.manager.fwl_path()).unwrap(), b"world metadata");

        // And no sidecars remain.
        assert!(!sidecar(&fx.manager.db_path()).exists());
        assert!(!sidecar(&fx.manager.fwl_path()).exists());
    }

    #[tokio::test]
    async fn test_restore_fails_cleanly_before_rename_on_empty_archive() {
        let fx = fixture(6);
        let empty = fx.manager.backup_dir().join("2024-01-01 00-00.zip");
        fs::write(&empty, b"").unwrap();

        let err = fx.manager.restore(&empty).await.unwrap_err();
        assert!(matches!(err, BackupError::RestoreFailed { .. }));

        // Nothing was touched: originals intact, no sidecars.
        assert_eq!(fs::read(fx.manager.db_path()).unwrap(), b"primary world data");
        assert!(!sidecar(&fx.manager.db_path()).exists());
    }

    #[tokio::test]
    async fn test_restore_tolerates_missing_current_files() {
        let fx = fixture(6);
        let entry = fx.manager.create_backup().await.unwrap();

        // A fresh machine: no current world files at all.
        fs::remove_file(fx.manager.db_path()).unwrap();
        fs::remove_file(fx.manager.fwl_path()).unwrap();

        fx.manager.restore(&entry.full_path).await.unwrap();
        assert_eq!(fs::read(fx.manager.db_path()).unwrap(), b"primary world data");
    }

    #[tokio::test]
    async fn test_scheduled_cycle_creates_and_rotates() {
        let fx = fixture(6);

        fx.manager.clone().resume_backups_every(Duration::from_millis(50));
        tokio::time::sleep(Duration::from_millis(200)).await;
        fx.manager.pause_backups();

        // Minute-granularity names collapse all cycles into one entry.
        let backups = fx.manager.list_backups().unwrap();
        assert_eq!(backups.len(), 1);
    }

    #[tokio::test]
    async fn test_scheduled_cycle_survives_failures() {
        let fx = fixture(6);
        // Empty the source so every cycle fails.
        fs::write(fx.manager.db_path(), b"").unwrap();

        fx.manager.clone().resume_backups_every(Duration::from_millis(30));
        tokio::time::sleep(Duration::from_millis(120)).await;

        // The timer is still armed despite the failures; repair the world
        // and the next cycle succeeds.
        fs::write(fx.manager.db_path(), b"repaired").unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        fx.manager.pause_backups();

        assert_eq!(fx.manager.list_backups().unwrap().len(), 1);
    }
}
