//! Fake HAL implementation for testing.
//!
//! This implementation records all operations without executing them,
//! allowing for CI-safe testing without root privileges or real hardware.
//! Command outputs and failures can be scripted per program.

use super::{FsOps, MountOps, ProcessOps, SystemOps};
use crate::{HalError, HalResult};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Operation records for testing and verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Command {
        program: String,
        args: Vec<String>,
        timeout_secs: u64,
        /// Bytes fed on stdin, if any.
        stdin: Option<Vec<u8>>,
    },
    Mount {
        device: PathBuf,
        target: PathBuf,
        fstype: Option<String>,
    },
    Unmount {
        target: PathBuf,
    },
    Sleep {
        millis: u64,
    },
}

type SideEffect = dyn Fn(&str, &[&str]) -> HalResult<String> + Send + Sync;

#[derive(Debug, Clone)]
struct FailRule {
    program: String,
    arg: Option<String>,
    output: String,
}

impl FailRule {
    fn matches(&self, program: &str, args: &[&str]) -> bool {
        self.program == program
            && self
                .arg
                .as_deref()
                .map_or(true, |wanted| args.iter().any(|a| *a == wanted))
    }
}

/// Shared state for FakeHal operations.
#[derive(Default)]
struct FakeHalState {
    /// All operations that were recorded
    operations: Vec<Operation>,
    /// Currently mounted paths
    mounted_paths: HashSet<PathBuf>,
    /// Paths reported as existing
    paths: HashSet<PathBuf>,
    symlinks: HashMap<PathBuf, PathBuf>,
    outputs: HashMap<String, String>,
    failures: Vec<FailRule>,
    side_effect: Option<Arc<SideEffect>>,
}

impl fmt::Debug for FakeHalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeHalState")
            .field("operations", &self.operations)
            .field("mounted_paths", &self.mounted_paths)
            .field("paths", &self.paths)
            .field("symlinks", &self.symlinks)
            .field("failures", &self.failures)
            .field("side_effect", &self.side_effect.is_some())
            .finish()
    }
}

/// Fake HAL implementation that records operations without executing them.
///
/// Clones share state, so a test can hand one clone to the code under test and
/// inspect the recorded operations through another.
#[derive(Debug, Clone, Default)]
pub struct FakeHal {
    state: Arc<Mutex<FakeHalState>>,
}

impl FakeHal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all recorded operations.
    pub fn operations(&self) -> Vec<Operation> {
        self.state.lock().unwrap().operations.clone()
    }

    /// Get the number of operations recorded.
    pub fn operation_count(&self) -> usize {
        self.state.lock().unwrap().operations.len()
    }

    /// Check if a specific operation was recorded.
    pub fn has_operation(&self, check: impl Fn(&Operation) -> bool) -> bool {
        self.state.lock().unwrap().operations.iter().any(check)
    }

    /// Recorded commands as `[program, args...]`, in call order.
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.state
            .lock()
            .unwrap()
            .operations
            .iter()
            .filter_map(|op| match op {
                Operation::Command { program, args, .. } => {
                    let mut cmd = vec![program.clone()];
                    cmd.extend(args.iter().cloned());
                    Some(cmd)
                }
                _ => None,
            })
            .collect()
    }

    /// Number of recorded sleeps.
    pub fn sleep_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .operations
            .iter()
            .filter(|op| matches!(op, Operation::Sleep { .. }))
            .count()
    }

    /// Clear all recorded operations.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.operations.clear();
        state.mounted_paths.clear();
    }

    /// Return `output` from every successful run of `program`.
    pub fn set_output(&self, program: &str, output: &str) {
        self.state
            .lock()
            .unwrap()
            .outputs
            .insert(program.to_string(), output.to_string());
    }

    /// Make `program` fail; when `arg` is given only invocations carrying that argument fail.
    ///
    /// `mount` and `umount` rules also apply to [`MountOps`] calls.
    pub fn fail_command(&self, program: &str, arg: Option<&str>) {
        self.fail_command_with_output(program, arg, "");
    }

    pub fn fail_command_with_output(&self, program: &str, arg: Option<&str>, output: &str) {
        self.state.lock().unwrap().failures.push(FailRule {
            program: program.to_string(),
            arg: arg.map(str::to_string),
            output: output.to_string(),
        });
    }

    /// Compute command results with a closure; takes precedence over [`FakeHal::set_output`].
    pub fn set_side_effect(
        &self,
        effect: impl Fn(&str, &[&str]) -> HalResult<String> + Send + Sync + 'static,
    ) {
        self.state.lock().unwrap().side_effect = Some(Arc::new(effect));
    }

    /// Whether `path` is mounted and not yet unmounted.
    pub fn is_mounted(&self, path: &Path) -> bool {
        self.state.lock().unwrap().mounted_paths.contains(path)
    }

    /// Report `path` as existing.
    pub fn add_path(&self, path: impl Into<PathBuf>) {
        self.state.lock().unwrap().paths.insert(path.into());
    }

    pub fn add_symlink(&self, link: impl Into<PathBuf>, target: impl Into<PathBuf>) {
        self.state
            .lock()
            .unwrap()
            .symlinks
            .insert(link.into(), target.into());
    }

    fn record_operation(&self, op: Operation) {
        self.state.lock().unwrap().operations.push(op);
    }

    fn scripted_failure(&self, program: &str, args: &[&str]) -> Option<HalError> {
        let state = self.state.lock().unwrap();
        state
            .failures
            .iter()
            .find(|rule| rule.matches(program, args))
            .map(|rule| HalError::CommandFailed {
                program: program.to_string(),
                code: Some(1),
                output: rule.output.clone(),
            })
    }
}

impl FakeHal {
    fn execute(
        &self,
        program: &str,
        args: &[&str],
        stdin: Option<&[u8]>,
        timeout: Duration,
    ) -> HalResult<String> {
        log::info!("FAKE HAL: {} {}", program, args.join(" "));
        self.record_operation(Operation::Command {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            timeout_secs: timeout.as_secs(),
            stdin: stdin.map(<[u8]>::to_vec),
        });

        if let Some(err) = self.scripted_failure(program, args) {
            return Err(err);
        }

        // Clone out of the lock so the closure may freely inspect the HAL.
        let effect = self.state.lock().unwrap().side_effect.clone();
        if let Some(effect) = effect {
            return effect(program, args);
        }

        Ok(self
            .state
            .lock()
            .unwrap()
            .outputs
            .get(program)
            .cloned()
            .unwrap_or_default())
    }
}

impl ProcessOps for FakeHal {
    fn command_output(&self, program: &str, args: &[&str], timeout: Duration) -> HalResult<String> {
        self.execute(program, args, None, timeout)
    }

    fn command_output_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        input: &[u8],
        timeout: Duration,
    ) -> HalResult<String> {
        self.execute(program, args, Some(input), timeout)
    }
}

impl MountOps for FakeHal {
    fn mount_device(&self, device: &Path, target: &Path, fstype: Option<&str>) -> HalResult<()> {
        log::info!(
            "FAKE HAL: mount {} -> {} (type: {:?})",
            device.display(),
            target.display(),
            fstype
        );

        self.record_operation(Operation::Mount {
            device: device.to_path_buf(),
            target: target.to_path_buf(),
            fstype: fstype.map(String::from),
        });
        if let Some(err) = self.scripted_failure("mount", &[]) {
            return Err(err);
        }
        self.state
            .lock()
            .unwrap()
            .mounted_paths
            .insert(target.to_path_buf());

        Ok(())
    }

    fn unmount(&self, target: &Path) -> HalResult<()> {
        log::info!("FAKE HAL: unmount {}", target.display());

        self.record_operation(Operation::Unmount {
            target: target.to_path_buf(),
        });
        if let Some(err) = self.scripted_failure("umount", &[]) {
            return Err(err);
        }
        self.state.lock().unwrap().mounted_paths.remove(target);

        Ok(())
    }
}

impl FsOps for FakeHal {
    fn path_exists(&self, path: &Path) -> bool {
        let state = self.state.lock().unwrap();
        state.paths.contains(path) || state.symlinks.contains_key(path)
    }

    fn read_symlink(&self, path: &Path) -> HalResult<Option<PathBuf>> {
        let state = self.state.lock().unwrap();
        if let Some(target) = state.symlinks.get(path) {
            return Ok(Some(target.clone()));
        }
        if state.paths.contains(path) {
            return Ok(None);
        }
        Err(HalError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} not found", path.display()),
        )))
    }

    fn temp_dir(&self, prefix: &str) -> HalResult<TempDir> {
        // Scratch directories are harmless; hand out real ones.
        Ok(tempfile::Builder::new().prefix(prefix).tempdir()?)
    }
}

impl SystemOps for FakeHal {
    fn sleep(&self, duration: Duration) {
        self.record_operation(Operation::Sleep {
            millis: duration.as_millis() as u64,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_hal_records_commands_in_order() {
        let hal = FakeHal::new();
        hal.run("udevadm", &["settle"]).unwrap();
        hal.run("partx", &["-u", "/dev/sda"]).unwrap();

        assert_eq!(
            hal.commands(),
            vec![
                vec!["udevadm".to_string(), "settle".to_string()],
                vec!["partx".to_string(), "-u".to_string(), "/dev/sda".to_string()],
            ]
        );
    }

    #[test]
    fn fake_hal_returns_scripted_output() {
        let hal = FakeHal::new();
        hal.set_output("blkid", "xfs\n");
        assert_eq!(hal.run("blkid", &["/dev/sda1"]).unwrap(), "xfs\n");
        assert_eq!(hal.run("lsblk", &[]).unwrap(), "");
    }

    #[test]
    fn fake_hal_fails_only_matching_invocations() {
        let hal = FakeHal::new();
        hal.fail_command_with_output("sgdisk", Some("-P"), "bad layout");

        let err = hal.run("sgdisk", &["-P", "/dev/sda"]).unwrap_err();
        assert_eq!(err.output(), Some("bad layout"));
        assert!(hal.run("sgdisk", &["-p", "/dev/sda"]).is_ok());
        assert_eq!(hal.operation_count(), 2);
    }

    #[test]
    fn fake_hal_records_stdin_separately_from_args() {
        let hal = FakeHal::new();
        hal.command_output_with_stdin(
            "cryptsetup",
            &["open", "/dev/sda2", "root"],
            b"pw",
            Duration::from_secs(1),
        )
        .unwrap();
        hal.run("cryptsetup", &["close", "root"]).unwrap();

        let ops = hal.operations();
        assert!(matches!(&ops[0], Operation::Command { stdin: Some(input), .. } if input == b"pw"));
        assert!(matches!(&ops[1], Operation::Command { stdin: None, .. }));
        assert_eq!(hal.commands()[0], vec!["cryptsetup", "open", "/dev/sda2", "root"]);
    }

    #[test]
    fn fake_hal_side_effect_takes_precedence() {
        let hal = FakeHal::new();
        hal.set_output("parted", "ignored");
        hal.set_side_effect(|program, args| Ok(format!("{program} {}", args.len())));
        assert_eq!(hal.run("parted", &["a", "b"]).unwrap(), "parted 2");
    }

    #[test]
    fn fake_hal_records_mount_and_unmount() {
        let hal = FakeHal::new();
        let target = Path::new("/mnt/test");

        hal.mount_device(Path::new("/dev/sda1"), target, Some("auto"))
            .unwrap();
        assert!(hal.is_mounted(target));

        hal.unmount(target).unwrap();
        assert!(!hal.is_mounted(target));
        assert_eq!(hal.operation_count(), 2);
        assert!(hal.has_operation(|op| matches!(op, Operation::Unmount { .. })));
    }

    #[test]
    fn fake_hal_scripted_umount_failure() {
        let hal = FakeHal::new();
        hal.fail_command("umount", None);
        assert!(hal.unmount(Path::new("/mnt/test")).is_err());
    }

    #[test]
    fn fake_hal_paths_and_symlinks() {
        let hal = FakeHal::new();
        hal.add_path("/dev/sda");
        hal.add_symlink("/dev/disk/by-id/ata-x", "../../sda");

        assert!(hal.path_exists(Path::new("/dev/sda")));
        assert!(hal.path_exists(Path::new("/dev/disk/by-id/ata-x")));
        assert_eq!(hal.read_symlink(Path::new("/dev/sda")).unwrap(), None);
        assert_eq!(
            hal.read_symlink(Path::new("/dev/disk/by-id/ata-x")).unwrap(),
            Some(PathBuf::from("../../sda"))
        );
        assert!(hal.read_symlink(Path::new("/dev/sdz")).is_err());
    }

    #[test]
    fn fake_hal_sleep_is_recorded_not_slept() {
        let hal = FakeHal::new();
        hal.sleep(Duration::from_secs(3600));
        assert_eq!(hal.sleep_count(), 1);
    }

    #[test]
    fn fake_hal_can_clear() {
        let hal = FakeHal::new();
        hal.run("wipefs", &["--all", "/dev/sda1"]).unwrap();
        assert_eq!(hal.operation_count(), 1);

        hal.clear();

        assert_eq!(hal.operation_count(), 0);
    }
}
