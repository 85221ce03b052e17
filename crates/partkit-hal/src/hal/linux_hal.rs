//! Linux HAL implementation using real processes and the real filesystem.

use super::{FsOps, MountOps, ProcessOps, SystemOps};
use crate::{HalError, HalResult};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;
use tempfile::TempDir;
use wait_timeout::ChildExt;

/// Real HAL implementation for Linux systems.
#[derive(Debug, Clone, Default)]
pub struct LinuxHal;

impl LinuxHal {
    pub fn new() -> Self {
        Self
    }
}

const MOUNT_TIMEOUT: Duration = Duration::from_secs(60);

fn map_command_err(program: &str, err: std::io::Error) -> HalError {
    if err.kind() == std::io::ErrorKind::NotFound {
        return HalError::CommandNotFound(program.to_string());
    }
    HalError::Io(err)
}

/// Exit status plus stdout followed by stderr.
struct CommandOutput {
    status: ExitStatus,
    combined: String,
}

impl CommandOutput {
    fn into_result(self, program: &str) -> HalResult<String> {
        if self.status.success() {
            return Ok(self.combined);
        }
        Err(HalError::CommandFailed {
            program: program.to_string(),
            code: self.status.code(),
            output: self.combined.trim().to_string(),
        })
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

/// Spawn `cmd`, feed it `input` (stdin is closed otherwise) and wait at most `timeout`.
fn run_with_timeout(
    program: &str,
    cmd: &mut Command,
    input: Option<&[u8]>,
    timeout: Duration,
) -> HalResult<CommandOutput> {
    let stdin = if input.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    };
    cmd.stdin(stdin).stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(|e| map_command_err(program, e))?;

    // Pipes are serviced on their own threads so a chatty tool cannot block on a full pipe.
    let writer = child.stdin.take().map(|mut pipe| {
        let data = input.unwrap_or_default().to_vec();
        std::thread::spawn(move || {
            let _ = pipe.write_all(&data);
        })
    });
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let waited = child.wait_timeout(timeout).map_err(HalError::Io)?;
    let Some(status) = waited else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(HalError::CommandTimeout {
            program: program.to_string(),
            timeout_secs: timeout.as_secs(),
        });
    };

    if let Some(writer) = writer {
        let _ = writer.join();
    }
    let mut combined = String::from_utf8_lossy(&stdout.join().unwrap_or_default()).into_owned();
    combined.push_str(&String::from_utf8_lossy(&stderr.join().unwrap_or_default()));
    Ok(CommandOutput { status, combined })
}

impl ProcessOps for LinuxHal {
    fn command_output(&self, program: &str, args: &[&str], timeout: Duration) -> HalResult<String> {
        log::debug!("running: {} {}", program, args.join(" "));
        let mut cmd = Command::new(program);
        cmd.args(args);
        run_with_timeout(program, &mut cmd, None, timeout)?.into_result(program)
    }

    fn command_output_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        input: &[u8],
        timeout: Duration,
    ) -> HalResult<String> {
        log::debug!("running (with stdin): {} {}", program, args.join(" "));
        let mut cmd = Command::new(program);
        cmd.args(args);
        run_with_timeout(program, &mut cmd, Some(input), timeout)?.into_result(program)
    }
}

impl MountOps for LinuxHal {
    fn mount_device(&self, device: &Path, target: &Path, fstype: Option<&str>) -> HalResult<()> {
        log::debug!("mounting {} on {}", device.display(), target.display());
        let mut cmd = Command::new("mount");
        cmd.arg(device).arg(target);
        if let Some(fstype) = fstype {
            cmd.args(["-t", fstype]);
        }
        run_with_timeout("mount", &mut cmd, None, MOUNT_TIMEOUT)?.into_result("mount")?;
        Ok(())
    }

    fn unmount(&self, target: &Path) -> HalResult<()> {
        let mut cmd = Command::new("umount");
        cmd.arg(target);
        run_with_timeout("umount", &mut cmd, None, MOUNT_TIMEOUT)?.into_result("umount")?;
        Ok(())
    }
}

impl FsOps for LinuxHal {
    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_symlink(&self, path: &Path) -> HalResult<Option<PathBuf>> {
        let meta = fs::symlink_metadata(path)?;
        if !meta.file_type().is_symlink() {
            return Ok(None);
        }
        Ok(Some(fs::read_link(path)?))
    }

    fn temp_dir(&self, prefix: &str) -> HalResult<TempDir> {
        Ok(tempfile::Builder::new().prefix(prefix).tempdir()?)
    }
}

impl SystemOps for LinuxHal {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
