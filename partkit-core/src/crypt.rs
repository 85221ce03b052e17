//! LUKS encryption of a block device with `cryptsetup`.
//!
//! The device is formatted with the first key slot's secret and then opened as
//! `/dev/mapper/<name>`. Passphrases travel on stdin, never in the argument list.

use partkit_error::{LayoutError, LayoutResult};
use partkit_hal::ProcessOps;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// luksFormat runs a key derivation benchmark and may take a while on slow machines.
const CRYPTSETUP_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// How a key slot is unlocked.
#[derive(Clone, PartialEq, Eq)]
pub enum KeyAuth {
    Passphrase(String),
    KeyFile(PathBuf),
}

impl fmt::Debug for KeyAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyAuth::Passphrase(_) => f.write_str("Passphrase(<redacted>)"),
            KeyAuth::KeyFile(path) => f.debug_tuple("KeyFile").field(path).finish(),
        }
    }
}

/// A LUKS key slot and the secret that fills it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySlot {
    pub slot: u32,
    pub auth: KeyAuth,
}

impl KeySlot {
    pub fn passphrase(slot: u32, passphrase: impl Into<String>) -> Self {
        Self {
            slot,
            auth: KeyAuth::Passphrase(passphrase.into()),
        }
    }

    pub fn key_file(slot: u32, path: impl Into<PathBuf>) -> Self {
        Self {
            slot,
            auth: KeyAuth::KeyFile(path.into()),
        }
    }
}

/// Run `cryptsetup` with `args`, supplying the slot's secret.
fn cryptsetup<R: ProcessOps + ?Sized>(
    runner: &R,
    mut args: Vec<String>,
    auth: &KeyAuth,
) -> LayoutResult<String> {
    let out = match auth {
        KeyAuth::Passphrase(passphrase) => {
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            runner.command_output_with_stdin(
                "cryptsetup",
                &args,
                passphrase.as_bytes(),
                CRYPTSETUP_TIMEOUT,
            )?
        }
        KeyAuth::KeyFile(path) => {
            args.push("--key-file".to_string());
            args.push(path.to_string_lossy().into_owned());
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            runner.command_output("cryptsetup", &args, CRYPTSETUP_TIMEOUT)?
        }
    };
    Ok(out)
}

/// Format `device` as LUKS and open it as `/dev/mapper/<mapped_name>`.
///
/// Only the first slot of `slots` is enrolled; it is also the one used to open the device.
pub fn encrypt_device<R: ProcessOps + ?Sized>(
    runner: &R,
    device: &str,
    mapped_name: &str,
    slots: &[KeySlot],
) -> LayoutResult<()> {
    let first = slots.first().ok_or_else(|| LayoutError::NoKeySlots {
        device: device.to_string(),
    })?;

    log::info!("Encrypting {} (key slot {})", device, first.slot);
    let format_args = vec![
        "luksFormat".to_string(),
        "--key-slot".to_string(),
        first.slot.to_string(),
        device.to_string(),
        "-".to_string(),
    ];
    cryptsetup(runner, format_args, &first.auth).inspect_err(|err| {
        log::error!("Failed to encrypt {}: {}", device, err);
    })?;

    log::info!("Opening {} as /dev/mapper/{}", device, mapped_name);
    let open_args = vec![
        "open".to_string(),
        device.to_string(),
        mapped_name.to_string(),
    ];
    cryptsetup(runner, open_args, &first.auth).inspect_err(|err| {
        log::error!("Failed to open encrypted device {}: {}", device, err);
    })?;
    Ok(())
}
