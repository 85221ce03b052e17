use std::io;
use thiserror::Error;

pub type HalResult<T> = Result<T, HalError>;
pub type LayoutResult<T> = Result<T, LayoutError>;

#[derive(Error, Debug)]
pub enum HalError {
    #[error("Command not found: {0}")]
    CommandNotFound(String),

    /// `output` holds the combined stdout and stderr of the failed tool.
    #[error("Command failed: {program} (exit={code:?}): {output}")]
    CommandFailed {
        program: String,
        code: Option<i32>,
        output: String,
    },

    #[error("Command timed out: {program} after {timeout_secs}s")]
    CommandTimeout { program: String, timeout_secs: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(String),
}

impl HalError {
    /// Tool output attached to a failed command, if any.
    pub fn output(&self) -> Option<&str> {
        match self {
            HalError::CommandFailed { output, .. } => Some(output),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum LayoutError {
    #[error(transparent)]
    Hal(#[from] HalError),

    #[error("unsupported filesystem: {0}")]
    UnsupportedFilesystem(String),

    #[error("invalid partition table type ({label}), {backend} supports: {supported}")]
    UnsupportedTableLabel {
        backend: String,
        label: String,
        supported: String,
    },

    #[error("partition table label is not set")]
    MissingTableLabel,

    #[error("not enough free space in disk. Required: {required} sectors; Available {available} sectors")]
    NotEnoughSpace { required: u64, available: u64 },

    #[error("can only expand a partition, not shrink it (current {current} sectors, requested {requested} sectors)")]
    ShrinkNotAllowed { current: u64, requested: u64 },

    #[error("there is no partition to expand")]
    NoPartitions,

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("could not find partition device '{device}' for partition {number}")]
    PartitionDeviceNotFound { device: String, number: u32 },

    #[error("could not resize filesystem '{fstype}' on {device}")]
    ResizeUnsupported { device: String, fstype: String },

    #[error("needs at least one key slot to encrypt {device}")]
    NoKeySlots { device: String },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl LayoutError {
    /// Tool output carried by a failed external command, if any.
    pub fn output(&self) -> Option<&str> {
        match self {
            LayoutError::Hal(err) => err.output(),
            _ => None,
        }
    }
}
