/*++

Licensed under the Apache-2.0 license.

--*/
use thiserror::Error;

/// Errors produced by the package writer and reader.
///
/// `Io` only ever surfaces an OS-level failure (disk full, permission denied).
/// A short read while decoding a specific field is reported as `Malformed`
/// instead, so callers can tell "this isn't a PLDM package" apart from
/// "the disk had a problem".
#[derive(Debug, Error)]
pub enum PackageError {
    #[error("invalid package manifest: {0}")]
    Validation(String),

    #[error("malformed package: {0}")]
    Malformed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checksum mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { expected: u32, computed: u32 },
}

pub type Result<T> = std::result::Result<T, PackageError>;

/// Wraps an `UnexpectedEof` from a field read as [`PackageError::Malformed`],
/// any other I/O error as [`PackageError::Io`].
pub(crate) fn malformed_on_eof(err: std::io::Error, field: &str) -> PackageError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        PackageError::Malformed(format!("truncated while reading {field}"))
    } else {
        PackageError::Io(err)
    }
}
