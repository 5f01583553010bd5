//! OS crash-dump configuration.
//!
//! On Windows, Windows Error Reporting writes local dumps according to
//! `HKLM\SOFTWARE\Microsoft\Windows\Windows Error Reporting\LocalDumps`.
//! Setting `DumpType` there is machine-wide, idempotent and needs an
//! elevated process.

use crate::config::DumpType;

#[cfg_attr(not(windows), allow(dead_code))]
pub const WER_KEY: &str = r"SOFTWARE\Microsoft\Windows\Windows Error Reporting";
#[cfg_attr(not(windows), allow(dead_code))]
pub const LOCAL_DUMPS_SUBKEY: &str = "LocalDumps";
#[cfg_attr(not(windows), allow(dead_code))]
pub const DUMP_TYPE_VALUE: &str = "DumpType";

/// Errors from configuring crash dumps.
#[derive(Debug)]
pub enum DumpConfigError {
    /// Opening or writing the registry key failed (commonly: not elevated).
    #[cfg_attr(not(windows), allow(dead_code))]
    Registry {
        key: String,
        source: std::io::Error,
    },
    /// This platform has no crash-dump setting the monitor knows how to write.
    #[cfg_attr(windows, allow(dead_code))]
    Unsupported,
}

impl std::fmt::Display for DumpConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DumpConfigError::Registry { key, source } => {
                if source.kind() == std::io::ErrorKind::PermissionDenied {
                    write!(f, "access denied writing HKLM\\{key} (run elevated): {source}")
                } else {
                    write!(f, "failed to write HKLM\\{key}: {source}")
                }
            }
            DumpConfigError::Unsupported => write!(
                f,
                "crash dump configuration is only supported on Windows; set dumps.configure = false"
            ),
        }
    }
}

impl std::error::Error for DumpConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DumpConfigError::Registry { source, .. } => Some(source),
            DumpConfigError::Unsupported => None,
        }
    }
}

/// Point the OS crash reporter at the requested dump type.
#[cfg(windows)]
pub fn configure(dump_type: DumpType) -> Result<(), DumpConfigError> {
    use winreg::enums::{HKEY_LOCAL_MACHINE, KEY_SET_VALUE};
    use winreg::RegKey;

    let hklm = RegKey::predef(HKEY_LOCAL_MACHINE);
    let wer = hklm
        .open_subkey_with_flags(WER_KEY, KEY_SET_VALUE)
        .map_err(|e| DumpConfigError::Registry {
            key: WER_KEY.to_string(),
            source: e,
        })?;

    let local_dumps_key = format!(r"{WER_KEY}\{LOCAL_DUMPS_SUBKEY}");
    let (local_dumps, _) = wer
        .create_subkey(LOCAL_DUMPS_SUBKEY)
        .map_err(|e| DumpConfigError::Registry {
            key: local_dumps_key.clone(),
            source: e,
        })?;

    local_dumps
        .set_value(DUMP_TYPE_VALUE, &dump_type.registry_value())
        .map_err(|e| DumpConfigError::Registry {
            key: local_dumps_key,
            source: e,
        })?;

    tracing::info!(
        dump_type = ?dump_type,
        value = dump_type.registry_value(),
        "Windows Error Reporting local dumps configured"
    );
    Ok(())
}

/// Point the OS crash reporter at the requested dump type.
#[cfg(not(windows))]
pub fn configure(dump_type: DumpType) -> Result<(), DumpConfigError> {
    tracing::debug!(dump_type = ?dump_type, "no crash dump facility to configure on this platform");
    Err(DumpConfigError::Unsupported)
}
