//! Platform-specific logging directory resolution.

use std::path::PathBuf;

/// Returns the platform-appropriate directory for log files.
///
/// | Platform | Directory |
/// |----------|-----------|
/// | Linux | `$XDG_STATE_HOME/mirage/logs` or `~/.local/state/mirage/logs` |
/// | macOS | `~/Library/Logs/mirage` |
/// | other | `<data_local_dir>/logs` |
///
/// Falls back to `./logs` when no home directory can be determined, which is
/// the common case on a headless device running as a system user.
pub fn log_dir() -> PathBuf {
    let Some(base) = directories::ProjectDirs::from("", "", "mirage") else {
        return PathBuf::from("logs");
    };

    #[cfg(target_os = "linux")]
    {
        base.state_dir()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| base.data_local_dir().join("state"))
            .join("logs")
    }

    #[cfg(target_os = "macos")]
    {
        // data_local_dir → ~/Library/Application Support/mirage, walk up to ~/Library
        let library = base
            .data_local_dir()
            .parent()
            .and_then(|p| p.parent())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| base.data_local_dir().to_path_buf());
        library.join("Logs").join("mirage")
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        base.data_local_dir().join("logs")
    }
}

/// Ensures the log directory exists, creating it if necessary.
pub fn ensure_log_dir() -> Result<PathBuf, std::io::Error> {
    let dir = log_dir();
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Returns the path of the HUD log file.
pub fn hud_log_path() -> PathBuf {
    log_dir().join("mirage-hud.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_path_in_log_dir() {
        let path = hud_log_path();
        assert_eq!(path.parent(), Some(log_dir().as_path()));
        assert_eq!(path.file_name().unwrap(), "mirage-hud.log");
    }
}
