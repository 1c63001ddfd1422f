use std::path::{Path, PathBuf};

use crate::defaults::{CONFIG_FILE_NAME, PREFERENCES_FILE_NAME, SOCKET_FILE_NAME};

/// Get the daemon's home directory.
///
/// - `HEADLESSD_HOME` wins when set.
/// - In debug builds, prefer `{repo}/local-dev/headlessd` when running from a source checkout.
/// - Otherwise default to `~/.headlessd`.
pub fn headlessd_home_dir() -> Result<PathBuf, std::io::Error> {
    if let Ok(v) = std::env::var("HEADLESSD_HOME")
        && !v.trim().is_empty()
    {
        return Ok(PathBuf::from(v));
    }

    if cfg!(debug_assertions)
        && let Ok(exe) = std::env::current_exe()
        && let Some(dev_home) = dev_home_from_exe(&exe)
    {
        return Ok(dev_home);
    }

    let home = dirs::home_dir().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Could not determine home directory",
        )
    })?;

    Ok(home.join(".headlessd"))
}

/// If the binary is being run from a path under a `target/` directory, return that
/// `target/` directory path.
pub fn target_dir_from_exe(exe_path: &Path) -> Option<PathBuf> {
    let mut cur = exe_path;
    loop {
        if cur.file_name().is_some_and(|n| n == "target") {
            return Some(cur.to_path_buf());
        }
        cur = cur.parent()?;
    }
}

pub fn repo_root_from_exe(exe_path: &Path) -> Option<PathBuf> {
    target_dir_from_exe(exe_path)?
        .parent()
        .map(|p| p.to_path_buf())
}

/// Example: `{repo}/local-dev/headlessd`
pub fn dev_home_from_exe(exe_path: &Path) -> Option<PathBuf> {
    repo_root_from_exe(exe_path).map(|root| root.join("local-dev").join("headlessd"))
}

pub fn socket_path(home: &Path) -> PathBuf {
    home.join(SOCKET_FILE_NAME)
}

pub fn preferences_path(home: &Path) -> PathBuf {
    home.join(PREFERENCES_FILE_NAME)
}

pub fn config_path(home: &Path) -> PathBuf {
    home.join(CONFIG_FILE_NAME)
}

/// Agent home used when the preferences file does not exist yet.
pub fn default_agent_home(home: &Path) -> PathBuf {
    home.join("agent")
}

pub fn log_dir(home: &Path) -> PathBuf {
    home.join("log")
}
