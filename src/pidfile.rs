//! Worker process liveness marker.
//!
//! The worker process writes its pid to a file on start and removes it on
//! graceful exit; `status` and `worker stop` read it back. The liveness
//! probe mirrors the classic `kill(pid, 0)` check.

use std::io;
use std::path::Path;

/// Write the current process id to `path`.
pub fn write(path: &Path) -> io::Result<()> {
    std::fs::write(path, std::process::id().to_string())
}

/// Read a pid from `path`. `None` when the file is missing or malformed.
pub fn read(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Remove the pid file. Missing files are not an error.
pub fn remove(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Check whether a process with this pid is alive.
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    false
}

/// Send SIGINT to a process, asking a running worker set to drain and exit.
#[cfg(unix)]
pub fn interrupt(pid: u32) -> io::Result<bool> {
    let status = std::process::Command::new("kill")
        .args(["-INT", &pid.to_string()])
        .status()?;
    Ok(status.success())
}

#[cfg(not(unix))]
pub fn interrupt(_pid: u32) -> io::Result<bool> {
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_remove_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("queuectl.pid");

        write(&path).unwrap();
        assert_eq!(read(&path), Some(std::process::id()));

        remove(&path).unwrap();
        assert_eq!(read(&path), None);
        // Removing again is fine.
        remove(&path).unwrap();
    }

    #[test]
    fn read_malformed_pidfile() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("queuectl.pid");
        std::fs::write(&path, "not-a-pid").unwrap();
        assert_eq!(read(&path), None);
    }

    #[cfg(unix)]
    #[test]
    fn own_process_is_alive() {
        assert!(process_alive(std::process::id()));
    }
}
