//! Serial port discovery.
//!
//! Ports are found by scanning device-file naming patterns of common
//! USB-serial adapters. Within one pattern, candidates come back in the order
//! the `glob` crate enumerates them; that order is platform-defined and the
//! first candidate wins.

use log::debug;
use std::path::{Path, PathBuf};

/// Outcome of a port search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortResult {
    /// Taken from configuration, not scanned.
    Configured(PathBuf),
    /// First match of the pattern scan.
    Found(PathBuf),
    NotFound,
}

impl PortResult {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Configured(p) | Self::Found(p) => Some(p),
            Self::NotFound => None,
        }
    }

    pub fn into_path(self) -> Option<PathBuf> {
        match self {
            Self::Configured(p) | Self::Found(p) => Some(p),
            Self::NotFound => None,
        }
    }
}

/// All paths matching `patterns`, grouped by pattern in list order.
pub fn candidate_ports<S: AsRef<str>>(patterns: &[S]) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    for pattern in patterns {
        match glob::glob(pattern.as_ref()) {
            Ok(paths) => candidates.extend(paths.flatten()),
            Err(e) => debug!("Skipping invalid port pattern {:?}: {}", pattern.as_ref(), e),
        }
    }
    candidates
}

/// Find a serial port by scanning device patterns.
///
/// Returns the first matching port, or `None` if no device is found.
pub fn find_port<S: AsRef<str>>(patterns: &[S]) -> Option<PathBuf> {
    for pattern in patterns {
        if let Ok(paths) = glob::glob(pattern.as_ref()) {
            if let Some(path) = paths.flatten().next() {
                return Some(path);
            }
        }
    }
    None
}

/// Use the configured port if there is one, otherwise scan.
pub fn locate_port<S: AsRef<str>>(configured: Option<&Path>, patterns: &[S]) -> PortResult {
    if let Some(port) = configured {
        return PortResult::Configured(port.to_path_buf());
    }
    let candidates = candidate_ports(patterns);
    if candidates.len() > 1 {
        debug!("Multiple port candidates: {:?}", candidates);
    }
    match candidates.into_iter().next() {
        Some(path) => PortResult::Found(path),
        None => PortResult::NotFound,
    }
}

/// List available serial ports for debugging.
pub fn list_available_ports() -> Vec<String> {
    let mut available_ports = Vec::new();

    // macOS patterns
    if let Ok(paths) = glob::glob("/dev/cu.*") {
        available_ports.extend(paths.flatten().map(|p| p.to_string_lossy().to_string()));
    }

    // Linux USB serial patterns (more specific than /dev/tty* to avoid iterating
    // over hundreds of virtual terminals)
    for pattern in ["/dev/ttyUSB*", "/dev/ttyACM*"] {
        if let Ok(paths) = glob::glob(pattern) {
            available_ports.extend(paths.flatten().map(|p| p.to_string_lossy().to_string()));
        }
    }

    available_ports
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn pattern(dir: &Path, name: &str) -> String {
        dir.join(name).to_string_lossy().into_owned()
    }

    #[test]
    fn test_empty_pattern_list_is_not_found() {
        let patterns: [&str; 0] = [];
        assert_eq!(find_port(&patterns), None);
        assert_eq!(locate_port(None, &patterns), PortResult::NotFound);
        assert_eq!(locate_port(None, &patterns).path(), None);
    }

    #[test]
    fn test_no_matching_device() {
        let dir = tempfile::tempdir().unwrap();
        let patterns = [pattern(dir.path(), "cu.usbserial-*")];
        assert_eq!(find_port(&patterns), None);
    }

    #[test]
    fn test_pattern_order_wins_over_file_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("cu.usbmodem1201"), b"").unwrap();
        fs::write(dir.path().join("cu.SLAB_USBtoUART"), b"").unwrap();

        let patterns = [
            pattern(dir.path(), "cu.usbserial-*"),
            pattern(dir.path(), "cu.usbmodem*"),
            pattern(dir.path(), "cu.SLAB_USBtoUART*"),
        ];
        assert_eq!(
            find_port(&patterns),
            Some(dir.path().join("cu.usbmodem1201"))
        );
    }

    #[test]
    fn test_located_port_is_first_logged_candidate() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ttyACM0"), b"").unwrap();
        fs::write(dir.path().join("ttyUSB0"), b"").unwrap();
        fs::write(dir.path().join("ttyUSB1"), b"").unwrap();

        let patterns = [pattern(dir.path(), "ttyUSB*"), pattern(dir.path(), "ttyACM*")];
        let candidates = candidate_ports(&patterns);
        assert_eq!(candidates.len(), 3);
        assert_eq!(
            locate_port(None, &patterns),
            PortResult::Found(candidates[0].clone())
        );
        assert_eq!(candidates[0], dir.path().join("ttyUSB0"));
    }

    #[test]
    fn test_invalid_pattern_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ttyUSB0"), b"").unwrap();

        let patterns = ["[".to_string(), pattern(dir.path(), "ttyUSB*")];
        assert_eq!(find_port(&patterns), Some(dir.path().join("ttyUSB0")));
        assert_eq!(candidate_ports(&patterns).len(), 1);
    }

    #[test]
    fn test_configured_port_bypasses_scan() {
        let patterns: [&str; 0] = [];
        let port = Path::new("/dev/cu.usbmodem1201");
        let result = locate_port(Some(port), &patterns);
        assert_eq!(result, PortResult::Configured(port.to_path_buf()));
        assert_eq!(result.into_path(), Some(port.to_path_buf()));
    }
}
