//! Crash and error dump files
//!
//! For runtime errors and low-level faults the kernel appends a plain
//! text record to a per-process dump file named `<proc>_<pid>.dump`. The
//! file lives in the directory named by the `MULTIOS_ERRDUMPDIR`
//! environment variable, or next to the process when that directory
//! cannot be opened. A process-wide mutex serializes writers so records
//! from concurrently faulting threads never interleave.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use parking_lot::{Mutex, RwLock};

use crate::time::TimeStamp;
use crate::{KernelError, Result};

/// Environment variable naming the dump directory.
pub const DUMP_DIR_ENV: &str = "MULTIOS_ERRDUMPDIR";

const DUMP_EXT: &str = ".dump";
const ENTRY_RULE: &str = "----------------------------------------------------------------";

static DUMP_LOCK: Mutex<()> = Mutex::new(());
static TARGET_DIR: RwLock<Option<PathBuf>> = RwLock::new(None);

fn process_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.file_stem().map(|stem| stem.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn dump_file_name() -> String {
    format!("{}_{}{}", process_name(), std::process::id(), DUMP_EXT)
}

fn open_dump_file() -> Option<File> {
    let file_name = dump_file_name();

    if let Some(dir) = TARGET_DIR.read().clone() {
        match OpenOptions::new().create(true).append(true).open(dir.join(&file_name)) {
            Ok(file) => return Some(file),
            Err(err) => {
                log::warn!(
                    "dump directory {} not usable ({err}), falling back to the process directory",
                    dir.display()
                );
            }
        }
    }

    OpenOptions::new().create(true).append(true).open(&file_name).ok()
}

fn current_thread_name() -> String {
    std::thread::current()
        .name()
        .unwrap_or("<unnamed>")
        .to_string()
}

/// Override the dump directory, replacing whatever `MULTIOS_ERRDUMPDIR`
/// provided. `None` reverts to the process directory.
pub fn set_dump_directory(dir: Option<PathBuf>) {
    *TARGET_DIR.write() = dir;
}

/// The directory dump files currently go to, if one is configured.
pub fn dump_directory() -> Option<PathBuf> {
    TARGET_DIR.read().clone()
}

/// Append a runtime error record to the process dump file.
///
/// Nothing here can fail outward: if the dump file cannot be opened the
/// record is lost and a warning is logged, because the error path must
/// never raise a second error.
pub fn dump_runtime_error(
    facility: &str,
    error_id: u32,
    err: &KernelError,
    aux_text: &str,
    file: &str,
    line: u32,
) {
    let _guard = DUMP_LOCK.lock();
    let Some(mut dump) = open_dump_file() else {
        log::warn!("unable to open dump file for runtime error in {facility}");
        return;
    };

    let _ = writeln!(dump, "{ENTRY_RULE}");
    let _ = writeln!(
        dump,
        "Runtime error at {} ms",
        TimeStamp::now().as_millis()
    );
    let _ = writeln!(dump, "   Process: {}", process_name());
    let _ = writeln!(dump, "    Thread: {}", current_thread_name());
    let _ = writeln!(dump, "  Facility: {facility}");
    let _ = writeln!(dump, "  Error id: {error_id}");
    let _ = writeln!(dump, "Kernel err: {}", err.kind());
    let _ = writeln!(dump, "  Host err: {}", err.host_code());
    if !aux_text.is_empty() {
        let _ = writeln!(dump, "  Aux text: {aux_text}");
    }
    let _ = writeln!(dump, "  Location: {file}.{line}");
}

/// Append a plain message record to the process dump file. Used for
/// low-level faults that have no kernel error attached.
pub fn dump_message(title: &str, text: &str, file: &str, line: u32) {
    let _guard = DUMP_LOCK.lock();
    let Some(mut dump) = open_dump_file() else {
        log::warn!("unable to open dump file for message '{title}'");
        return;
    };

    let _ = writeln!(dump, "{ENTRY_RULE}");
    let _ = writeln!(dump, "{title} at {} ms", TimeStamp::now().as_millis());
    let _ = writeln!(dump, "   Process: {}", process_name());
    let _ = writeln!(dump, "    Thread: {}", current_thread_name());
    if !text.is_empty() {
        let _ = writeln!(dump, "      Text: {text}");
    }
    let _ = writeln!(dump, "  Location: {file}.{line}");
}

pub(crate) fn initialize() -> Result<()> {
    if let Ok(dir) = std::env::var(DUMP_DIR_ENV) {
        if !dir.is_empty() {
            *TARGET_DIR.write() = Some(PathBuf::from(dir));
        }
    }
    Ok(())
}

pub(crate) fn shutdown() -> Result<()> {
    *TARGET_DIR.write() = None;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    // Both tests steer the process-wide dump directory
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_dump_records_append() {
        let _serial = TEST_LOCK.lock();
        let dir = tempfile::tempdir().unwrap();
        set_dump_directory(Some(dir.path().to_path_buf()));

        let err = KernelError::with_host(ErrorKind::ConnectionReset, 104);
        dump_runtime_error("NetQ", 4_201, &err, "client dropped", "listener.rs", 88);
        dump_message("Init warning", "locale fell back to C", "locale.rs", 12);

        let contents = std::fs::read_to_string(dir.path().join(dump_file_name())).unwrap();
        set_dump_directory(None);

        assert!(contents.contains("Runtime error"));
        assert!(contents.contains("Facility: NetQ"));
        assert!(contents.contains("Error id: 4201"));
        assert!(contents.contains("connection reset by peer"));
        assert!(contents.contains("Host err: 104"));
        assert!(contents.contains("client dropped"));
        assert!(contents.contains("listener.rs.88"));

        assert!(contents.contains("Init warning"));
        assert!(contents.contains("locale fell back to C"));

        // Two separate records, each with its own rule line
        assert_eq!(contents.matches(ENTRY_RULE).count(), 2);
    }

    #[test]
    fn test_unwritable_directory_falls_back() {
        let _serial = TEST_LOCK.lock();
        set_dump_directory(Some(PathBuf::from("/nonexistent-dump-dir")));
        let err = KernelError::new(ErrorKind::GenFailure);
        // Must not panic; the record lands next to the process instead
        dump_runtime_error("Core", 1, &err, "", "x.rs", 1);
        set_dump_directory(None);

        let local = PathBuf::from(dump_file_name());
        if local.exists() {
            let _ = std::fs::remove_file(local);
        }
    }
}
