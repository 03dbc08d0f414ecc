//! Linux shared memory and process helpers

use crate::error::{IpcError, IpcResult};
use memmap2::{MmapMut, MmapOptions};
use nix::sys::time::TimeSpec;
use nix::time::{ClockId, clock_gettime};
use nix::unistd::getpid;
use std::fs::{OpenOptions, Permissions};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::PathBuf;
use std::time::Duration;

/// tmpfs mount backing POSIX shared memory
pub const SHM_DIR: &str = "/dev/shm";

/// Permission bits for every line object: read/write for all cooperating processes
pub const IPC_MODE: u32 = 0o666;

/// Filesystem path of the shared memory object `name`
pub fn segment_path(name: &str) -> PathBuf {
    PathBuf::from(SHM_DIR).join(name)
}

/// Create a new shared memory object of `size` bytes and map it.
///
/// Fails with `AlreadyExists` if the object is present; callers remove
/// stale objects first.
pub fn create_segment_mmap(name: &str, size: usize) -> IpcResult<MmapMut> {
    let path = segment_path(name);
    let file = OpenOptions::new()
        .create_new(true)
        .read(true)
        .write(true)
        .mode(IPC_MODE)
        .open(&path)
        .map_err(|e| IpcError::from_os(name, "shm create", e))?;

    // umask may have narrowed the creation mode
    file.set_permissions(Permissions::from_mode(IPC_MODE))?;

    // ftruncate zero-fills: every field starts at 0
    file.set_len(size as u64)?;

    // SAFETY: the file is a fresh tmpfs object sized above; it is only ever
    // accessed through atomics once shared.
    let mmap = unsafe { MmapOptions::new().len(size).map_mut(&file)? };
    Ok(mmap)
}

/// Attach to an existing shared memory object
pub fn attach_segment_mmap(name: &str) -> IpcResult<MmapMut> {
    let path = segment_path(name);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&path)
        .map_err(|e| IpcError::from_os(name, "shm open", e))?;

    // SAFETY: see `create_segment_mmap`; size is validated by the caller.
    let mmap = unsafe { MmapOptions::new().map_mut(&file)? };
    Ok(mmap)
}

/// Remove the shared memory object `name`. Returns `false` if it did not exist.
pub fn remove_segment(name: &str) -> IpcResult<bool> {
    match std::fs::remove_file(segment_path(name)) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Absolute `CLOCK_REALTIME` deadline `timeout` from now, as `sem_timedwait` expects
pub fn realtime_deadline(timeout: Duration) -> IpcResult<libc::timespec> {
    let now = clock_gettime(ClockId::CLOCK_REALTIME)?;
    let deadline = now + TimeSpec::from(timeout);
    Ok(*deadline.as_ref())
}

/// Check if process is alive using kill(pid, 0)
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), None) {
        Ok(_) => true,
        Err(nix::Error::ESRCH) => false,
        Err(nix::Error::EPERM) => true,
        Err(_) => false,
    }
}

/// Get current process ID
pub fn current_pid() -> u32 {
    getpid().as_raw() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_is_alive() {
        assert!(is_process_alive(current_pid()));
    }

    #[test]
    fn test_segment_path_lives_in_dev_shm() {
        assert_eq!(segment_path("planta_line"), PathBuf::from("/dev/shm/planta_line"));
    }

    #[test]
    fn test_remove_missing_segment_is_silent() {
        let name = format!("planta_missing_{}", current_pid());
        assert!(!remove_segment(&name).unwrap());
    }

    #[test]
    fn test_create_then_attach_shares_bytes() {
        let name = format!("planta_platform_{}", current_pid());
        let _ = remove_segment(&name);

        let mut writer = create_segment_mmap(&name, 4096).unwrap();
        writer[0] = 0xAB;

        let reader = attach_segment_mmap(&name).unwrap();
        assert_eq!(reader.len(), 4096);
        assert_eq!(reader[0], 0xAB);

        assert!(matches!(
            create_segment_mmap(&name, 4096),
            Err(IpcError::AlreadyExists { .. })
        ));
        assert!(remove_segment(&name).unwrap());
    }
}
