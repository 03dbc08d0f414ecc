//! POSIX named semaphores
//!
//! Thin owner of a `sem_t*` returned by `sem_open`. Named semaphores have
//! process-wide identity: every process opening the same name shares one
//! counter. The handle is closed on drop; the name itself survives until
//! [`NamedSemaphore::unlink`].

use crate::error::{IpcError, IpcResult};
use crate::platform::{IPC_MODE, realtime_deadline};
use std::ffi::CString;
use std::io;
use std::ptr::NonNull;
use std::time::Duration;

/// Handle to an open named semaphore
pub struct NamedSemaphore {
    name: String,
    sem: NonNull<libc::sem_t>,
}

// SAFETY: sem_post/sem_wait/sem_getvalue are thread-safe on a shared sem_t;
// the pointer is owned by this handle and only released in Drop.
unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

impl NamedSemaphore {
    /// Create `name` with count `initial`, replacing any stale semaphore of
    /// the same name.
    pub fn create(name: &str, initial: u32) -> IpcResult<Self> {
        let c_name = c_name(name)?;
        Self::unlink(name)?;

        // SAFETY: c_name is a valid NUL-terminated string; the variadic
        // arguments are mode_t and unsigned int as sem_open(3) requires.
        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL,
                IPC_MODE as libc::c_uint,
                initial as libc::c_uint,
            )
        };
        Self::from_raw(name, sem, "create")
    }

    /// Open an existing semaphore
    pub fn open(name: &str) -> IpcResult<Self> {
        let c_name = c_name(name)?;
        // SAFETY: c_name is a valid NUL-terminated string; no O_CREAT, so no
        // variadic arguments are read.
        let sem = unsafe { libc::sem_open(c_name.as_ptr(), 0) };
        Self::from_raw(name, sem, "open")
    }

    fn from_raw(name: &str, sem: *mut libc::sem_t, op: &'static str) -> IpcResult<Self> {
        if sem == libc::SEM_FAILED {
            return Err(IpcError::from_os(name, op, io::Error::last_os_error()));
        }
        let sem = NonNull::new(sem).ok_or_else(|| IpcError::NotFound {
            name: name.to_string(),
        })?;
        Ok(Self {
            name: name.to_string(),
            sem,
        })
    }

    /// Remove `name` from the system. Returns `false` if it did not exist.
    ///
    /// Open handles keep working until dropped.
    pub fn unlink(name: &str) -> IpcResult<bool> {
        let c_name = c_name(name)?;
        // SAFETY: valid NUL-terminated string.
        if unsafe { libc::sem_unlink(c_name.as_ptr()) } == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::NotFound {
            Ok(false)
        } else {
            Err(IpcError::from_os(name, "unlink", err))
        }
    }

    /// Semaphore name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Increment the count, waking one waiter
    pub fn post(&self) -> IpcResult<()> {
        // SAFETY: self.sem is a live handle from sem_open.
        if unsafe { libc::sem_post(self.sem.as_ptr()) } == 0 {
            Ok(())
        } else {
            Err(self.os_error("post"))
        }
    }

    /// Block until the count is positive, then decrement it
    pub fn wait(&self) -> IpcResult<()> {
        loop {
            // SAFETY: self.sem is a live handle from sem_open.
            if unsafe { libc::sem_wait(self.sem.as_ptr()) } == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(IpcError::from_os(&self.name, "wait", err));
            }
        }
    }

    /// Decrement the count if it is positive. Returns `false` instead of
    /// blocking.
    pub fn try_wait(&self) -> IpcResult<bool> {
        loop {
            // SAFETY: self.sem is a live handle from sem_open.
            if unsafe { libc::sem_trywait(self.sem.as_ptr()) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EAGAIN) => return Ok(false),
                Some(libc::EINTR) => continue,
                _ => return Err(IpcError::from_os(&self.name, "trywait", err)),
            }
        }
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`. Returns
    /// `false` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> IpcResult<bool> {
        let deadline = realtime_deadline(timeout)?;
        loop {
            // SAFETY: self.sem is a live handle; deadline outlives the call.
            if unsafe { libc::sem_timedwait(self.sem.as_ptr(), &deadline) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::ETIMEDOUT) => return Ok(false),
                Some(libc::EINTR) => continue,
                _ => return Err(IpcError::from_os(&self.name, "timedwait", err)),
            }
        }
    }

    /// Current count (diagnostics and tests only; racy by nature)
    pub fn value(&self) -> IpcResult<i32> {
        let mut value: libc::c_int = 0;
        // SAFETY: self.sem is a live handle; value is a valid out pointer.
        if unsafe { libc::sem_getvalue(self.sem.as_ptr(), &mut value) } == 0 {
            Ok(value)
        } else {
            Err(self.os_error("getvalue"))
        }
    }

    fn os_error(&self, op: &'static str) -> IpcError {
        IpcError::from_os(&self.name, op, io::Error::last_os_error())
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        // SAFETY: the handle came from sem_open and is closed exactly once.
        if unsafe { libc::sem_close(self.sem.as_ptr()) } != 0 {
            tracing::debug!(
                "sem_close({}) failed: {}",
                self.name,
                io::Error::last_os_error()
            );
        }
    }
}

impl std::fmt::Debug for NamedSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedSemaphore")
            .field("name", &self.name)
            .finish()
    }
}

/// POSIX semaphore names are `/` followed by up to 250 characters, no other `/`
fn c_name(name: &str) -> IpcResult<CString> {
    let valid = name.len() > 1
        && name.len() <= 251
        && name.starts_with('/')
        && !name[1..].contains('/');
    if !valid {
        return Err(IpcError::InvalidName {
            name: name.to_string(),
        });
    }
    CString::new(name).map_err(|_| IpcError::InvalidName {
        name: name.to_string(),
    })
}
