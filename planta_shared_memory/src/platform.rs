//! Platform-specific helpers.
//!
//! Only Linux is supported: segments live on the `/dev/shm` tmpfs and
//! semaphores are POSIX named semaphores.

pub mod linux;

pub use linux::*;
