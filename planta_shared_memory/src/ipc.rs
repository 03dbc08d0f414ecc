//! Line IPC bundle: the state segment plus every named semaphore.
//!
//! | Object                 | Name                      | Initial |
//! |------------------------|---------------------------|---------|
//! | line state segment     | `<ns>_line` (`/dev/shm`)  | formatted |
//! | `stage[i]`             | `/<ns>_stage_<i>`         | 0       |
//! | `ack[i]`               | `/<ns>_ack_<i>`           | 0       |
//! | `transition`           | `/<ns>_transition`        | 1       |
//!
//! Only the supervisor calls [`LineIpc::create`] and [`LineIpc::destroy`];
//! workers and the observer use [`LineIpc::open`].

use crate::error::{IpcError, IpcResult};
use crate::segment::LineSegment;
use crate::semaphore::NamedSemaphore;
use crate::state::LineState;
use planta_common::consts::NUM_STATIONS;
use std::time::Duration;

/// Longest accepted namespace; keeps every derived name under the POSIX limit.
pub const MAX_NAMESPACE_LEN: usize = 200;

/// Names of every shared object of one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpcNames {
    namespace: String,
}

impl IpcNames {
    /// Derive names from `namespace` (`[A-Za-z0-9_-]`, non-empty).
    pub fn new(namespace: &str) -> IpcResult<Self> {
        let valid = !namespace.is_empty()
            && namespace.len() <= MAX_NAMESPACE_LEN
            && namespace
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(IpcError::InvalidName {
                name: namespace.to_string(),
            });
        }
        Ok(Self {
            namespace: namespace.to_string(),
        })
    }

    /// The namespace prefix.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Shared memory object name.
    pub fn segment(&self) -> String {
        format!("{}_line", self.namespace)
    }

    /// `stage[station]` semaphore name.
    pub fn stage(&self, station: usize) -> String {
        format!("/{}_stage_{station}", self.namespace)
    }

    /// `ack[station]` semaphore name.
    pub fn ack(&self, station: usize) -> String {
        format!("/{}_ack_{station}", self.namespace)
    }

    /// Transition mutex name.
    pub fn transition(&self) -> String {
        format!("/{}_transition", self.namespace)
    }
}

/// RAII hold on the transition mutex. Released (posted) on drop.
///
/// Mutators of `product_in_station`, `slot_state`, `next_product_id` and
/// `completed_count` require a reference to one.
pub struct TransitionGuard<'a> {
    sem: &'a NamedSemaphore,
}

impl<'a> TransitionGuard<'a> {
    /// Block on `sem` and hold it until the guard is dropped.
    pub fn acquire(sem: &'a NamedSemaphore) -> IpcResult<Self> {
        sem.wait()?;
        Ok(Self { sem })
    }

    /// Like [`acquire`](Self::acquire), giving up after `timeout`.
    pub fn acquire_timeout(sem: &'a NamedSemaphore, timeout: Duration) -> IpcResult<Self> {
        if sem.wait_timeout(timeout)? {
            Ok(Self { sem })
        } else {
            Err(IpcError::Timeout {
                name: sem.name().to_string(),
            })
        }
    }
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.sem.post() {
            tracing::error!("Failed to release transition mutex: {}", e);
        }
    }
}

/// Mapped line state plus open handles on every semaphore.
pub struct LineIpc {
    names: IpcNames,
    segment: LineSegment,
    stage: Vec<NamedSemaphore>,
    ack: Vec<NamedSemaphore>,
    transition: NamedSemaphore,
}

impl LineIpc {
    /// Create every object fresh.
    ///
    /// On failure, whatever was created is removed again, so a retry after
    /// an error starts from a clean system.
    pub fn create(names: &IpcNames) -> IpcResult<Self> {
        match Self::create_objects(names) {
            Ok(ipc) => {
                tracing::debug!("Created line IPC '{}'", names.namespace());
                Ok(ipc)
            }
            Err(e) => {
                Self::destroy(names);
                Err(e)
            }
        }
    }

    fn create_objects(names: &IpcNames) -> IpcResult<Self> {
        let segment = LineSegment::create(&names.segment())?;
        let transition = NamedSemaphore::create(&names.transition(), 1)?;
        let stage = (0..NUM_STATIONS)
            .map(|i| NamedSemaphore::create(&names.stage(i), 0))
            .collect::<IpcResult<Vec<_>>>()?;
        let ack = (0..NUM_STATIONS)
            .map(|i| NamedSemaphore::create(&names.ack(i), 0))
            .collect::<IpcResult<Vec<_>>>()?;

        Ok(Self {
            names: names.clone(),
            segment,
            stage,
            ack,
            transition,
        })
    }

    /// Open objects created by the supervisor.
    pub fn open(names: &IpcNames) -> IpcResult<Self> {
        let segment = LineSegment::attach(&names.segment())?;
        let transition = NamedSemaphore::open(&names.transition())?;
        let stage = (0..NUM_STATIONS)
            .map(|i| NamedSemaphore::open(&names.stage(i)))
            .collect::<IpcResult<Vec<_>>>()?;
        let ack = (0..NUM_STATIONS)
            .map(|i| NamedSemaphore::open(&names.ack(i)))
            .collect::<IpcResult<Vec<_>>>()?;

        Ok(Self {
            names: names.clone(),
            segment,
            stage,
            ack,
            transition,
        })
    }

    /// Remove every object of the line.
    ///
    /// Idempotent: names that do not exist are skipped, and failures are
    /// logged rather than returned.
    pub fn destroy(names: &IpcNames) {
        let mut removed = 0usize;
        let mut note = |name: &str, result: IpcResult<bool>| match result {
            Ok(true) => removed += 1,
            Ok(false) => {}
            Err(e) => tracing::warn!("Failed to remove {}: {}", name, e),
        };

        let segment = names.segment();
        note(&segment, LineSegment::remove(&segment));
        let transition = names.transition();
        note(&transition, NamedSemaphore::unlink(&transition));
        for i in 0..NUM_STATIONS {
            let stage = names.stage(i);
            note(&stage, NamedSemaphore::unlink(&stage));
            let ack = names.ack(i);
            note(&ack, NamedSemaphore::unlink(&ack));
        }

        tracing::debug!(
            "Destroyed line IPC '{}' ({} objects removed)",
            names.namespace(),
            removed
        );
    }

    /// Object names.
    pub fn names(&self) -> &IpcNames {
        &self.names
    }

    /// Shared state.
    pub fn state(&self) -> &LineState {
        self.segment.state()
    }

    /// `stage[station]`.
    pub fn stage(&self, station: usize) -> IpcResult<&NamedSemaphore> {
        self.stage
            .get(station)
            .ok_or(IpcError::StationOutOfRange { index: station })
    }

    /// `ack[station]`.
    pub fn ack(&self, station: usize) -> IpcResult<&NamedSemaphore> {
        self.ack
            .get(station)
            .ok_or(IpcError::StationOutOfRange { index: station })
    }

    /// Take the transition mutex.
    pub fn lock(&self) -> IpcResult<TransitionGuard<'_>> {
        TransitionGuard::acquire(&self.transition)
    }

    /// Take the transition mutex, giving up after `timeout`.
    pub fn lock_timeout(&self, timeout: Duration) -> IpcResult<TransitionGuard<'_>> {
        TransitionGuard::acquire_timeout(&self.transition, timeout)
    }

    /// Cooperative stop: clear `running`, then post every `stage[i]` and
    /// `ack[i]` once so no worker stays blocked at either wait point.
    pub fn request_stop(&self) -> IpcResult<()> {
        self.state().set_running(false);
        for (stage, ack) in self.stage.iter().zip(&self.ack) {
            stage.post()?;
            ack.post()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for LineIpc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineIpc")
            .field("namespace", &self.names.namespace)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_derived_from_namespace() {
        let names = IpcNames::new("line_a").unwrap();
        assert_eq!(names.segment(), "line_a_line");
        assert_eq!(names.stage(3), "/line_a_stage_3");
        assert_eq!(names.ack(0), "/line_a_ack_0");
        assert_eq!(names.transition(), "/line_a_transition");
    }

    #[test]
    fn test_invalid_namespaces_rejected() {
        assert!(IpcNames::new("").is_err());
        assert!(IpcNames::new("a/b").is_err());
        assert!(IpcNames::new("with space").is_err());
        assert!(IpcNames::new(&"x".repeat(MAX_NAMESPACE_LEN + 1)).is_err());
    }
}
