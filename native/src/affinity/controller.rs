// Applies computed affinity masks to one process or to every running process.

use log::{debug, info, warn};
use thiserror::Error;

use super::mask::{generate_mask, AffinityMask, CoreMaskLayout, MASK_WIDTH};
use super::topology::{CoreTopology, TopologyProvider};
use super::AffinityError;

/// Efficiency-core floor below which the all-to-efficiency moves are no-ops.
const MIN_EFFICIENCY_CORES: u32 = 2;

/// Default size of the reduced efficiency-core set used by
/// [`AffinityController::move_all_apps_to_some_efficiency_cores`].
pub const DEFAULT_SOME_EFFICIENCY_CORES: u32 = 2;

/// One process from a live-process snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    /// Executable file name, e.g. `notepad.exe`.
    pub name: String,
}

/// Per-process apply failure. Always caught at the loop granularity and
/// never propagated to the command layer.
#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("process exited")]
    ProcessExited,
    #[error("access denied")]
    AccessDenied,
    #[error("{0}")]
    Os(String),
}

/// Process enumeration and per-process affinity application.
///
/// The OS implementation lives in [`super::process`]; tests substitute a
/// recording fake to assert which masks were (or were not) applied.
pub trait ProcessAffinitySink: Send {
    /// Snapshot of the live process list at call time.
    fn snapshot(&self) -> Result<Vec<ProcessEntry>, AffinityError>;

    /// Restrict one process to the given mask. Atomic per process.
    fn set_affinity(&self, process: &ProcessEntry, mask: AffinityMask) -> Result<(), ApplyError>;
}

/// Owns the topology snapshot and drives mask application through an
/// injected sink. Single-writer: the elevated server thread is the only
/// caller, so no internal locking is needed.
pub struct AffinityController {
    topology: CoreTopology,
    layout: CoreMaskLayout,
    some_efficiency_cores: u32,
    provider: Box<dyn TopologyProvider>,
    sink: Box<dyn ProcessAffinitySink>,
}

impl AffinityController {
    /// Build a controller and run an initial detection pass.
    pub fn new(provider: Box<dyn TopologyProvider>, sink: Box<dyn ProcessAffinitySink>) -> Self {
        let mut controller = Self {
            topology: CoreTopology::uniform(0),
            layout: CoreMaskLayout::from_topology(&CoreTopology::uniform(0)),
            some_efficiency_cores: DEFAULT_SOME_EFFICIENCY_CORES,
            provider,
            sink,
        };
        controller.detect_core_count();
        controller
    }

    /// Override the reduced efficiency-core set size (policy knob, see config).
    pub fn set_some_efficiency_core_count(&mut self, count: u32) {
        self.some_efficiency_cores = count;
    }

    /// Re-detect the topology, replacing the snapshot and mask layout.
    /// Detection failure degrades to a uniform all-performance topology.
    pub fn detect_core_count(&mut self) {
        self.topology = match self.provider.detect() {
            Ok(topology) => topology,
            Err(e) => {
                warn!("[AFFINITY] Topology detection failed, treating all cores as performance: {}", e);
                CoreTopology::uniform(num_cpus::get() as u32)
            }
        };
        self.layout = CoreMaskLayout::from_topology(&self.topology);
        info!(
            "[AFFINITY] Topology: {} logical, {} efficiency, {} performance ({} hyperthread slots)",
            self.topology.total_logical_cores(),
            self.topology.efficiency_cores(),
            self.topology.performance_cores(),
            self.topology.hyperthread_count()
        );
    }

    pub fn total_core_count(&self) -> u32 {
        self.topology.total_logical_cores()
    }

    pub fn efficiency_core_count(&self) -> u32 {
        self.topology.efficiency_cores()
    }

    pub fn performance_core_count(&self) -> u32 {
        self.topology.performance_cores()
    }

    /// Confine every running process to the efficiency cores.
    /// No-op on machines with fewer than two efficiency cores.
    pub fn move_all_apps_to_efficiency_cores(&self) -> Result<(), AffinityError> {
        if self.topology.efficiency_cores() < MIN_EFFICIENCY_CORES {
            debug!("[AFFINITY] Fewer than {} efficiency cores, skipping", MIN_EFFICIENCY_CORES);
            return Ok(());
        }
        let mask = self.layout.efficiency_mask(self.topology.efficiency_cores())?;
        self.apply_to_all(mask)
    }

    /// Looser variant: confine every process to a reduced efficiency-core
    /// set instead of all of them.
    pub fn move_all_apps_to_some_efficiency_cores(&self) -> Result<(), AffinityError> {
        if self.topology.efficiency_cores() < MIN_EFFICIENCY_CORES {
            debug!("[AFFINITY] Fewer than {} efficiency cores, skipping", MIN_EFFICIENCY_CORES);
            return Ok(());
        }
        let count = self
            .some_efficiency_cores
            .min(self.topology.efficiency_cores());
        let mask = self.layout.efficiency_mask(count)?;
        self.apply_to_all(mask)
    }

    /// Move every process whose executable name matches `target` to the
    /// given hybrid allocation. Returns `true` iff at least one matching
    /// process received the mask.
    pub fn move_app_to_hybrid_cores(
        &self,
        target: &str,
        efficiency_cores: u32,
        performance_cores: u32,
    ) -> Result<bool, AffinityError> {
        self.validate_hybrid_request(efficiency_cores, performance_cores)?;
        let mask = self.layout.hybrid_mask(efficiency_cores, performance_cores)?;

        let mut moved = false;
        for process in self.sink.snapshot()? {
            if !process.name.eq_ignore_ascii_case(target) {
                continue;
            }
            match self.sink.set_affinity(&process, mask) {
                Ok(()) => moved = true,
                Err(e) => warn!(
                    "[AFFINITY] Skipping {} (pid {}): {}",
                    process.name, process.pid, e
                ),
            }
        }
        Ok(moved)
    }

    /// Apply a hybrid allocation to the full live process list.
    pub fn move_all_apps_to_hybrid_cores(
        &self,
        efficiency_cores: u32,
        performance_cores: u32,
    ) -> Result<(), AffinityError> {
        self.validate_hybrid_request(efficiency_cores, performance_cores)?;
        let mask = self.layout.hybrid_mask(efficiency_cores, performance_cores)?;
        self.apply_to_all(mask)
    }

    /// Restore the full-core mask everywhere. The single recovery
    /// operation: always legal, never rejected by validation.
    pub fn reset_to_default_cores(&self) -> Result<(), AffinityError> {
        let mask = generate_mask(self.topology.total_logical_cores().min(MASK_WIDTH))?;
        self.apply_to_all(mask)
    }

    /// Reject a hybrid request before any OS mutation happens.
    fn validate_hybrid_request(
        &self,
        efficiency_cores: u32,
        performance_cores: u32,
    ) -> Result<(), AffinityError> {
        if efficiency_cores == 0 && performance_cores == 0 {
            return Err(AffinityError::InvalidRequest(
                "at least one core must be requested".into(),
            ));
        }
        if efficiency_cores > self.topology.efficiency_cores() {
            return Err(AffinityError::InvalidRequest(format!(
                "{} efficiency cores requested, {} available",
                efficiency_cores,
                self.topology.efficiency_cores()
            )));
        }
        if performance_cores % 2 != 0 {
            return Err(AffinityError::InvalidRequest(
                "performance cores are allocated in hyperthread pairs".into(),
            ));
        }
        if performance_cores > self.topology.performance_cores() {
            return Err(AffinityError::InvalidRequest(format!(
                "{} performance cores requested, {} available",
                performance_cores,
                self.topology.performance_cores()
            )));
        }
        Ok(())
    }

    /// Best-effort application across a snapshot of the live process list.
    /// Individual failures (exited process, protected process) are logged
    /// and skipped; they never abort the remaining set.
    fn apply_to_all(&self, mask: AffinityMask) -> Result<(), AffinityError> {
        let processes = self.sink.snapshot()?;
        debug!(
            "[AFFINITY] Applying mask {:#x} to {} processes",
            mask.bits(),
            processes.len()
        );
        for process in &processes {
            if let Err(e) = self.sink.set_affinity(process, mask) {
                warn!(
                    "[AFFINITY] Skipping {} (pid {}): {}",
                    process.name, process.pid, e
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct FixedProvider(CoreTopology);

    impl TopologyProvider for FixedProvider {
        fn detect(&self) -> Result<CoreTopology, AffinityError> {
            Ok(self.0)
        }
    }

    struct FailingProvider;

    impl TopologyProvider for FailingProvider {
        fn detect(&self) -> Result<CoreTopology, AffinityError> {
            Err(AffinityError::TopologyUnavailable("no core typing".into()))
        }
    }

    #[derive(Default)]
    struct FakeSink {
        processes: Vec<ProcessEntry>,
        deny_pids: Vec<u32>,
        applied: Arc<Mutex<Vec<(u32, u64)>>>,
    }

    impl ProcessAffinitySink for FakeSink {
        fn snapshot(&self) -> Result<Vec<ProcessEntry>, AffinityError> {
            Ok(self.processes.clone())
        }

        fn set_affinity(
            &self,
            process: &ProcessEntry,
            mask: AffinityMask,
        ) -> Result<(), ApplyError> {
            if self.deny_pids.contains(&process.pid) {
                return Err(ApplyError::AccessDenied);
            }
            self.applied.lock().unwrap().push((process.pid, mask.bits()));
            Ok(())
        }
    }

    fn entry(pid: u32, name: &str) -> ProcessEntry {
        ProcessEntry {
            pid,
            name: name.to_string(),
        }
    }

    /// 16 logical cores, 4 efficiency, 6 performance => 12 hyperthreads.
    fn test_topology() -> CoreTopology {
        CoreTopology::new(16, 4, 6)
    }

    fn controller_with(
        processes: Vec<ProcessEntry>,
        deny_pids: Vec<u32>,
    ) -> (AffinityController, Arc<Mutex<Vec<(u32, u64)>>>) {
        let applied = Arc::new(Mutex::new(Vec::new()));
        let sink = FakeSink {
            processes,
            deny_pids,
            applied: Arc::clone(&applied),
        };
        let controller = AffinityController::new(
            Box::new(FixedProvider(test_topology())),
            Box::new(sink),
        );
        (controller, applied)
    }

    #[test]
    fn test_accessors_reflect_detected_topology() {
        let (controller, _) = controller_with(vec![], vec![]);
        assert_eq!(controller.total_core_count(), 16);
        assert_eq!(controller.efficiency_core_count(), 4);
        assert_eq!(controller.performance_core_count(), 6);
    }

    #[test]
    fn test_detection_failure_degrades_to_uniform() {
        let controller = AffinityController::new(
            Box::new(FailingProvider),
            Box::new(FakeSink::default()),
        );
        assert_eq!(controller.total_core_count(), num_cpus::get() as u32);
        assert_eq!(controller.efficiency_core_count(), 0);
    }

    #[test]
    fn test_invalid_request_touches_no_process() {
        let (controller, applied) =
            controller_with(vec![entry(1, "a.exe"), entry(2, "b.exe")], vec![]);

        // More efficiency cores than the topology has.
        assert!(matches!(
            controller.move_all_apps_to_hybrid_cores(5, 2),
            Err(AffinityError::InvalidRequest(_))
        ));
        // Odd performance core count.
        assert!(matches!(
            controller.move_all_apps_to_hybrid_cores(2, 3),
            Err(AffinityError::InvalidRequest(_))
        ));
        // Nothing requested at all.
        assert!(matches!(
            controller.move_all_apps_to_hybrid_cores(0, 0),
            Err(AffinityError::InvalidRequest(_))
        ));
        assert!(applied.lock().unwrap().is_empty());
    }

    #[test]
    fn test_move_all_applies_to_every_process() {
        let (controller, applied) =
            controller_with(vec![entry(1, "a.exe"), entry(2, "b.exe")], vec![]);

        controller.move_all_apps_to_hybrid_cores(2, 4).unwrap();

        let calls = applied.lock().unwrap();
        let expected = (0b11u64 << 12) | 0b1111;
        assert_eq!(calls.as_slice(), &[(1, expected), (2, expected)]);
    }

    #[test]
    fn test_move_all_with_empty_process_list_succeeds() {
        let (controller, applied) = controller_with(vec![], vec![]);
        controller.move_all_apps_to_hybrid_cores(2, 4).unwrap();
        assert!(applied.lock().unwrap().is_empty());
    }

    #[test]
    fn test_per_process_failure_is_swallowed() {
        let (controller, applied) = controller_with(
            vec![entry(1, "a.exe"), entry(2, "denied.exe"), entry(3, "c.exe")],
            vec![2],
        );

        // The denied process must not abort application to the rest.
        controller.move_all_apps_to_hybrid_cores(2, 0).unwrap();

        let calls = applied.lock().unwrap();
        let pids: Vec<u32> = calls.iter().map(|(pid, _)| *pid).collect();
        assert_eq!(pids, vec![1, 3]);
    }

    #[test]
    fn test_move_app_matches_by_name() {
        let (controller, applied) = controller_with(
            vec![
                entry(1, "game.exe"),
                entry(2, "other.exe"),
                entry(3, "Game.exe"),
            ],
            vec![],
        );

        let moved = controller.move_app_to_hybrid_cores("game.exe", 2, 2).unwrap();
        assert!(moved);

        let calls = applied.lock().unwrap();
        let pids: Vec<u32> = calls.iter().map(|(pid, _)| *pid).collect();
        assert_eq!(pids, vec![1, 3]);
    }

    #[test]
    fn test_move_app_returns_false_when_absent() {
        let (controller, applied) = controller_with(vec![entry(1, "a.exe")], vec![]);
        let moved = controller
            .move_app_to_hybrid_cores("missing.exe", 2, 2)
            .unwrap();
        assert!(!moved);
        assert!(applied.lock().unwrap().is_empty());
    }

    #[test]
    fn test_move_app_rejects_invalid_request_before_snapshot() {
        let (controller, applied) = controller_with(vec![entry(1, "a.exe")], vec![]);
        assert!(controller.move_app_to_hybrid_cores("a.exe", 0, 7).is_err());
        assert!(applied.lock().unwrap().is_empty());
    }

    #[test]
    fn test_reset_applies_full_mask() {
        let (controller, applied) = controller_with(vec![entry(1, "a.exe")], vec![]);
        controller.reset_to_default_cores().unwrap();

        let calls = applied.lock().unwrap();
        assert_eq!(calls.as_slice(), &[(1, 0xFFFF)]);
    }

    #[test]
    fn test_efficiency_moves_are_noops_below_core_floor() {
        let applied = Arc::new(Mutex::new(Vec::new()));
        let sink = FakeSink {
            processes: vec![entry(1, "a.exe")],
            deny_pids: vec![],
            applied: Arc::clone(&applied),
        };
        // One efficiency core only.
        let controller = AffinityController::new(
            Box::new(FixedProvider(CoreTopology::new(8, 1, 4))),
            Box::new(sink),
        );

        controller.move_all_apps_to_efficiency_cores().unwrap();
        controller.move_all_apps_to_some_efficiency_cores().unwrap();
        assert!(applied.lock().unwrap().is_empty());
    }

    #[test]
    fn test_efficiency_move_confines_to_all_efficiency_cores() {
        let (controller, applied) = controller_with(vec![entry(1, "a.exe")], vec![]);
        controller.move_all_apps_to_efficiency_cores().unwrap();

        let calls = applied.lock().unwrap();
        assert_eq!(calls.as_slice(), &[(1, 0b1111 << 12)]);
    }

    #[test]
    fn test_some_efficiency_move_uses_reduced_set() {
        let (controller, applied) = controller_with(vec![entry(1, "a.exe")], vec![]);
        controller.move_all_apps_to_some_efficiency_cores().unwrap();

        let calls = applied.lock().unwrap();
        assert_eq!(calls.as_slice(), &[(1, 0b11 << 12)]);
    }
}
