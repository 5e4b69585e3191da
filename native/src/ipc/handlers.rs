// Command handlers multiplexed over the elevated worker's pipe channel.

use log::warn;

use crate::affinity::AffinityController;
use crate::monitor::PowerSensorReader;

use super::protocol::{CommandMessage, MessageHandler};

/// Affinity command namespace: owns the controller and maps request lines
/// onto its operations.
pub struct CpuHandler {
    controller: AffinityController,
}

impl CpuHandler {
    pub fn new(controller: AffinityController) -> Self {
        Self { controller }
    }

    /// Empty acknowledgement for fire-and-forget commands; a controller
    /// error downgrades the whole command to the failure token.
    fn ack(result: Result<(), crate::affinity::AffinityError>, command: &str) -> Option<String> {
        match result {
            Ok(()) => Some(String::new()),
            Err(e) => {
                warn!("[CPU] {} rejected: {}", command, e);
                None
            }
        }
    }
}

impl MessageHandler for CpuHandler {
    fn try_handle(&mut self, message: &CommandMessage) -> Option<String> {
        match message.name() {
            "MoveAllAppsToEfficiencyCores" => Self::ack(
                self.controller.move_all_apps_to_efficiency_cores(),
                message.name(),
            ),
            "MoveAllAppsToSomeEfficiencyCores" => Self::ack(
                self.controller.move_all_apps_to_some_efficiency_cores(),
                message.name(),
            ),
            "MoveAppToHybridCores" => {
                let target = message.arg(0)?;
                let efficiency = message.int_arg(1)?;
                let performance = message.int_arg(2)?;
                match self
                    .controller
                    .move_app_to_hybrid_cores(target, efficiency, performance)
                {
                    Ok(moved) => Some(moved.to_string()),
                    Err(e) => {
                        warn!("[CPU] MoveAppToHybridCores rejected: {}", e);
                        None
                    }
                }
            }
            "MoveAllAppsToHybridCores" => {
                let efficiency = message.int_arg(0)?;
                let performance = message.int_arg(1)?;
                Self::ack(
                    self.controller
                        .move_all_apps_to_hybrid_cores(efficiency, performance),
                    message.name(),
                )
            }
            "ResetToDefaultCores" => {
                Self::ack(self.controller.reset_to_default_cores(), message.name())
            }
            "DetectCoreCount" => {
                self.controller.detect_core_count();
                Some(String::new())
            }
            "TotalCoreCount" => Some(self.controller.total_core_count().to_string()),
            "EfficiencyCoreCount" => Some(self.controller.efficiency_core_count().to_string()),
            "PerformanceCoreCount" => Some(self.controller.performance_core_count().to_string()),
            _ => None,
        }
    }
}

/// Hardware power query namespace backed by a sensor collaborator.
pub struct MonitorHandler {
    reader: Box<dyn PowerSensorReader>,
}

impl MonitorHandler {
    pub fn new(reader: Box<dyn PowerSensorReader>) -> Self {
        Self { reader }
    }
}

impl MessageHandler for MonitorHandler {
    fn try_handle(&mut self, message: &CommandMessage) -> Option<String> {
        let reading = match message.name() {
            "GetCpuPower" => self.reader.cpu_power(),
            "GetGpuPower" => self.reader.gpu_power(),
            "GetGpuUsage" => self.reader.gpu_usage(),
            _ => return None,
        };
        // An unavailable sensor fails the command rather than inventing a value.
        reading.map(|value| value.to_string())
    }
}
