// Hardware power sensor collaborator interface.
//
// The elevated channel also answers power queries, but the sensor backend
// itself (vendor SDK or monitoring library) lives outside this crate.

/// Point-in-time hardware readings consumed by the monitor handler.
///
/// `None` means the backend has no such sensor; the corresponding command
/// then fails on the wire instead of reporting an invented value.
pub trait PowerSensorReader: Send {
    /// CPU package power draw in watts.
    fn cpu_power(&mut self) -> Option<f64>;

    /// GPU package power draw in watts.
    fn gpu_power(&mut self) -> Option<f64>;

    /// GPU core load as a percentage.
    fn gpu_usage(&mut self) -> Option<f64>;
}

/// Backend used when no sensor library is wired in: every query declines.
pub struct NoSensorBackend;

impl PowerSensorReader for NoSensorBackend {
    fn cpu_power(&mut self) -> Option<f64> {
        None
    }

    fn gpu_power(&mut self) -> Option<f64> {
        None
    }

    fn gpu_usage(&mut self) -> Option<f64> {
        None
    }
}
