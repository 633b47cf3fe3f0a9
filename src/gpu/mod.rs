// gpu/mod.rs — GPU device acquisition.
//
// A `DeviceSession` turns a backend's asynchronous adapter and device
// requests into a blocking, bounded-time `initialize()` call:
//
//   config.rs: backend choice, power preference, timeout defaults
//   device.rs: device profiles, limits/features derivation, error types
//   instance.rs: reference-counted process-wide instance
//   backend.rs: the `GraphicsBackend` seam and its wgpu implementation
//   session.rs: the acquisition state machine
//
// Everything above the backend seam is plain Rust and runs without a GPU;
// only `WgpuBackend` touches the driver.

pub mod backend;
pub mod config;
pub mod device;
pub mod instance;
pub mod session;

pub use backend::{AdapterRequest, BackendEvent, GpuDevice, GraphicsBackend, WgpuBackend};
pub use config::{
    default_timeout, set_default_timeout, BackendPreference, BackendType, PowerPreference,
    SessionConfig,
};
pub use device::{AdapterInfo, ConfigError, DeviceProfile, DeviceRequirements, SessionError};
pub use instance::InstanceRegistry;
pub use session::{DeviceSession, SessionState};
