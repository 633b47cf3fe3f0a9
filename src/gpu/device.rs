// gpu/device.rs — Device profiles, adapter info, and the requirements a
// device request is built from.
//
// DEVICE LIMITS:
// Under `DeviceProfile::Native` we ask for wgpu's default limits (or the
// downlevel defaults when the adapter cannot meet them) and raise the
// buffer-size limits to whatever the adapter actually supports, so large
// point clouds fit in a single storage binding.
//
// Under `DeviceProfile::Constrained` we request *lower* limits than the
// hardware supports. wgpu validates every dispatch against the requested
// limits, so code that would fail on a low-power target is caught during
// development on a desktop GPU.
//
// FEATURES:
// Only optional features that the adapter reports are requested; asking for
// an unsupported feature makes the device request fail outright.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Hardware profile controlling the limits requested for the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceProfile {
    /// Use the adapter's real buffer-size limits. No artificial caps.
    #[default]
    Native,
    /// Simulate a low-power GPU (256 invocations per workgroup, 4096²
    /// textures, 128 MiB storage bindings).
    Constrained,
}

impl fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceProfile::Native => write!(f, "Native"),
            DeviceProfile::Constrained => write!(f, "Constrained (simulated limits)"),
        }
    }
}

/// Adapter identity, cached for logging and for `backend_in_use()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    pub name: String,
    pub vendor: u32,
    pub device: u32,
    pub device_type: wgpu::DeviceType,
    pub backend: wgpu::Backend,
}

impl From<wgpu::AdapterInfo> for AdapterInfo {
    fn from(raw: wgpu::AdapterInfo) -> Self {
        AdapterInfo {
            name: raw.name,
            vendor: raw.vendor,
            device: raw.device,
            device_type: raw.device_type,
            backend: raw.backend,
        }
    }
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:?}, {:?})",
            self.name, self.backend, self.device_type
        )
    }
}

/// Limits and features passed along with a device request.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRequirements {
    pub label: String,
    pub limits: wgpu::Limits,
    pub features: wgpu::Features,
}

impl DeviceRequirements {
    /// Derive the request from what the adapter reports it supports.
    pub fn for_adapter(
        label: &str,
        profile: DeviceProfile,
        supported_limits: &wgpu::Limits,
        supported_features: wgpu::Features,
    ) -> Self {
        DeviceRequirements {
            label: label.to_string(),
            limits: required_limits(profile, supported_limits),
            features: required_features(supported_features),
        }
    }
}

// ============================================================
// Limits helpers
// ============================================================

/// Optional features requested whenever the adapter has them.
pub const OPTIONAL_FEATURES: wgpu::Features = wgpu::Features::DEPTH_CLIP_CONTROL
    .union(wgpu::Features::TIMESTAMP_QUERY)
    .union(wgpu::Features::INDIRECT_FIRST_INSTANCE);

/// Features to request: the optional set, restricted to what is supported.
pub fn required_features(supported: wgpu::Features) -> wgpu::Features {
    OPTIONAL_FEATURES & supported
}

/// Build the requested limits for `profile` from the adapter's supported
/// limits. Never exceeds `supported` for the fields it raises.
pub fn required_limits(profile: DeviceProfile, supported: &wgpu::Limits) -> wgpu::Limits {
    let base = if wgpu::Limits::default().check_limits(supported) {
        wgpu::Limits::default()
    } else {
        wgpu::Limits::downlevel_defaults()
    };

    match profile {
        DeviceProfile::Native => wgpu::Limits {
            max_storage_buffer_binding_size: supported.max_storage_buffer_binding_size,
            max_buffer_size: supported.max_buffer_size,
            ..base
        },

        DeviceProfile::Constrained => wgpu::Limits {
            max_compute_invocations_per_workgroup: 256,
            max_compute_workgroup_size_x: 256,
            max_compute_workgroup_size_y: 256,
            max_compute_workgroup_size_z: 64,
            max_texture_dimension_2d: 4096,
            max_storage_buffer_binding_size: (128u32 << 20)
                .min(supported.max_storage_buffer_binding_size),
            ..base
        },
    }
}

// ============================================================
// Error types
// ============================================================

/// Errors from parsing session configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown graphics backend {0:?} (expected vulkan, metal, dx12, gl or webgpu)")]
    UnknownBackend(String),
    #[error("unknown power preference {0:?} (expected undefined, low-power or high-performance)")]
    UnknownPowerPreference(String),
}

/// Why a device acquisition attempt ended without a ready device.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The backend completed the adapter request without an adapter.
    #[error("no suitable graphics adapter was returned by the backend")]
    AdapterUnavailable,
    /// The adapter was acquired but the device request returned nothing.
    #[error("the adapter did not provide a device")]
    DeviceUnavailable,
    /// Neither request completed within the session timeout.
    #[error("request for a GPU device timed out after {0:?}")]
    Timeout(Duration),
}
