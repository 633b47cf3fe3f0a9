// gpu/config.rs — Session configuration: backend choice, power preference,
// acquisition timeout.
//
// BACKEND CHOICE:
// `BackendPreference::PlatformDefault` resolves at request time to the
// native API of the host OS (Metal on Apple, D3D12 on Windows, Vulkan
// elsewhere). An explicit choice bypasses that.
//
// TIMEOUT:
// Every new session copies the process-wide default timeout. Changing the
// default affects sessions created afterwards, not existing ones.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::device::{ConfigError, DeviceProfile};

/// Initial process-wide acquisition timeout.
pub const INITIAL_DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

static DEFAULT_TIMEOUT_MS: AtomicU64 = AtomicU64::new(INITIAL_DEFAULT_TIMEOUT.as_millis() as u64);

/// Set the timeout copied into sessions created from now on.
pub fn set_default_timeout(timeout: Duration) {
    DEFAULT_TIMEOUT_MS.store(timeout.as_millis() as u64, Ordering::Relaxed);
}

/// The timeout new sessions start with.
pub fn default_timeout() -> Duration {
    Duration::from_millis(DEFAULT_TIMEOUT_MS.load(Ordering::Relaxed))
}

/// A native graphics API the adapter can be driven through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendType {
    Vulkan,
    Metal,
    Dx12,
    Gl,
    BrowserWebGpu,
}

impl BackendType {
    /// The native API of the OS this crate was compiled for.
    pub fn platform_default() -> Self {
        if cfg!(any(target_os = "macos", target_os = "ios")) {
            BackendType::Metal
        } else if cfg!(target_os = "windows") {
            BackendType::Dx12
        } else if cfg!(target_arch = "wasm32") {
            BackendType::BrowserWebGpu
        } else {
            BackendType::Vulkan
        }
    }

    /// wgpu backend mask selecting only this API.
    pub fn to_wgpu(self) -> wgpu::Backends {
        match self {
            BackendType::Vulkan => wgpu::Backends::VULKAN,
            BackendType::Metal => wgpu::Backends::METAL,
            BackendType::Dx12 => wgpu::Backends::DX12,
            BackendType::Gl => wgpu::Backends::GL,
            BackendType::BrowserWebGpu => wgpu::Backends::BROWSER_WEBGPU,
        }
    }

    /// Map the backend an adapter reports. `Empty` (the no-op backend) has
    /// no counterpart.
    pub fn from_wgpu(backend: wgpu::Backend) -> Option<Self> {
        match backend {
            wgpu::Backend::Vulkan => Some(BackendType::Vulkan),
            wgpu::Backend::Metal => Some(BackendType::Metal),
            wgpu::Backend::Dx12 => Some(BackendType::Dx12),
            wgpu::Backend::Gl => Some(BackendType::Gl),
            wgpu::Backend::BrowserWebGpu => Some(BackendType::BrowserWebGpu),
            wgpu::Backend::Empty => None,
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendType::Vulkan => "Vulkan",
            BackendType::Metal => "Metal",
            BackendType::Dx12 => "D3D12",
            BackendType::Gl => "OpenGL",
            BackendType::BrowserWebGpu => "WebGPU",
        };
        f.write_str(name)
    }
}

impl FromStr for BackendType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vulkan" | "vk" => Ok(BackendType::Vulkan),
            "metal" | "mtl" => Ok(BackendType::Metal),
            "dx12" | "d3d12" => Ok(BackendType::Dx12),
            "gl" | "opengl" | "gles" => Ok(BackendType::Gl),
            "webgpu" | "browser" => Ok(BackendType::BrowserWebGpu),
            _ => Err(ConfigError::UnknownBackend(s.to_string())),
        }
    }
}

/// Which backend a session asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendPreference {
    #[default]
    PlatformDefault,
    Explicit(BackendType),
}

impl BackendPreference {
    pub fn resolve(self) -> BackendType {
        match self {
            BackendPreference::PlatformDefault => BackendType::platform_default(),
            BackendPreference::Explicit(backend) => backend,
        }
    }
}

impl From<BackendType> for BackendPreference {
    fn from(backend: BackendType) -> Self {
        BackendPreference::Explicit(backend)
    }
}

impl fmt::Display for BackendPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendPreference::PlatformDefault => {
                write!(f, "platform default ({})", BackendType::platform_default())
            }
            BackendPreference::Explicit(backend) => write!(f, "{backend}"),
        }
    }
}

/// Adapter power preference forwarded to the adapter request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerPreference {
    Undefined,
    LowPower,
    #[default]
    HighPerformance,
}

impl fmt::Display for PowerPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerPreference::Undefined => write!(f, "Undefined"),
            PowerPreference::LowPower => write!(f, "LowPower"),
            PowerPreference::HighPerformance => write!(f, "HighPerformance"),
        }
    }
}

impl FromStr for PowerPreference {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "undefined" | "none" => Ok(PowerPreference::Undefined),
            "lowpower" | "low" => Ok(PowerPreference::LowPower),
            "highperformance" | "high" => Ok(PowerPreference::HighPerformance),
            _ => Err(ConfigError::UnknownPowerPreference(s.to_string())),
        }
    }
}

/// Everything a `DeviceSession` needs to know before requesting hardware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub backend: BackendPreference,
    pub power_preference: PowerPreference,
    /// Limits profile for the device request.
    pub profile: DeviceProfile,
    /// Upper bound on the adapter + device acquisition loop.
    pub timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            backend: BackendPreference::PlatformDefault,
            power_preference: PowerPreference::default(),
            profile: DeviceProfile::Native,
            timeout: default_timeout(),
        }
    }
}

impl SessionConfig {
    pub fn with_backend(mut self, backend: impl Into<BackendPreference>) -> Self {
        self.backend = backend.into();
        self
    }

    pub fn with_power_preference(mut self, power_preference: PowerPreference) -> Self {
        self.power_preference = power_preference;
        self
    }

    pub fn with_profile(mut self, profile: DeviceProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
