// gpu/session.rs — Adapter and device acquisition state machine.
//
//   Uninitialized ─initialize()─▶ AdapterRequested ─adapter─▶ AdapterAcquired
//        ▲                              │                          │
//        │                          no adapter              request_device
//        │                              ▼                          ▼
//        │                      AcquisitionFailed ◀─no device─ DeviceRequested
//        │                                                         │
//        └──────────────────finalize()──────────── DeviceReady ◀───┘
//
// `initialize()` issues the adapter request and then pumps the backend's
// event loop until the device is ready, the attempt fails, or the timeout
// elapses. Completions are dispatched to `on_adapter_request_completed` and
// `on_device_request_completed` from inside that loop, on the calling
// thread, so the machine needs no locks.
//
// INSTANCE REFERENCE:
// A ready session holds exactly one reference on the shared instance
// registry. An attempt takes the reference up front (the adapter request
// needs the instance) and gives it back if it ends without a device, so a
// failed or timed-out session holds nothing and can simply be retried.
//
// Failures never panic: they leave `is_ready() == false` and are reported
// as a `SessionError` by `try_initialize`. A device the backend later
// reports lost also reads as not ready; the next `initialize()` replaces it.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, trace, warn};

use super::backend::{AdapterRequest, BackendEvent, GraphicsBackend, WgpuBackend};
use super::config::{BackendPreference, BackendType, PowerPreference, SessionConfig};
use super::device::{AdapterInfo, DeviceProfile, DeviceRequirements, SessionError};
use super::instance::InstanceRegistry;

/// Label attached to every device this crate requests.
pub const DEVICE_LABEL: &str = "planefit-gpu";

/// Where a session is in the acquisition sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    AdapterRequested,
    AdapterAcquired,
    DeviceRequested,
    DeviceReady,
    AcquisitionFailed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One logical GPU device and the adapter it came from.
pub struct DeviceSession<B: GraphicsBackend> {
    backend: B,
    registry: Arc<InstanceRegistry<B::Instance>>,
    config: SessionConfig,
    state: SessionState,
    // Drop order: device before adapter before the instance reference.
    device: Option<B::Device>,
    adapter: Option<B::Adapter>,
    instance: Option<Arc<B::Instance>>,
    device_ready: bool,
    failure: Option<SessionError>,
}

impl DeviceSession<WgpuBackend> {
    /// A wgpu session sharing the process-wide instance.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_backend(WgpuBackend::new(), WgpuBackend::shared_registry(), config)
    }
}

impl Default for DeviceSession<WgpuBackend> {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl<B: GraphicsBackend> DeviceSession<B> {
    /// A session over an arbitrary backend. Sessions that should share one
    /// instance must share `registry`.
    pub fn with_backend(
        backend: B,
        registry: Arc<InstanceRegistry<B::Instance>>,
        config: SessionConfig,
    ) -> Self {
        DeviceSession {
            backend,
            registry,
            config,
            state: SessionState::Uninitialized,
            device: None,
            adapter: None,
            instance: None,
            device_ready: false,
            failure: None,
        }
    }

    // ---- configuration ----------------------------------------------------
    //
    // Setters only affect the next acquisition attempt; a device that is
    // already ready keeps the backend and limits it was created with.

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn set_backend(&mut self, backend: impl Into<BackendPreference>) {
        self.config.backend = backend.into();
    }

    pub fn set_power_preference(&mut self, power_preference: PowerPreference) {
        self.config.power_preference = power_preference;
    }

    pub fn set_profile(&mut self, profile: DeviceProfile) {
        self.config.profile = profile;
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.config.timeout = timeout;
    }

    // ---- observation ------------------------------------------------------

    /// A device was acquired and the backend has not reported it lost.
    pub fn is_ready(&self) -> bool {
        self.device_ready && !self.device_lost()
    }

    fn device_lost(&self) -> bool {
        self.device
            .as_ref()
            .is_some_and(|d| self.backend.is_device_lost(d))
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn adapter(&self) -> Option<&B::Adapter> {
        self.adapter.as_ref()
    }

    pub fn device(&self) -> Option<&B::Device> {
        self.device.as_ref()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// References currently held on this session's instance registry, by
    /// all sessions sharing it.
    pub fn instance_ref_count(&self) -> usize {
        self.registry.ref_count()
    }

    /// Info of the adapter behind a ready device.
    pub fn adapter_info(&self) -> Option<AdapterInfo> {
        if !self.is_ready() {
            return None;
        }
        self.adapter.as_ref().map(|a| self.backend.adapter_info(a))
    }

    /// The API the ready device actually runs on.
    pub fn backend_in_use(&self) -> Option<BackendType> {
        self.adapter_info()
            .and_then(|info| BackendType::from_wgpu(info.backend))
    }

    // ---- lifecycle --------------------------------------------------------

    /// Acquire an adapter and device. Returns whether the device is ready.
    ///
    /// Returns `true` immediately if it already is. A lost device is
    /// released first and a new one acquired.
    pub fn initialize(&mut self) -> bool {
        self.try_initialize().is_ok()
    }

    /// Like `initialize`, but reports why an attempt failed.
    pub fn try_initialize(&mut self) -> Result<(), SessionError> {
        if self.device_ready {
            if !self.device_lost() {
                debug!("device is already initialized");
                return Ok(());
            }
            warn!("device was lost, acquiring a new one");
            self.finalize();
        }

        let instance = match &self.instance {
            Some(instance) => Arc::clone(instance),
            None => {
                let instance = self.registry.acquire(|| self.backend.create_instance());
                self.instance = Some(Arc::clone(&instance));
                instance
            }
        };

        let request = AdapterRequest {
            backend: self.config.backend.resolve(),
            power_preference: self.config.power_preference,
        };
        debug!(
            "requesting {} adapter ({})",
            request.backend, request.power_preference
        );
        self.failure = None;
        self.adapter = None;
        self.device = None;
        self.state = SessionState::AdapterRequested;
        self.backend.request_adapter(&instance, &request);

        let mut elapsed = Duration::ZERO;
        while !self.device_ready && self.state != SessionState::AcquisitionFailed {
            let start = Instant::now();
            trace!("waiting for device initialization ({elapsed:?})");
            let events = self.backend.process_events(&instance);
            if events.is_empty() {
                std::thread::yield_now();
            }
            for event in events {
                self.dispatch(event);
            }
            elapsed += start.elapsed();
            if !self.device_ready && elapsed >= self.config.timeout {
                error!("request for a GPU device timed out after {elapsed:?}");
                self.state = SessionState::AcquisitionFailed;
                self.failure = Some(SessionError::Timeout(self.config.timeout));
            }
        }
        drop(instance);

        if self.device_ready {
            return Ok(());
        }
        self.abandon_attempt();
        Err(self
            .failure
            .clone()
            .unwrap_or(SessionError::DeviceUnavailable))
    }

    /// Release the device and adapter and give back the instance reference.
    ///
    /// No-op unless the device is ready. Also runs on drop.
    pub fn finalize(&mut self) {
        if !self.device_ready {
            return;
        }
        self.backend.cancel_pending();
        self.device = None;
        self.adapter = None;
        self.device_ready = false;
        self.state = SessionState::Uninitialized;
        self.release_instance();
        debug!("device session finalized");
    }

    /// Why the last attempt failed, if it did.
    pub fn last_error(&self) -> Option<&SessionError> {
        self.failure.as_ref()
    }

    // ---- transitions ------------------------------------------------------

    /// Route one backend completion to its transition.
    pub fn dispatch(&mut self, event: BackendEvent<B::Adapter, B::Device>) {
        match event {
            BackendEvent::AdapterRequestCompleted(adapter) => {
                self.on_adapter_request_completed(adapter)
            }
            BackendEvent::DeviceRequestCompleted(device) => {
                self.on_device_request_completed(device)
            }
        }
    }

    /// Adapter request finished. Without an adapter the attempt fails and
    /// no device request is made.
    pub fn on_adapter_request_completed(&mut self, adapter: Option<B::Adapter>) {
        if self.state != SessionState::AdapterRequested {
            debug!("ignoring adapter completion in state {}", self.state);
            return;
        }

        let Some(adapter) = adapter else {
            warn!("adapter request completed without an adapter");
            self.state = SessionState::AcquisitionFailed;
            self.failure = Some(SessionError::AdapterUnavailable);
            self.acquire_device(None);
            return;
        };

        info!("acquired adapter {}", self.backend.adapter_info(&adapter));
        self.state = SessionState::AdapterAcquired;

        let requirements = DeviceRequirements::for_adapter(
            DEVICE_LABEL,
            self.config.profile,
            &self.backend.adapter_limits(&adapter),
            self.backend.adapter_features(&adapter),
        );
        debug!("requesting device with features {:?}", requirements.features);
        self.backend.request_device(&adapter, &requirements);
        self.adapter = Some(adapter);
        self.state = SessionState::DeviceRequested;
    }

    /// Device request finished.
    pub fn on_device_request_completed(&mut self, device: Option<B::Device>) {
        if self.state != SessionState::DeviceRequested {
            debug!("ignoring device completion in state {}", self.state);
            return;
        }
        self.acquire_device(device);
    }

    fn acquire_device(&mut self, device: Option<B::Device>) {
        match device {
            None => {
                if self.state != SessionState::AcquisitionFailed {
                    warn!("device request completed without a device");
                }
                self.device_ready = false;
                self.state = SessionState::AcquisitionFailed;
                self.failure.get_or_insert(SessionError::DeviceUnavailable);
            }
            Some(device) => {
                self.device = Some(device);
                self.device_ready = true;
                self.state = SessionState::DeviceReady;
                info!("device ready");
            }
        }
    }

    fn abandon_attempt(&mut self) {
        self.backend.cancel_pending();
        self.device = None;
        self.adapter = None;
        self.release_instance();
    }

    fn release_instance(&mut self) {
        if let Some(instance) = self.instance.take() {
            drop(instance);
            self.registry.release();
        }
    }
}

impl<B: GraphicsBackend> Drop for DeviceSession<B> {
    fn drop(&mut self) {
        self.finalize();
        // An interrupted attempt (a panic inside the backend) may still
        // hold the instance reference.
        self.release_instance();
    }
}

impl<B: GraphicsBackend> fmt::Display for DeviceSession<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DeviceSession {{ backend: {}, in use: {}, power: {}, profile: {}, ready: {}, \
             timeout: {:?}, instance refs: {} }}",
            self.config.backend,
            self.backend_in_use()
                .map_or_else(|| "none".to_string(), |b| b.to_string()),
            self.config.power_preference,
            self.config.profile,
            if self.is_ready() { "yes" } else { "no" },
            self.config.timeout,
            self.registry.ref_count(),
        )
    }
}
