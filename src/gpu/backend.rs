// gpu/backend.rs — The graphics backend a `DeviceSession` drives.
//
// The backend owns the asynchronous side of acquisition: a request is
// issued and returns immediately, and its completion is reported later from
// `process_events` as a `BackendEvent`. The session dispatches those events
// to its transition functions. Completions therefore run on the thread
// that pumps events, inside the session's polling loop.
//
// `WgpuBackend` is the production implementation.
//
// ADAPTER SELECTION:
// wgpu's `request_adapter` cannot be pinned to one API without creating a
// dedicated instance, and the instance is shared by every session. We
// enumerate the adapters of the requested API instead and pick by power
// preference:
//   HighPerformance: DiscreteGpu > IntegratedGpu > VirtualGpu > Other > Cpu
//   LowPower: IntegratedGpu > DiscreteGpu > VirtualGpu > Other > Cpu
//   Undefined: enumeration order, software renderers last
// The result is queued and delivered on the next `process_events`, so the
// session sees the same completion path as for the device request.
//
// DEVICE REQUEST:
// `Adapter::request_device` returns a future. We box it and poll it with a
// no-op waker every time events are processed, after letting wgpu run its
// own pending callbacks via `Instance::poll_all`.
//
// A session that gives up on an attempt calls `cancel_pending`, which drops
// queued adapters and unfinished device futures. Otherwise a late device
// from the abandoned adapter would complete the next attempt.
//
// DEVICE LOSS:
// Every acquired device logs uncaptured validation errors instead of
// panicking, and flags itself lost from wgpu's device-lost callback. A lost
// device reports `is_device_lost`, which the session treats as not ready.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use log::{debug, error, warn};

use super::config::{BackendType, PowerPreference};
use super::device::{AdapterInfo, DeviceRequirements};
use super::instance::InstanceRegistry;

/// Options for an adapter request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterRequest {
    pub backend: BackendType,
    pub power_preference: PowerPreference,
}

/// A request completion reported by `GraphicsBackend::process_events`.
///
/// `None` means the backend finished the request without producing a handle.
#[derive(Debug)]
pub enum BackendEvent<A, D> {
    AdapterRequestCompleted(Option<A>),
    DeviceRequestCompleted(Option<D>),
}

/// Asynchronous adapter/device provider plus the capability queries used to
/// build a device request.
pub trait GraphicsBackend {
    type Instance;
    type Adapter;
    type Device;

    /// Create the process-wide instance. Called only when none is alive.
    fn create_instance(&mut self) -> Self::Instance;

    /// Start an adapter request. Completion arrives via `process_events`.
    fn request_adapter(&mut self, instance: &Self::Instance, request: &AdapterRequest);

    /// Start a device request on `adapter`. Completion arrives via
    /// `process_events`.
    fn request_device(&mut self, adapter: &Self::Adapter, requirements: &DeviceRequirements);

    /// Make progress on outstanding requests and return every completion
    /// that happened. May return nothing, or several events at once.
    fn process_events(
        &mut self,
        instance: &Self::Instance,
    ) -> Vec<BackendEvent<Self::Adapter, Self::Device>>;

    /// Drop every request whose completion has not been delivered yet. No
    /// event for them is reported afterwards.
    fn cancel_pending(&mut self);

    /// Whether a previously delivered device has since been lost.
    fn is_device_lost(&self, device: &Self::Device) -> bool;

    fn adapter_limits(&self, adapter: &Self::Adapter) -> wgpu::Limits;

    fn adapter_features(&self, adapter: &Self::Adapter) -> wgpu::Features;

    fn adapter_info(&self, adapter: &Self::Adapter) -> AdapterInfo;
}

// ============================================================
// wgpu implementation
// ============================================================

/// A logical device and its submission queue.
#[derive(Debug)]
pub struct GpuDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    lost: Arc<AtomicBool>,
}

impl GpuDevice {
    /// Wrap a freshly created device and install its error and loss
    /// handlers.
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        device.on_uncaptured_error(Box::new(|e| {
            error!("uncaptured GPU error: {e}");
        }));

        let lost = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&lost);
        device.set_device_lost_callback(move |reason, message| {
            flag.store(true, Ordering::Release);
            warn!("GPU device lost ({reason:?}): {message}");
        });

        GpuDevice { device, queue, lost }
    }

    /// Set once wgpu reports the device lost. Never cleared.
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }
}

type DeviceFuture =
    Pin<Box<dyn Future<Output = Result<(wgpu::Device, wgpu::Queue), wgpu::RequestDeviceError>>>>;

/// `GraphicsBackend` over wgpu.
#[derive(Default)]
pub struct WgpuBackend {
    adapters_ready: Vec<Option<wgpu::Adapter>>,
    pending_devices: Vec<DeviceFuture>,
}

impl WgpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by every wgpu-backed session in the process.
    pub fn shared_registry() -> Arc<InstanceRegistry<wgpu::Instance>> {
        static REGISTRY: OnceLock<Arc<InstanceRegistry<wgpu::Instance>>> = OnceLock::new();
        Arc::clone(REGISTRY.get_or_init(|| Arc::new(InstanceRegistry::new())))
    }

    /// Requests whose completion has not been delivered yet.
    pub fn pending_requests(&self) -> usize {
        self.adapters_ready.len() + self.pending_devices.len()
    }
}

impl GraphicsBackend for WgpuBackend {
    type Instance = wgpu::Instance;
    type Adapter = wgpu::Adapter;
    type Device = GpuDevice;

    fn create_instance(&mut self) -> wgpu::Instance {
        // Validation layer in debug builds for shader error feedback.
        let flags = if cfg!(debug_assertions) {
            wgpu::InstanceFlags::VALIDATION
                | wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
        } else {
            wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
        };

        wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags,
            ..Default::default()
        })
    }

    fn request_adapter(&mut self, instance: &wgpu::Instance, request: &AdapterRequest) {
        let adapters = instance.enumerate_adapters(request.backend.to_wgpu());
        for a in &adapters {
            let info = a.get_info();
            debug!(
                "{} adapter: {} ({:?})",
                request.backend, info.name, info.device_type
            );
        }

        let chosen = adapters
            .into_iter()
            .enumerate()
            .min_by_key(|(order, a)| {
                (adapter_rank(a.get_info().device_type, request.power_preference), *order)
            })
            .map(|(_, a)| a);

        if chosen.is_none() {
            warn!("no {} adapter available", request.backend);
        }
        self.adapters_ready.push(chosen);
    }

    fn request_device(&mut self, adapter: &wgpu::Adapter, requirements: &DeviceRequirements) {
        let future = adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some(requirements.label.as_str()),
                required_features: requirements.features,
                required_limits: requirements.limits.clone(),
                memory_hints: wgpu::MemoryHints::default(),
            },
            None,
        );
        self.pending_devices.push(Box::pin(future));
    }

    fn process_events(
        &mut self,
        instance: &wgpu::Instance,
    ) -> Vec<BackendEvent<wgpu::Adapter, GpuDevice>> {
        instance.poll_all(false);

        let mut events: Vec<_> = self
            .adapters_ready
            .drain(..)
            .map(BackendEvent::AdapterRequestCompleted)
            .collect();

        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        self.pending_devices
            .retain_mut(|future| match future.as_mut().poll(&mut cx) {
                Poll::Pending => true,
                Poll::Ready(Ok((device, queue))) => {
                    events.push(BackendEvent::DeviceRequestCompleted(Some(GpuDevice::new(
                        device, queue,
                    ))));
                    false
                }
                Poll::Ready(Err(e)) => {
                    warn!("device request failed: {e}");
                    events.push(BackendEvent::DeviceRequestCompleted(None));
                    false
                }
            });

        events
    }

    fn cancel_pending(&mut self) {
        let dropped = self.pending_requests();
        if dropped > 0 {
            debug!("dropping {dropped} pending request(s) from an abandoned attempt");
        }
        self.adapters_ready.clear();
        self.pending_devices.clear();
    }

    fn is_device_lost(&self, device: &GpuDevice) -> bool {
        device.is_lost()
    }

    fn adapter_limits(&self, adapter: &wgpu::Adapter) -> wgpu::Limits {
        adapter.limits()
    }

    fn adapter_features(&self, adapter: &wgpu::Adapter) -> wgpu::Features {
        adapter.features()
    }

    fn adapter_info(&self, adapter: &wgpu::Adapter) -> AdapterInfo {
        adapter.get_info().into()
    }
}

/// Lower is better.
fn adapter_rank(device_type: wgpu::DeviceType, power: PowerPreference) -> u8 {
    use wgpu::DeviceType::*;
    match (power, device_type) {
        (PowerPreference::HighPerformance, DiscreteGpu) => 0,
        (PowerPreference::HighPerformance, IntegratedGpu) => 1,
        (PowerPreference::LowPower, IntegratedGpu) => 0,
        (PowerPreference::LowPower, DiscreteGpu) => 1,
        (PowerPreference::Undefined, DiscreteGpu | IntegratedGpu) => 0,
        (_, VirtualGpu) => 2,
        (_, Other) => 3,
        (_, Cpu) => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_high_performance_prefers_discrete() {
        use wgpu::DeviceType::*;
        let hp = PowerPreference::HighPerformance;
        assert!(adapter_rank(DiscreteGpu, hp) < adapter_rank(IntegratedGpu, hp));
        assert!(adapter_rank(IntegratedGpu, hp) < adapter_rank(VirtualGpu, hp));
        assert!(adapter_rank(Other, hp) < adapter_rank(Cpu, hp));
    }

    #[test]
    fn test_low_power_prefers_integrated() {
        use wgpu::DeviceType::*;
        let lp = PowerPreference::LowPower;
        assert!(adapter_rank(IntegratedGpu, lp) < adapter_rank(DiscreteGpu, lp));
        assert!(adapter_rank(DiscreteGpu, lp) < adapter_rank(Cpu, lp));
    }

    #[test]
    fn test_undefined_only_demotes_software() {
        use wgpu::DeviceType::*;
        let un = PowerPreference::Undefined;
        assert_eq!(adapter_rank(DiscreteGpu, un), adapter_rank(IntegratedGpu, un));
        assert!(adapter_rank(IntegratedGpu, un) < adapter_rank(Cpu, un));
    }

    #[test]
    fn test_shared_registry_is_process_wide() {
        let a = WgpuBackend::shared_registry();
        let b = WgpuBackend::shared_registry();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_new_backend_has_nothing_pending() {
        assert_eq!(WgpuBackend::new().pending_requests(), 0);
    }

    #[test]
    fn test_cancel_pending_clears_queued_adapters() {
        let mut backend = WgpuBackend::new();
        backend.adapters_ready.push(None);
        backend.adapters_ready.push(None);
        assert_eq!(backend.pending_requests(), 2);
        backend.cancel_pending();
        assert_eq!(backend.pending_requests(), 0);
    }
}
