//! Host stand-ins for the radio's board services.

use rand::RngCore;
use std::time::{Duration, Instant};

use radvault_crypto::{AnalogChannel, EntropySource};
use radvault_secrets::Platform;

/// Board services on a desktop host. There is no watchdog to kick and no
/// way to reset the process from inside a library call, so a restart is
/// recorded and acted on by the caller.
#[derive(Debug, Default)]
pub struct HostPlatform {
    restart_requested: bool,
    debug_port: bool,
}

impl HostPlatform {
    pub fn restart_requested(&self) -> bool {
        self.restart_requested
    }

    pub fn debug_port(&self) -> bool {
        self.debug_port
    }
}

impl Platform for HostPlatform {
    fn service_watchdog(&mut self) {}

    fn trigger_restart(&mut self) {
        tracing::warn!("device restart requested");
        self.restart_requested = true;
    }

    fn set_debug_port(&mut self, enabled: bool) {
        tracing::debug!(enabled, "debug port");
        self.debug_port = enabled;
    }

    fn delay_ms(&mut self, ms: u32) {
        std::thread::sleep(Duration::from_millis(ms as u64));
    }
}

/// Noise from the OS generator, the timer from a monotonic clock.
pub struct HostEntropy {
    started: Instant,
}

impl HostEntropy {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for HostEntropy {
    fn default() -> Self {
        Self::new()
    }
}

impl EntropySource for HostEntropy {
    fn radio_noise(&mut self) -> u16 {
        rand::thread_rng().next_u32() as u16
    }

    fn analog(&mut self, _channel: AnalogChannel) -> u16 {
        // 12-bit ADC
        (rand::thread_rng().next_u32() & 0x0FFF) as u16
    }

    fn timer(&mut self) -> u32 {
        self.started.elapsed().as_nanos() as u32
    }
}
