/// Board services the passcode manager needs from the firmware.
pub trait Platform {
    /// Kick the hardware watchdog during long computations.
    fn service_watchdog(&mut self);

    /// Request a system restart. On hardware this does not return; hosts
    /// may return and let the caller unwind.
    fn trigger_restart(&mut self);

    /// Enable or disable the SWD debug port.
    fn set_debug_port(&mut self, enabled: bool);

    fn delay_ms(&mut self, ms: u32);
}

impl<T: Platform + ?Sized> Platform for &mut T {
    fn service_watchdog(&mut self) {
        (**self).service_watchdog()
    }
    fn trigger_restart(&mut self) {
        (**self).trigger_restart()
    }
    fn set_debug_port(&mut self, enabled: bool) {
        (**self).set_debug_port(enabled)
    }
    fn delay_ms(&mut self, ms: u32) {
        (**self).delay_ms(ms)
    }
}
