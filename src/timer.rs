//! Slice timer — hardware-abstract time-slice source
//!
//! The scheduler arms a down-counter for each slice and polls it for
//! expiry between task invocations. On Cortex-M this is SysTick in
//! polling mode; for testing, a software counter that advances one tick
//! per poll.
//!
//! Author: Moroya Sakamoto

/// SysTick reload register width
pub const MAX_SLICE_TICKS: u32 = 0x00FF_FFFF;

/// Convert a slice length in milliseconds to timer ticks
///
/// Clamped to `1..=MAX_SLICE_TICKS`.
pub fn ticks_for(ms: u32, clock_hz: u32) -> u32 {
    let ticks_per_ms = clock_hz / 1000;
    ticks_per_ms.saturating_mul(ms).clamp(1, MAX_SLICE_TICKS)
}

/// Polled one-shot slice timer
pub trait SliceTimer {
    /// Arm the counter for `ticks` ticks
    fn start(&mut self, ticks: u32);

    /// Disarm the counter
    fn stop(&mut self);

    /// Has the counter wrapped since `start`?
    fn expired(&mut self) -> bool;
}

/// Software slice timer
///
/// Deterministic: each `expired()` poll consumes one tick, so a slice of
/// `n` ticks lets the scheduler invoke a task exactly `n` times.
#[derive(Debug, Default)]
pub struct SoftTimer {
    remaining: u32,
    running: bool,
    elapsed_ticks: u64,
    slices: u32,
}

impl SoftTimer {
    pub const fn new() -> Self {
        Self {
            remaining: 0,
            running: false,
            elapsed_ticks: 0,
            slices: 0,
        }
    }

    /// Ticks consumed since creation
    pub fn elapsed_ticks(&self) -> u64 {
        self.elapsed_ticks
    }

    /// Number of slices armed since creation
    pub fn slices(&self) -> u32 {
        self.slices
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

impl SliceTimer for SoftTimer {
    fn start(&mut self, ticks: u32) {
        self.remaining = ticks.max(1);
        self.running = true;
        self.slices = self.slices.wrapping_add(1);
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn expired(&mut self) -> bool {
        if !self.running {
            return false;
        }
        if self.remaining == 0 {
            return true;
        }
        self.remaining -= 1;
        self.elapsed_ticks += 1;
        false
    }
}

/// SysTick slice timer (polling mode, core clock)
#[cfg(feature = "cortex-m")]
pub struct SysTickTimer {
    syst: cortex_m::peripheral::SYST,
}

#[cfg(feature = "cortex-m")]
impl SysTickTimer {
    pub fn new(mut syst: cortex_m::peripheral::SYST) -> Self {
        syst.disable_interrupt();
        syst.disable_counter();
        Self { syst }
    }

    /// Give the peripheral back
    pub fn free(self) -> cortex_m::peripheral::SYST {
        self.syst
    }
}

#[cfg(feature = "cortex-m")]
impl SliceTimer for SysTickTimer {
    fn start(&mut self, ticks: u32) {
        use cortex_m::peripheral::syst::SystClkSource;

        self.syst.disable_counter();
        self.syst.set_reload(ticks.clamp(1, MAX_SLICE_TICKS) - 1);
        self.syst.clear_current();
        self.syst.set_clock_source(SystClkSource::Core);
        self.syst.enable_counter();
    }

    fn stop(&mut self) {
        self.syst.disable_counter();
    }

    fn expired(&mut self) -> bool {
        // Reads and clears COUNTFLAG
        self.syst.has_wrapped()
    }
}

/// Wall-clock slice timer for hosted builds
#[cfg(feature = "std")]
#[derive(Debug)]
pub struct HostTimer {
    clock_hz: u32,
    deadline: Option<std::time::Instant>,
}

#[cfg(feature = "std")]
impl HostTimer {
    /// Interpret ticks at `clock_hz`
    pub fn new(clock_hz: u32) -> Self {
        Self {
            clock_hz: clock_hz.max(1),
            deadline: None,
        }
    }
}

#[cfg(feature = "std")]
impl SliceTimer for HostTimer {
    fn start(&mut self, ticks: u32) {
        let nanos = u64::from(ticks) * 1_000_000_000 / u64::from(self.clock_hz);
        self.deadline = Some(std::time::Instant::now() + std::time::Duration::from_nanos(nanos));
    }

    fn stop(&mut self) {
        self.deadline = None;
    }

    fn expired(&mut self) -> bool {
        self.deadline
            .is_some_and(|deadline| std::time::Instant::now() >= deadline)
    }
}
