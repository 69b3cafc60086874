//! # Microsecond timer

pub const TIMERUS_BASE_ADDR: usize = super::TIMER_BASE_ADDR + 0x10;

#[bitbybit::bitfield(u32, default = 0x0)]
#[derive(Debug)]
pub struct UsecConfig {
    /// Dividend of the oscillator to microsecond ratio, minus one.
    #[bits(8..=15, rw)]
    dividend: u8,
    /// Divisor of the oscillator to microsecond ratio, minus one.
    #[bits(0..=7, rw)]
    divisor: u8,
}

/// Free-running microsecond counter.
#[derive(derive_mmio::Mmio)]
#[repr(C)]
pub struct TimerUs {
    /// Counter value. Increments once per microsecond and wraps at 32 bits.
    #[mmio(PureRead)]
    cntr_1us: u32,
    /// Oscillator to microsecond ratio.
    usec_cfg: UsecConfig,
}

static_assertions::const_assert_eq!(core::mem::size_of::<TimerUs>(), 0x08);

impl TimerUs {
    /// Create a new microsecond timer MMIO instance at the fixed base address.
    ///
    /// # Safety
    ///
    /// This API can be used to potentially create a driver to the same peripheral structure
    /// from multiple threads. The user must ensure that concurrent accesses are safe and do not
    /// interfere with each other.
    #[inline]
    pub const unsafe fn new_mmio_fixed() -> MmioTimerUs<'static> {
        unsafe { TimerUs::new_mmio_at(TIMERUS_BASE_ADDR) }
    }
}
