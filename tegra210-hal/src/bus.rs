//! Register access used by the EMC sequencer.
//!
//! The sequencer only ever needs 32-bit reads and writes at an offset into one of a handful of
//! register blocks. [RegisterBus] captures exactly that so the sequences can run against the
//! real hardware through [MmioBus] or against a register-level model in tests.
use embedded_hal::delay::DelayNs;
use tegra210::timer::{MmioTimerUs, TimerUs};

/// Register block addressed by a [RegisterBus] access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Block {
    /// EMC broadcast space. Writes reach both channels, reads return channel 0.
    ///
    /// Offsets at and above [tegra210::emc::CH0_OFFSET] address the per-channel views.
    Emc,
    EmcCh0,
    EmcCh1,
    Mc,
    Car,
}

impl Block {
    pub const fn base_addr(self) -> usize {
        match self {
            Block::Emc => tegra210::EMC_BASE_ADDR,
            Block::EmcCh0 => tegra210::EMC0_BASE_ADDR,
            Block::EmcCh1 => tegra210::EMC1_BASE_ADDR,
            Block::Mc => tegra210::MC_BASE_ADDR,
            Block::Car => tegra210::CAR_BASE_ADDR,
        }
    }
}

pub trait RegisterBus {
    fn read(&mut self, block: Block, offset: u32) -> u32;

    fn write(&mut self, block: Block, offset: u32, value: u32);

    /// Read-modify-write of a single register.
    #[inline]
    fn modify(&mut self, block: Block, offset: u32, f: impl FnOnce(u32) -> u32) {
        let value = self.read(block, offset);
        self.write(block, offset, f(value));
    }
}

/// Volatile MMIO access to the fixed T210 register blocks.
pub struct MmioBus {
    _private: (),
}

impl MmioBus {
    /// Create the MMIO register bus.
    ///
    /// # Safety
    ///
    /// The caller must have exclusive ownership of the EMC, MC and the EMC related CAR registers
    /// for the lifetime of the bus.
    pub const unsafe fn steal() -> Self {
        Self { _private: () }
    }

    #[inline(always)]
    const fn addr(block: Block, offset: u32) -> usize {
        block.base_addr() + offset as usize
    }
}

impl RegisterBus for MmioBus {
    #[inline]
    fn read(&mut self, block: Block, offset: u32) -> u32 {
        // Safety: all blocks are valid, aligned MMIO regions owned by this bus.
        unsafe { core::ptr::read_volatile(Self::addr(block, offset) as *const u32) }
    }

    #[inline]
    fn write(&mut self, block: Block, offset: u32, value: u32) {
        // Safety: all blocks are valid, aligned MMIO regions owned by this bus.
        unsafe { core::ptr::write_volatile(Self::addr(block, offset) as *mut u32, value) }
    }
}

/// Blocking delay based on the free-running microsecond timer.
pub struct TimerUsDelay {
    regs: MmioTimerUs<'static>,
}

impl TimerUsDelay {
    pub const fn new(regs: MmioTimerUs<'static>) -> Self {
        Self { regs }
    }

    /// Create the delay provider at the fixed timer address.
    ///
    /// # Safety
    ///
    /// The timer is only ever read, but the caller must ensure nobody reconfigures
    /// `USEC_CFG` while the delay is in use.
    pub unsafe fn steal() -> Self {
        Self::new(unsafe { TimerUs::new_mmio_fixed() })
    }

    #[inline]
    pub fn now_us(&mut self) -> u32 {
        self.regs.read_cntr_1us()
    }
}

impl DelayNs for TimerUsDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.delay_us(ns.div_ceil(1000));
    }

    fn delay_us(&mut self, us: u32) {
        let start = self.now_us();
        // One extra tick so a partially elapsed first microsecond is not counted.
        while self.now_us().wrapping_sub(start) <= us {
            core::hint::spin_loop();
        }
    }
}
