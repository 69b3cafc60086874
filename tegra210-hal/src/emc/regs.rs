//! Sequencer context and the register level primitives shared by all EMC sequences.
use arbitrary_int::u15;
use embedded_hal::delay::DelayNs;
use tegra210::{
    emc::{self, CcfifoAddr, DramType, FbioCfg5, FbioCfg7, status},
    mc::{self, EmemAdrCfg},
};

use super::{Config, Error, Session};
use crate::bus::{Block, RegisterBus};

/// Channel whose status is polled. Channel 0 status is read through the broadcast space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Ch0,
    Ch1,
}

impl Channel {
    #[inline]
    pub const fn status_block(self) -> Block {
        match self {
            Channel::Ch0 => Block::Emc,
            Channel::Ch1 => Block::EmcCh1,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("emc {channel:?} register {offset:#x} did not reach the expected state")]
pub struct StatusTimeout {
    pub channel: Channel,
    pub offset: u32,
}

/// Most status waits inside a sequence are best effort: a timeout is logged and the sequence
/// carries on.
pub(crate) trait WarnOnTimeout {
    fn or_warn(self, what: &str);
}

impl WarnOnTimeout for Result<(), StatusTimeout> {
    #[inline]
    fn or_warn(self, what: &str) {
        if let Err(e) = self {
            log::warn!("{}: {}", what, e);
        }
    }
}

/// Round a cycle count to the nearest integer, halves rounding up.
#[inline]
pub(crate) fn round_cycles(value: f32) -> i32 {
    (value + 0.5) as i32
}

/// Everything one EMC sequence needs: register access, a delay source, the driver
/// configuration and the session state which persists across rate changes.
pub(crate) struct Sequencer<'a, B, D> {
    pub(crate) bus: &'a mut B,
    pub(crate) delay: &'a mut D,
    pub(crate) config: &'a Config,
    pub(crate) session: &'a mut Session,
}

impl<'a, B: RegisterBus, D: DelayNs> Sequencer<'a, B, D> {
    pub(crate) fn new(
        bus: &'a mut B,
        delay: &'a mut D,
        config: &'a Config,
        session: &'a mut Session,
    ) -> Self {
        Self {
            bus,
            delay,
            config,
            session,
        }
    }

    #[inline]
    pub(crate) fn read(&mut self, offset: u32) -> u32 {
        self.bus.read(Block::Emc, offset)
    }

    #[inline]
    pub(crate) fn write(&mut self, offset: u32, value: u32) {
        self.bus.write(Block::Emc, offset, value)
    }

    #[inline]
    pub(crate) fn modify(&mut self, offset: u32, f: impl FnOnce(u32) -> u32) {
        self.bus.modify(Block::Emc, offset, f)
    }

    #[inline]
    pub(crate) fn read_block(&mut self, block: Block, offset: u32) -> u32 {
        self.bus.read(block, offset)
    }

    #[inline]
    pub(crate) fn write_block(&mut self, block: Block, offset: u32, value: u32) {
        self.bus.write(block, offset, value)
    }

    /// Queue a register write which executes around the next clock change.
    ///
    /// `delay` is given in EMC clock cycles of the clock active at execution time.
    pub(crate) fn ccfifo(&mut self, offset: u32, value: u32, delay: u32) {
        self.write(emc::CCFIFO_DATA, value);
        let addr = CcfifoAddr::new_with_raw_value(0)
            .with_push(true)
            .with_delay(u15::new((delay & 0x7FFF) as u16))
            .with_offset(offset as u16);
        self.write(emc::CCFIFO_ADDR, addr.raw_value());
    }

    /// Kick one clock tree oscillator measurement.
    pub(crate) fn start_periodic_compensation(&mut self) {
        self.write(emc::MPC, 0x4B);
        self.read(emc::MPC);
    }

    /// Poll `offset` until the bits in `mask` are (not) all clear, one microsecond between
    /// polls, up to [Config::status_poll_retries] times.
    pub(crate) fn wait_status(
        &mut self,
        channel: Channel,
        offset: u32,
        mask: u32,
        state: bool,
    ) -> Result<(), StatusTimeout> {
        for _ in 0..self.config.status_poll_retries {
            if (self.bus.read(channel.status_block(), offset) & mask != 0) == state {
                return Ok(());
            }
            self.delay.delay_us(1);
        }
        Err(StatusTimeout { channel, offset })
    }

    /// Wait on channel 0, and on channel 1 as well if `ch1` is set. Both waits always run.
    pub(crate) fn wait_status_both(
        &mut self,
        ch1: bool,
        offset: u32,
        mask: u32,
        state: bool,
    ) -> Result<(), StatusTimeout> {
        let ch0 = self.wait_status(Channel::Ch0, offset, mask, state);
        let ch1 = if ch1 {
            self.wait_status(Channel::Ch1, offset, mask, state)
        } else {
            Ok(())
        };
        ch0.and(ch1)
    }

    /// Latch the shadow registers into the active set.
    pub(crate) fn timing_update(&mut self, dual: bool) -> Result<(), StatusTimeout> {
        self.write(emc::TIMING_CONTROL, 1);
        self.wait_status_both(
            dual,
            emc::EMC_STATUS,
            status::TIMING_UPDATE_STALLED,
            false,
        )
    }

    /// Issue a mode register read and wait until the result is valid.
    pub(crate) fn request_mrr(&mut self, command: u32, dual: bool) -> Result<(), StatusTimeout> {
        self.write(emc::MRR, command);
        self.wait_status_both(dual, emc::EMC_STATUS, status::MRR_DIVLD, true)
    }

    /// Busy-wait until `done` holds. Unbounded unless [Config::dll_spin_limit] is set.
    pub(crate) fn spin_until(&mut self, mut done: impl FnMut(&mut B) -> bool) -> Result<(), Error> {
        let mut polls: u32 = 0;
        while !done(&mut *self.bus) {
            if let Some(limit) = self.config.dll_spin_limit {
                polls += 1;
                if polls >= limit {
                    return Err(Error::DllLockTimeout);
                }
            }
            core::hint::spin_loop();
        }
        Ok(())
    }

    /// Both channels are enabled in hardware.
    #[inline]
    pub(crate) fn dual_channel(&mut self) -> bool {
        FbioCfg7::new_with_raw_value(self.read(emc::FBIO_CFG7)).dual_channel()
    }

    #[inline]
    pub(crate) fn dram_type(&mut self) -> DramType {
        FbioCfg5::new_with_raw_value(self.read(emc::FBIO_CFG5)).dram_type()
    }

    /// Number of DRAM devices (ranks), 1 or 2.
    #[inline]
    pub(crate) fn device_count(&mut self) -> u32 {
        EmemAdrCfg::new_with_raw_value(self.bus.read(Block::Mc, mc::EMEM_ADR_CFG)).device_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emc::sim::{NoDelay, SimBus};

    #[test]
    fn test_round_cycles() {
        assert_eq!(round_cycles(2.5), 3);
        assert_eq!(round_cycles(2.49), 2);
        assert_eq!(round_cycles(0.0), 0);
    }

    #[test]
    fn test_ccfifo_word() {
        let mut bus = SimBus::new();
        let mut delay = NoDelay::default();
        let config = Config::new();
        let mut session = Session::new();
        let mut seq = Sequencer::new(&mut bus, &mut delay, &config, &mut session);
        seq.ccfifo(emc::MRW3, 0x1234, 0x1_8005);
        assert_eq!(seq.read(emc::CCFIFO_DATA), 0x1234);
        assert_eq!(seq.read(emc::CCFIFO_ADDR), 0x8005_0138);
        let entry = bus.ccfifo[0];
        assert_eq!((entry.offset, entry.value, entry.delay), (emc::MRW3, 0x1234, 5));
    }

    #[test]
    fn test_status_wait_timeout() {
        let mut bus = SimBus::new();
        bus.poke(Block::EmcCh1, emc::EMC_STATUS, status::TIMING_UPDATE_STALLED);
        let mut delay = NoDelay::default();
        let config = Config::new();
        let mut session = Session::new();
        let mut seq = Sequencer::new(&mut bus, &mut delay, &config, &mut session);
        assert_eq!(seq.timing_update(false), Ok(()));
        assert_eq!(
            seq.timing_update(true),
            Err(StatusTimeout {
                channel: Channel::Ch1,
                offset: emc::EMC_STATUS
            })
        );
        assert_eq!(delay.elapsed_us, config.status_poll_retries as u64);
    }

    #[test]
    fn test_spin_limit() {
        let mut bus = SimBus::new();
        let mut delay = NoDelay::default();
        let config = Config::new().with_dll_spin_limit(8);
        let mut session = Session::new();
        let mut seq = Sequencer::new(&mut bus, &mut delay, &config, &mut session);
        assert_eq!(seq.spin_until(|_| false), Err(Error::DllLockTimeout));
        assert_eq!(seq.spin_until(|_| true), Ok(()));
    }
}
