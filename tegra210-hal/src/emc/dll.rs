//! Digital DLL control.
use embedded_hal::delay::DelayNs;
use tegra210::{
    car,
    emc::{self, Emc2xClkSrc},
};

use super::{
    Error,
    regs::{Sequencer, WarnOnTimeout},
    table::{OperatingPoint, burst},
};
use crate::bus::{Block, RegisterBus};

const DLL_LOCKED: u32 = 1 << 17;
const DLL_ALARM_CLEAR: u32 = 1 << 15;

impl<B: RegisterBus, D: DelayNs> Sequencer<'_, B, D> {
    /// Move the DLL clock onto the 2x clock source selected by `clk_src_emc`.
    pub(crate) fn change_dll_src(&mut self, entry: &OperatingPoint, clk_src_emc: u32) {
        let src = Emc2xClkSrc::from_raw((clk_src_emc >> 29) as u8);
        let mut dll = (entry.dll_clk_src & 0x1FFF_FF00)
            | ((src.raw_value().value() as u32) << 29)
            | (clk_src_emc & 0xFF);
        dll &= !0xC00;
        match src {
            Emc2xClkSrc::PllmbUd => dll |= 0x400,
            Emc2xClkSrc::PllmUd => (),
            _ => dll |= 0x800,
        }
        self.write_block(Block::Car, car::CLK_SOURCE_EMC_DLL, dll);

        let enb = self.read_block(Block::Car, car::CLK_OUT_ENB_X) & !car::CLK_ENB_EMC_DLL;
        self.write_block(
            Block::Car,
            car::CLK_OUT_ENB_X,
            enb | ((entry.clk_enb_emc_dll & 1) << 14),
        );
    }

    /// Wait until the DLL enable bit of channel 0 (and channel 1 with `ch1`) reads `enabled`.
    fn wait_dll_enable(&mut self, enabled: bool, ch1: bool) -> Result<(), Error> {
        self.spin_until(|bus| (bus.read(Block::Emc, emc::CFG_DIG_DLL) & 1 != 0) == enabled)?;
        if ch1 {
            self.spin_until(|bus| (bus.read(Block::EmcCh1, emc::CFG_DIG_DLL) & 1 != 0) == enabled)?;
        }
        Ok(())
    }

    /// Lock the DLL for the destination rate before the clock change.
    ///
    /// Returns the lock value from `DIG_DLL_STATUS`.
    pub(crate) fn dll_prelock(
        &mut self,
        dst: &OperatingPoint,
        tristate: bool,
        clk_src_emc: u32,
    ) -> Result<u32, Error> {
        let dual = self.dual_channel();

        self.modify(emc::CFG_DIG_DLL, |v| (v & 0xFFFF_F824) | 0x3C8);
        self.timing_update(dual).or_warn("dll prelock");
        self.wait_dll_enable(false, dual)?;

        self.write(emc::DLL_CFG_0, dst.burst[burst::DLL_CFG_0]);
        self.write(emc::DLL_CFG_1, dst.burst[burst::DLL_CFG_1]);
        self.change_dll_src(dst, clk_src_emc);

        self.modify(emc::CFG_DIG_DLL, |v| v | 1);
        self.timing_update(dual).or_warn("dll prelock");
        self.wait_dll_enable(true, dual)?;
        self.spin_until(|bus| {
            let status = bus.read(Block::Emc, emc::DIG_DLL_STATUS);
            status & DLL_LOCKED != 0 && status & DLL_ALARM_CLEAR != 0
        })?;

        // Training runs with the DLL off. The lock value survives in the status register.
        if tristate {
            self.modify(emc::DBG, |v| v | 2);
            self.modify(emc::CFG_DIG_DLL, |v| v & !1);
            self.modify(emc::DBG, |v| v & !2);
            self.wait_dll_enable(false, dual)?;
        }

        let lock = self.read(emc::DIG_DLL_STATUS) & 0x7FF;
        log::debug!("DLL prelocked at {:#x}", lock);
        Ok(lock)
    }

    pub(crate) fn dll_disable(&mut self) -> Result<(), Error> {
        let dual = self.dual_channel();
        self.modify(emc::CFG_DIG_DLL, |v| v & !1);
        self.timing_update(dual).or_warn("dll disable");
        self.wait_dll_enable(false, dual)
    }

    pub(crate) fn dll_enable(&mut self, ch1: bool) -> Result<(), Error> {
        self.modify(emc::CFG_DIG_DLL, |v| v | 1);
        self.timing_update(ch1).or_warn("dll enable");
        self.wait_dll_enable(true, ch1)
    }

    /// Enable the DLL in its reset-and-start configuration.
    pub(crate) fn dll_enable_rs(&mut self, ch1: bool) -> Result<(), Error> {
        self.modify(emc::CFG_DIG_DLL, |v| (v & 0xFFFF_FF24) | 0x89);
        self.timing_update(ch1).or_warn("dll enable");
        self.wait_dll_enable(true, ch1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emc::{
        Config, Session,
        sim::{NoDelay, SimBus},
    };

    #[test]
    fn test_dll_src_pllmb() {
        let mut bus = SimBus::new();
        bus.poke(Block::Car, car::CLK_OUT_ENB_X, 0xFFFF_FFFF);
        let mut delay = NoDelay::default();
        let config = Config::new();
        let mut session = Session::new();
        let mut seq = Sequencer::new(&mut bus, &mut delay, &config, &mut session);
        let mut entry = OperatingPoint::new(1_600_000);
        entry.dll_clk_src = 0x4000_0C55;
        seq.change_dll_src(&entry, 0xA000_0001);
        assert_eq!(bus.peek(Block::Car, car::CLK_SOURCE_EMC_DLL), 0xA000_0401);
        assert_eq!(bus.peek(Block::Car, car::CLK_OUT_ENB_X), 0xFFFF_BFFF);
    }

    #[test]
    fn test_dll_src_switch_out() {
        let mut bus = SimBus::new();
        let mut delay = NoDelay::default();
        let config = Config::new();
        let mut session = Session::new();
        let mut seq = Sequencer::new(&mut bus, &mut delay, &config, &mut session);
        let mut entry = OperatingPoint::new(204_000);
        entry.clk_enb_emc_dll = 1;
        seq.change_dll_src(&entry, 0x4000_0002);
        assert_eq!(bus.peek(Block::Car, car::CLK_SOURCE_EMC_DLL), 0x4000_0802);
        assert_eq!(bus.peek(Block::Car, car::CLK_OUT_ENB_X), car::CLK_ENB_EMC_DLL);

        let mut seq = Sequencer::new(&mut bus, &mut delay, &config, &mut session);
        seq.change_dll_src(&entry, 0x8000_0000);
        assert_eq!(bus.peek(Block::Car, car::CLK_SOURCE_EMC_DLL), 0x8000_0000);
    }

    #[test]
    fn test_prelock_returns_lock_value() {
        let mut bus = SimBus::lpddr4(true, true);
        bus.poke(Block::Emc, emc::DIG_DLL_STATUS, (1 << 17) | (1 << 15) | 0x123);
        let mut delay = NoDelay::default();
        let config = Config::new().with_dll_spin_limit(16);
        let mut session = Session::new();
        let mut seq = Sequencer::new(&mut bus, &mut delay, &config, &mut session);
        let entry = OperatingPoint::new(1_600_000);
        assert_eq!(seq.dll_prelock(&entry, true, 0x8000_0000), Ok(0x123));
        // Left disabled for training.
        assert_eq!(bus.peek(Block::Emc, emc::CFG_DIG_DLL) & 1, 0);
        assert_eq!(bus.peek(Block::EmcCh1, emc::CFG_DIG_DLL) & 1, 0);
    }

    #[test]
    fn test_disable_stuck_dll_times_out() {
        let mut bus = SimBus::lpddr4(false, false);
        bus.dll_stuck = true;
        let mut delay = NoDelay::default();
        let config = Config::new().with_dll_spin_limit(16);
        let mut session = Session::new();
        let mut seq = Sequencer::new(&mut bus, &mut delay, &config, &mut session);
        assert_eq!(seq.dll_disable(), Err(Error::DllLockTimeout));
        assert_eq!(seq.dll_enable(false), Ok(()));
    }

    #[test]
    fn test_enable_rs_config() {
        let mut bus = SimBus::lpddr4(false, true);
        bus.poke(Block::Emc, emc::CFG_DIG_DLL, 0xFFFF_FFFE);
        let mut delay = NoDelay::default();
        let config = Config::new();
        let mut session = Session::new();
        let mut seq = Sequencer::new(&mut bus, &mut delay, &config, &mut session);
        seq.dll_enable_rs(true).unwrap();
        assert_eq!(bus.peek(Block::Emc, emc::CFG_DIG_DLL), 0xFFFF_FFAD);
    }
}
