//! Periodic clock tree compensation at a fixed rate.
use embedded_hal::delay::DelayNs;
use tegra210::emc::{self, PERIODIC_TRAINING_REGS, status};

use super::{
    Error,
    clktree::{SampleClock, TreeUpdate},
    regs::{Sequencer, WarnOnTimeout},
    table::OperatingPoint,
    trimmer::compensated_trim,
};
use crate::{bus::RegisterBus, time::Microseconds};

impl<B: RegisterBus, D: DelayNs> Sequencer<'_, B, D> {
    /// Measure the clock tree of the running `entry` and fold any drift beyond the tree margin
    /// into the outbound DQ trims.
    ///
    /// It performs the following steps:
    ///
    /// 1. Disable the power features and the DLL, then wait for the DRAM to leave power down
    ///    and self refresh and for the request FIFO to drain.
    /// 2. Kick the DQS oscillators and wait for one run at the current rate.
    /// 3. Blend the sample into the moving average of `entry`.
    /// 4. If the largest drift exceeds the margin, rewrite the trims.
    /// 5. Restore `CFG`, latch the new trims and re-enable the DLL.
    ///
    /// Entries without periodic training are left alone.
    pub(crate) fn periodic_compensation(&mut self, entry: &mut OperatingPoint) -> Result<(), Error> {
        if !entry.periodic_training {
            return Ok(());
        }
        let two_rank = self.device_count() == 2;
        let ch1 = entry.channel1_enabled();

        let cfg = self.read(emc::CFG);
        self.write(emc::CFG, cfg & 0x0FFF_FFFF);
        self.dll_disable()?;

        let powerdown = if two_rank {
            status::IN_POWERDOWN_MASK
        } else {
            status::IN_POWERDOWN_DEV0
        };
        self.wait_status_both(ch1, emc::EMC_STATUS, powerdown, false)
            .or_warn("power down exit");
        self.wait_status_both(ch1, emc::EMC_STATUS, status::IN_SELF_REFRESH_MASK, false)
            .or_warn("self refresh exit");
        self.wait_status_both(ch1, emc::EMC_STATUS, status::REQ_FIFO_EMPTY, false)
            .or_warn("request fifo");

        let cfg_update = self.read(emc::CFG_UPDATE);
        self.write(emc::CFG_UPDATE, (cfg_update & 0xFFFF_F9FF) | 0x400);

        self.start_periodic_compensation();
        let run = SampleClock::of(entry).run_time(Microseconds::from_ticks(1));
        self.delay.delay_us(run.ticks());

        let adel = self.update_clock_tree_delay(
            SampleClock::of(entry),
            entry,
            two_rank,
            ch1,
            TreeUpdate::Periodic,
        );
        let taps = (entry.rate_mhz().raw() << 7).wrapping_mul(adel) / 1_000_000;
        if adel != 0 && taps > entry.tree_margin {
            log::debug!("clock tree drifted {} taps at {} kHz", taps, entry.rate_khz);
            for offset in PERIODIC_TRAINING_REGS {
                let value = compensated_trim(entry, offset);
                self.write(offset, value);
            }
        }

        self.write(emc::CFG, cfg);
        self.timing_update(ch1).or_warn("periodic compensation");
        self.write(emc::CFG_UPDATE, cfg_update);
        self.dll_enable(ch1)
    }
}
