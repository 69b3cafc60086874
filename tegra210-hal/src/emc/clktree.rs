//! DQS clock tree delay estimation.
//!
//! The DRAM reports the count of its DQS interval oscillator through mode registers 18 and 19.
//! From that count the delay of each byte lane is derived and filtered. Drift relative to the
//! delay seen at write training time is what periodic compensation corrects.
use embedded_hal::delay::DelayNs;
use tegra210::emc;

use super::{
    regs::{Channel, Sequencer, WarnOnTimeout},
    table::{OperatingPoint, lane},
};
use crate::{bus::RegisterBus, time::Microseconds};

/// Update performed by one estimator pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeUpdate {
    /// Accumulate one sample during a rate switch.
    DvfsPt1,
    /// Average the rate switch samples and compare.
    DvfsUpdate,
    /// Accumulate one sample during write training.
    TrainingPt1,
    /// Average the write training samples and record them as the trained delays.
    TrainingUpdate,
    /// Blend a single sample into the moving average and compare.
    Periodic,
}

impl TreeUpdate {
    /// The oscillator counts are read from the DRAM.
    #[inline]
    pub const fn samples(self) -> bool {
        matches!(self, Self::DvfsPt1 | Self::TrainingPt1 | Self::Periodic)
    }

    /// The filtered delay is compared against the current delay.
    #[inline]
    pub const fn compares(self) -> bool {
        matches!(self, Self::DvfsUpdate | Self::TrainingUpdate | Self::Periodic)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompensationSequence {
    Dvfs,
    WriteTraining,
    Periodic,
}

/// Oscillator run length in clocks for the `run_clocks` code of an operating point.
pub const fn oscillator_clocks(run_clocks: u32) -> u32 {
    match run_clocks {
        0..=63 => 16 * run_clocks,
        64..=127 => 2048,
        128..=191 => 4096,
        _ => 8192,
    }
}

/// Clock the oscillator samples were taken at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleClock {
    pub run_clocks: u32,
    pub rate_khz: u32,
}

impl SampleClock {
    pub const fn of(entry: &OperatingPoint) -> Self {
        Self {
            run_clocks: entry.run_clocks,
            rate_khz: entry.rate_khz,
        }
    }

    /// Time one oscillator run takes, plus `settle`.
    #[inline]
    pub fn run_time(&self, settle: Microseconds) -> Microseconds {
        let run = (1000 * oscillator_clocks(self.run_clocks))
            .checked_div(self.rate_khz)
            .unwrap_or(0);
        Microseconds::from_ticks(run) + settle
    }
}

/// Drift in delay line taps of `delta` clock tree units at `mhz`.
#[inline]
pub(crate) fn drift_taps(mhz: i32, delta: i32) -> i32 {
    (mhz.wrapping_mul(delta) << 7) / 1_000_000
}

impl<B: RegisterBus, D: DelayNs> Sequencer<'_, B, D> {
    /// Read the oscillator counts of `device`, indexed by channel, then byte lane.
    fn sample_oscillators(&mut self, device: usize, ch1: bool) -> [[u32; 2]; 2] {
        let (mr19, mr18) = if device == 0 {
            (0x8013_0000, 0x8012_0000)
        } else {
            (0x4013_0000, 0x4012_0000)
        };
        let channels: &[Channel] = if ch1 {
            &[Channel::Ch0, Channel::Ch1]
        } else {
            &[Channel::Ch0]
        };
        let mut counts = [[0; 2]; 2];

        self.request_mrr(mr19, ch1).or_warn("mrr 19");
        for (ch, channel) in channels.iter().enumerate() {
            let mrr = self.read_block(channel.status_block(), emc::MRR);
            counts[ch][0] = (mrr & 0xFF) << 8;
            counts[ch][1] = mrr & 0xFF00;
        }
        self.request_mrr(mr18, ch1).or_warn("mrr 18");
        for (ch, channel) in channels.iter().enumerate() {
            let mrr = self.read_block(channel.status_block(), emc::MRR);
            counts[ch][0] |= mrr & 0xFF;
            counts[ch][1] |= (mrr & 0xFF00) >> 8;
        }
        counts
    }

    /// Run one estimator pass over all active lanes of `dst`.
    ///
    /// Returns the largest positive drift (current minus filtered delay) seen by a comparing
    /// pass, 0 for accumulating passes. A lane whose tree got faster than its filtered value
    /// contributes 0, so the result is not the largest absolute difference.
    pub(crate) fn update_clock_tree_delay(
        &mut self,
        sample: SampleClock,
        dst: &mut OperatingPoint,
        two_rank: bool,
        ch1: bool,
        mode: TreeUpdate,
    ) -> u32 {
        let tval = (1000 * oscillator_clocks(sample.run_clocks))
            .checked_div(sample.rate_khz / 1000)
            .unwrap_or(0)
            .wrapping_mul(1000);
        let mhz = dst.rate_mhz().raw() as i32;
        let devices = if two_rank { 2 } else { 1 };
        let channels = if ch1 { 2 } else { 1 };
        let mut max_delta = 0;

        for device in 0..devices {
            let counts = if mode.samples() {
                self.sample_oscillators(device, ch1)
            } else {
                [[0; 2]; 2]
            };
            for (ch, counts) in counts.iter().enumerate().take(channels) {
                for (byte, &count) in counts.iter().enumerate() {
                    let i = lane(ch, device, byte);
                    let cval = tval.checked_div(2 * count).unwrap_or(0);
                    let ptfv = &mut dst.ptfv;
                    match mode {
                        TreeUpdate::DvfsPt1 | TreeUpdate::TrainingPt1 => {
                            ptfv.movavg[i] = ptfv.movavg[i].wrapping_add(cval.wrapping_mul(100));
                        }
                        TreeUpdate::DvfsUpdate => {
                            ptfv.movavg[i] =
                                ptfv.movavg[i].checked_div(ptfv.dvfs_samples).unwrap_or(0);
                        }
                        TreeUpdate::TrainingUpdate => {
                            ptfv.movavg[i] =
                                ptfv.movavg[i].checked_div(ptfv.write_samples).unwrap_or(0);
                        }
                        TreeUpdate::Periodic => {
                            let weight = ptfv.movavg_weight;
                            ptfv.movavg[i] = cval
                                .wrapping_mul(100)
                                .wrapping_add(weight.wrapping_mul(ptfv.movavg[i]))
                                .checked_div(weight.wrapping_add(1))
                                .unwrap_or(0);
                        }
                    }
                    if !mode.compares() {
                        continue;
                    }

                    let filtered = dst.ptfv.movavg[i] / 100;
                    // Only a tree that got slower than the filtered value counts as drift.
                    let delta = (dst.clock_tree.current[i] as i32)
                        .wrapping_sub(filtered as i32)
                        .max(0);
                    max_delta = max_delta.max(delta);
                    if mode == TreeUpdate::TrainingUpdate
                        || drift_taps(mhz, delta) as u32 > dst.tree_margin
                    {
                        dst.clock_tree.current[i] = filtered;
                    }
                }
            }
        }

        if mode == TreeUpdate::TrainingUpdate {
            dst.clock_tree.trained = dst.clock_tree.current;
        }
        max_delta as u32
    }

    /// Run a full compensation sequence and return the largest drift found.
    ///
    /// Returns 0 without touching the hardware if `dst` has periodic training disabled.
    pub(crate) fn periodic_compensation_handler(
        &mut self,
        src: &OperatingPoint,
        dst: &mut OperatingPoint,
        two_rank: bool,
        ch1: bool,
        sequence: CompensationSequence,
    ) -> u32 {
        if !dst.periodic_training {
            return 0;
        }
        let sample = SampleClock::of(src);
        let delay_us = sample.run_time(Microseconds::from_ticks(2)).ticks();

        match sequence {
            CompensationSequence::Dvfs => {
                if src.periodic_training && dst.ptfv.config_ctrl & 1 != 0 {
                    let samples = dst.ptfv.dvfs_samples;
                    for (avg, src_avg) in dst.ptfv.movavg.iter_mut().zip(src.ptfv.movavg) {
                        *avg = src_avg.wrapping_mul(samples);
                    }
                } else {
                    dst.ptfv.movavg = [0; 8];
                    for _ in 0..dst.ptfv.dvfs_samples {
                        self.start_periodic_compensation();
                        self.delay.delay_us(delay_us);
                        self.update_clock_tree_delay(sample, dst, two_rank, ch1, TreeUpdate::DvfsPt1);
                    }
                }
                self.update_clock_tree_delay(sample, dst, two_rank, ch1, TreeUpdate::DvfsUpdate)
            }
            CompensationSequence::WriteTraining => {
                dst.ptfv.movavg = [0; 8];
                for _ in 0..dst.ptfv.write_samples {
                    self.start_periodic_compensation();
                    self.delay.delay_us(delay_us);
                    self.update_clock_tree_delay(sample, dst, two_rank, ch1, TreeUpdate::TrainingPt1);
                }
                self.update_clock_tree_delay(
                    sample,
                    dst,
                    two_rank,
                    ch1,
                    TreeUpdate::TrainingUpdate,
                )
            }
            CompensationSequence::Periodic => {
                self.start_periodic_compensation();
                self.delay.delay_us(delay_us);
                self.update_clock_tree_delay(sample, dst, two_rank, ch1, TreeUpdate::Periodic)
            }
        }
    }
}
