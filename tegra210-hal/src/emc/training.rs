//! Training orchestration.
//!
//! A rate's training request is split into CA, QUSE and read/write passes. Each pass is one
//! clock change into the destination rate with the matching shadow image, after which the
//! controller is put back into its normal post-training state.
use embedded_hal::delay::DelayNs;
use tegra210::emc::{self, DramType, TrainingCmd};

use super::{
    Error,
    regs::{Sequencer, WarnOnTimeout},
    table::{OperatingPoint, burst},
};
use crate::bus::RegisterBus;

/// Words loaded into the training pattern RAM per pattern index.
pub const PATTERN_WORDS: usize = 256;

/// Longest plan [training_plan] produces: two CA, two QUSE and one read/write pass.
pub const MAX_TRAINING_PASSES: usize = 5;

/// Training phases requested for an operating point.
#[bitbybit::bitfield(u32, default = 0x0)]
#[derive(Debug, PartialEq, Eq)]
pub struct NeedsTraining {
    /// Train with the ranks swapped.
    #[bit(8, rw)]
    swap_rank: bool,
    /// Training runs with the DRAM in self refresh. The short delay lines are captured as well.
    #[bit(9, rw)]
    in_self_refresh: bool,
    #[bit(7, rw)]
    rd_vref: bool,
    #[bit(6, rw)]
    rd: bool,
    #[bit(5, rw)]
    wr_vref: bool,
    #[bit(4, rw)]
    wr: bool,
    #[bit(3, rw)]
    quse_vref: bool,
    #[bit(2, rw)]
    quse: bool,
    #[bit(1, rw)]
    ca_vref: bool,
    #[bit(0, rw)]
    ca: bool,
}

impl NeedsTraining {
    const CA_MASK: u32 = 0x3;
    const QUSE_MASK: u32 = 0xC;
    const RDWR_MASK: u32 = 0xF0;
    const TRISTATE_MASK: u32 = 0xF7;

    #[inline]
    pub const fn none() -> Self {
        Self::new_with_raw_value(0)
    }

    #[inline]
    pub const fn ca_any(&self) -> bool {
        self.raw_value() & Self::CA_MASK != 0
    }

    #[inline]
    pub const fn quse_any(&self) -> bool {
        self.raw_value() & Self::QUSE_MASK != 0
    }

    #[inline]
    pub const fn rdwr_any(&self) -> bool {
        self.raw_value() & Self::RDWR_MASK != 0
    }

    /// A training pass which drives the shadow images instead of the normal burst image.
    #[inline]
    pub const fn tristate(&self) -> bool {
        self.raw_value() & Self::TRISTATE_MASK != 0
    }

    #[inline]
    const fn masked(&self, mask: u32) -> Self {
        Self::new_with_raw_value(self.raw_value() & mask)
    }

    /// Training command word which kicks off every requested phase.
    pub fn training_cmd(&self) -> TrainingCmd {
        TrainingCmd::new_with_raw_value(0)
            .with_ca(self.ca())
            .with_ca_vref(self.ca_vref())
            .with_quse(self.quse())
            .with_quse_vref(self.quse_vref())
            .with_wr(self.wr())
            .with_wr_vref(self.wr_vref())
            .with_rd(self.rd())
            .with_rd_vref(self.rd_vref())
            .with_go(true)
    }
}

/// DQ and DMI contents of the training pattern RAM, [PATTERN_WORDS] words per pattern index.
#[derive(Debug, Clone, Copy)]
pub struct TrainingPatterns<'p> {
    pub dq: &'p [u32],
    pub dmi: &'p [u32],
}

impl<'p> TrainingPatterns<'p> {
    pub const fn new(dq: &'p [u32], dmi: &'p [u32]) -> Self {
        Self { dq, dmi }
    }

    /// Pattern word `i` of pattern `index`. Words beyond the supplied data read as 0.
    #[inline]
    fn word(&self, index: u32, i: usize) -> (u32, u32) {
        let pos = index as usize * PATTERN_WORDS + i;
        (
            self.dq.get(pos).copied().unwrap_or(0),
            self.dmi.get(pos).copied().unwrap_or(0) & 0xF,
        )
    }
}

/// Split a training request into the passes run one after another.
///
/// CA and CA VREF train together. With two ranks, a second CA pass including the rank swap
/// follows, and QUSE gets a dedicated pass without QUSE VREF. Read and write phases share a
/// single pass. The self refresh flag is kept on every pass.
pub fn training_plan(
    needs: NeedsTraining,
    two_rank: bool,
) -> heapless::Vec<NeedsTraining, MAX_TRAINING_PASSES> {
    let mut plan = heapless::Vec::new();
    let mut push = |pass: NeedsTraining| {
        let pushed = plan.push(pass);
        debug_assert!(pushed.is_ok(), "training plan exceeds {MAX_TRAINING_PASSES} passes");
    };

    if needs.ca_any() {
        push(needs.masked(0x203));
        if two_rank {
            push(needs.masked(0x303));
        }
    }
    if needs.quse_any() {
        push(needs.masked(0x20C));
        if two_rank {
            push(needs.masked(0x204));
        }
    }
    if needs.rdwr_any() {
        push(needs.masked(0x2F0));
    }
    plan
}

impl<B: RegisterBus, D: DelayNs> Sequencer<'_, B, D> {
    /// Fill the training pattern RAM. Only the first call in a session touches the hardware.
    pub(crate) fn load_patterns(&mut self, patterns: &TrainingPatterns<'_>, index: u32) {
        if self.session.patterns_loaded {
            return;
        }
        for i in 0..PATTERN_WORDS {
            let (dq, dmi) = patterns.word(index, i);
            self.write(emc::TRAINING_PATRAM_DQ, dq);
            self.write(emc::TRAINING_PATRAM_DMI, dmi);
            self.write(emc::TRAINING_PATRAM_CTRL, 0x8000_0000 + i as u32);
        }
        self.session.patterns_loaded = true;
        log::debug!("training patterns {} loaded", index);
    }

    /// Return the controller to normal operation after one training pass.
    fn finish_training_pass(
        &mut self,
        src: &OperatingPoint,
        dst: &OperatingPoint,
        dual: bool,
    ) -> Result<(), Error> {
        self.modify(emc::DBG, |v| (v & 0xF3FF_FFFF) | 0x800_0000);
        self.modify(emc::CFG_UPDATE, |v| (v & 0xFFFF_FFF9) | 4);
        self.timing_update(dual).or_warn("training recovery");

        self.modify(emc::CFG_UPDATE, |v| v & 0xFFFF_FFF9);
        self.modify(emc::DBG, |v| v & 0xF3FF_FFFF);
        self.modify(emc::CFG_DIG_DLL, |v| (v & 0xFFFF_FF3E) | 0x80);
        self.timing_update(dual).or_warn("training recovery");

        let dll = self.read(emc::CFG_DIG_DLL);
        let dll = if dst.burst[burst::CFG_DIG_DLL] == 1 {
            dll | 1
        } else {
            dll & !1
        };
        self.write(emc::CFG_DIG_DLL, (dll & 0xFFFF_FF3F) | 0x80);
        self.timing_update(dual).or_warn("training recovery");
        self.spin_until(|bus| bus.read(crate::bus::Block::Emc, emc::DIG_DLL_STATUS) & 0x8000 != 0)?;

        // Undo the read/write to precharge patch of the clock change.
        if dst.dram_type() == DramType::Lpddr4 {
            self.write(emc::RP, src.burst[burst::RP]);
            self.write(emc::R2P, src.burst[burst::R2P]);
            self.write(emc::W2P, src.burst[burst::W2P]);
            self.write(emc::TRPAB, src.burst[burst::TRPAB]);
        }
        self.timing_update(dual).or_warn("training recovery");
        Ok(())
    }

    /// Train `dst` if it still needs it, then optionally switch to it.
    ///
    /// It performs the following steps:
    ///
    /// 1. Load the training patterns, once per session.
    /// 2. If `dst` requests training and was not trained yet, run every pass of
    ///    [training_plan], each followed by the post-training recovery sequence, and mark the
    ///    entry as trained.
    /// 3. With `switch_rate`, run one plain clock change into `dst`.
    pub(crate) fn train_patterns(
        &mut self,
        src: &OperatingPoint,
        dst: &mut OperatingPoint,
        switch_rate: bool,
        clk_src_emc: u32,
        patterns: &TrainingPatterns<'_>,
    ) -> Result<(), Error> {
        self.load_patterns(patterns, dst.training_pattern);

        let needs = NeedsTraining::new_with_raw_value(dst.needs_training);
        let dual = self.dual_channel();
        if needs.raw_value() != 0 && !dst.trained {
            let two_rank = self.device_count() == 2;
            for pass in training_plan(needs, two_rank) {
                log::debug!("training pass {:#x} at {} kHz", pass.raw_value(), dst.rate_khz);
                self.clock_change(src, dst, pass, clk_src_emc)?;
                self.finish_training_pass(src, dst, dual)?;
            }
            dst.trained = true;
            log::info!("trained {} kHz", dst.rate_khz);
        }

        if switch_rate {
            self.clock_change(src, dst, NeedsTraining::none(), clk_src_emc)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::vec::Vec;

    use tegra210::car;

    use super::*;
    use crate::{
        bus::Block,
        emc::{
            Config, Session,
            sim::{NoDelay, SimBus, operating_point},
        },
    };

    fn raw(plan: &[NeedsTraining]) -> Vec<u32> {
        plan.iter().map(|p| p.raw_value()).collect()
    }

    #[test]
    fn test_plan_single_rank() {
        let needs = NeedsTraining::new_with_raw_value(0x2FF);
        assert_eq!(raw(&training_plan(needs, false)), [0x203, 0x20C, 0x2F0]);
        let needs = NeedsTraining::new_with_raw_value(0x30);
        assert_eq!(raw(&training_plan(needs, false)), [0x30]);
        assert!(training_plan(NeedsTraining::none(), true).is_empty());
    }

    #[test]
    fn test_plan_two_rank() {
        let needs = NeedsTraining::new_with_raw_value(0x1FF);
        assert_eq!(
            raw(&training_plan(needs, true)),
            [0x003, 0x103, 0x00C, 0x004, 0x0F0]
        );
        let needs = NeedsTraining::new_with_raw_value(0x8);
        assert_eq!(raw(&training_plan(needs, true)), [0x8, 0x0]);
    }

    #[test]
    fn test_plan_fills_capacity() {
        let plan = training_plan(NeedsTraining::new_with_raw_value(0x3FF), true);
        assert_eq!(plan.len(), MAX_TRAINING_PASSES);
        assert!(plan.is_full());
        assert!(plan.iter().all(|pass| pass.in_self_refresh()));
    }

    #[test]
    fn test_training_cmd() {
        let needs = NeedsTraining::none().with_ca(true).with_ca_vref(true);
        assert_eq!(needs.training_cmd().raw_value(), 0x8000_0022);
        let needs = NeedsTraining::new_with_raw_value(0xFF);
        assert_eq!(needs.training_cmd().raw_value(), 0x8000_01FE);
        assert!(needs.tristate());
        assert!(!NeedsTraining::none().with_swap_rank(true).tristate());
    }

    fn pair() -> (OperatingPoint, OperatingPoint) {
        let src = operating_point(204_000, 0x4000_0000, DramType::Lpddr4, true);
        let mut dst = operating_point(1_600_000, 0x8000_0000, DramType::Lpddr4, true);
        dst.needs_training = NeedsTraining::none()
            .with_ca(true)
            .with_ca_vref(true)
            .raw_value();
        (src, dst)
    }

    #[test]
    fn test_ca_training_single_rank() {
        let (src, mut dst) = pair();
        let dq = [0x5A5A_5A5A; 512];
        let dmi = [0xFF; 512];
        let patterns = TrainingPatterns::new(&dq, &dmi);
        let mut bus = SimBus::lpddr4(false, true);
        let mut delay = NoDelay::default();
        let config = Config::new();
        let mut session = Session::new();
        let mut seq = Sequencer::new(&mut bus, &mut delay, &config, &mut session);

        seq.train_patterns(&src, &mut dst, false, 0x8000_0000, &patterns)
            .unwrap();
        assert!(dst.trained);
        assert_eq!(bus.writes_to(Block::Car, car::CLK_SOURCE_EMC).len(), 1);
        let cmd = bus.queued_to(emc::TRAINING_CMD);
        assert_eq!(cmd.len(), 1);
        assert_eq!(cmd[0].value, 0x8000_0022);
        assert_eq!(bus.writes_to(Block::Emc, emc::TRAINING_PATRAM_DMI)[0], 0xF);
    }

    #[test]
    fn test_trained_entry_only_switches() {
        let (src, mut dst) = pair();
        dst.trained = true;
        let patterns = TrainingPatterns::new(&[], &[]);
        let mut bus = SimBus::lpddr4(true, true);
        let mut delay = NoDelay::default();
        let config = Config::new();
        let mut session = Session::new();
        let mut seq = Sequencer::new(&mut bus, &mut delay, &config, &mut session);

        seq.train_patterns(&src, &mut dst, true, 0x8000_0000, &patterns)
            .unwrap();
        assert_eq!(bus.writes_to(Block::Car, car::CLK_SOURCE_EMC).len(), 1);
        assert!(bus.queued_to(emc::TRAINING_CMD).is_empty());
    }

    #[test]
    fn test_patterns_load_once() {
        let (src, mut dst) = pair();
        let patterns = TrainingPatterns::new(&[], &[]);
        let mut bus = SimBus::lpddr4(false, false);
        let mut delay = NoDelay::default();
        let config = Config::new();
        let mut session = Session::new();

        let mut seq = Sequencer::new(&mut bus, &mut delay, &config, &mut session);
        seq.train_patterns(&src, &mut dst, false, 0x8000_0000, &patterns)
            .unwrap();
        let mut seq = Sequencer::new(&mut bus, &mut delay, &config, &mut session);
        seq.train_patterns(&src, &mut dst, false, 0x8000_0000, &patterns)
            .unwrap();
        assert_eq!(bus.patram_writes, PATTERN_WORDS as u32);
        assert!(session.patterns_loaded);
        assert_eq!(bus.peek(Block::Emc, emc::TRAINING_PATRAM_DQ), 0);
    }
}
