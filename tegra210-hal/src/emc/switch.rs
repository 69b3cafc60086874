//! The clock change sequence.
//!
//! One call moves the controller from the source operating point to the destination operating
//! point, or runs one training pass at the destination rate and falls back to the source clock.
//! Most of the sequence is queued into the command clock FIFO, which the hardware drains
//! around the clock switch. The clock source write and the bookkeeping after it run live.
use embedded_hal::delay::DelayNs;
use tegra210::{
    car,
    emc::{
        self, BURST_REGS, BURST_REGS_PER_CH, DramType, FbioCfg5, TRAINING_MOD_REGS, TRIM_REGS,
        TRIM_REGS_PER_CH, VREF_REGS_PER_CH, status,
    },
    mc::BURST_MC_REGS,
};

use super::{
    Error,
    clktree::CompensationSequence,
    regs::{Channel, Sequencer, WarnOnTimeout, round_cycles},
    table::{OperatingPoint, burst},
    training::NeedsTraining,
    trimmer::{compensated_trim, is_compensated},
};
use crate::bus::{Block, RegisterBus};

/// `AUTO_CAL_CONFIG2` to `AUTO_CAL_CONFIG8`.
const AUTO_CAL_CONFIG_REGS: [u32; 7] = [
    emc::AUTO_CAL_CONFIG2,
    emc::AUTO_CAL_CONFIG3,
    emc::AUTO_CAL_CONFIG4,
    emc::AUTO_CAL_CONFIG5,
    emc::AUTO_CAL_CONFIG6,
    emc::AUTO_CAL_CONFIG7,
    emc::AUTO_CAL_CONFIG8,
];

/// Clock cycles covering `ns` at `period`, truncated.
#[inline]
fn cycles(ns: f32, period: f32) -> u32 {
    (ns / period) as u32
}

/// Per-channel register at `offset` belongs to an enabled channel.
#[inline]
fn channel_enabled(offset: u32, ch1: bool) -> bool {
    ch1 || !(emc::CH1_OFFSET..emc::CH1_OFFSET + 0x1000).contains(&offset)
}

/// Burst registers only programmed on LPDDR4.
#[inline]
fn lpddr4_only(offset: u32) -> bool {
    matches!(
        offset,
        emc::MRW6
            | emc::MRW7
            | emc::MRW8
            | emc::MRW9
            | emc::MRW14
            | emc::MRW15
            | emc::TRAINING_CTRL
    )
}

/// Per-channel mode registers only programmed on LPDDR4.
#[inline]
fn lpddr4_only_per_ch(offset: u32) -> bool {
    matches!(offset & 0xFFF, emc::MRW10 | emc::MRW11 | emc::MRW13)
}

/// Operate from the set point in `op` with the data bus termination off.
#[inline]
const fn exit_flip(op: u32) -> u32 {
    (op & 0xF3FF_FFF7) | 0xC00_0000
}

/// Precharge timings, optionally with the read/write to precharge margins patched in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrechargeTimings {
    pub rp: u32,
    pub r2p: u32,
    pub w2p: u32,
    pub trpab: u32,
}

impl PrechargeTimings {
    pub fn of(entry: &OperatingPoint) -> Self {
        Self {
            rp: entry.burst[burst::RP],
            r2p: entry.burst[burst::R2P],
            w2p: entry.burst[burst::W2P],
            trpab: entry.burst[burst::TRPAB],
        }
    }

    /// LPDDR4 timings for `src` which keep read and write to precharge safe while the clock
    /// changes.
    ///
    /// `R2P` and `W2P` are 6-bit fields. When a margin does not fit, the excess moves into
    /// `RP` and `TRPAB` is raised to match.
    pub fn patched(src: &OperatingPoint, src_period: f32) -> Self {
        let orig = Self::of(src);
        let n_rtp = match src_period {
            p if p < 0.535_905_7 => 16,
            p if p < 0.625 => 14,
            p if p < 0.750_187_5 => 12,
            p if p < 0.938_086_3 => 10,
            _ => 8,
        };
        let t_rpst = ((src.mrw >> 7) & 1) as f32 + 0.5;
        let delta_twatm = round_cycles(7.5 / src_period).max(8) as u32;
        let t_rtm = round_cycles(
            src.timings.rl as f32
                + round_cycles(3.6 / src_period) as f32
                + delta_twatm as f32
                + t_rpst
                + n_rtp as f32,
        ) as u32;

        let mut war = orig;
        if t_rtm > orig.rp + orig.r2p {
            war.r2p = t_rtm - orig.rp;
            if war.r2p > 63 {
                war.rp = t_rtm - 63;
                war.r2p = 63;
                war.trpab = orig.trpab.max(t_rtm - 63);
            }
        }

        if war.rp < delta_twatm {
            let w2p = delta_twatm + orig.w2p;
            war.w2p = w2p - war.rp;
            if war.w2p > 63 {
                war.rp = w2p - 63;
                war.w2p = 63;
                war.trpab = war.trpab.max(war.rp);
            }
        }
        war
    }
}

/// Mode register 13 values for moving between the two frequency set points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FspFlip {
    /// Selects the set point the DRAM operates from.
    pub op: u32,
    /// Selects the set point mode register writes land in.
    pub wr: u32,
    /// Enables command bus training.
    pub catr: u32,
}

impl FspFlip {
    pub fn new(mrw3: u32, fsp: bool, needs: NeedsTraining, two_rank: bool) -> Self {
        let (mut op, wr) = if fsp {
            (mrw3 | 0xC0, (mrw3 & !0xC0) | 0x40)
        } else {
            let op = mrw3 & !0xC0;
            (op, op | 0x80)
        };
        let swap = needs.swap_rank();
        let catr = if two_rank {
            if needs.ca_any() {
                op = (op & 0x3FFF_FFFF) | if swap { 0x8000_0000 } else { 0x4000_0000 };
            }
            (wr & 0x3FFF_FFFF) | if swap { 0x4000_0001 } else { 0x8000_0001 }
        } else {
            wr | 1
        };
        Self { op, wr, catr }
    }
}

/// Everything derived up front for one clock change, plus the values captured on the way.
struct Transition {
    needs: NeedsTraining,
    tristate: bool,
    ca: bool,
    swap: bool,
    lpddr4: bool,
    lpddr2: bool,
    ddr3: bool,
    lpddr3: bool,
    two_rank: bool,
    ch1: bool,
    zcal_shared: bool,
    opt_zcal: bool,
    opt_dll_mode: bool,
    enable_bg: bool,
    bg_change: bool,
    src_period: f32,
    dst_period: f32,
    /// ZQ calibration time in destination clocks, less the FIFO flush on fast sources.
    zq_cal_clocks: i32,
    fsp: FspFlip,

    dbg: u32,
    pin: u32,
    pipe_clk: u32,
    /// `DBG` value the command FIFO runs with.
    dbg_val: u32,
    compensate: bool,
    ramp_down_wait: u32,
    ramp_up_wait: u32,
    in_self_refresh: bool,
}

impl Transition {
    /// Bias control value holding the regulator that is about to change.
    #[inline]
    fn bg_bias_hold(&self, value: u32) -> u32 {
        if self.enable_bg { value & !1 } else { value & !4 }
    }

    #[inline]
    fn bg_bias_final(&self, value: u32) -> u32 {
        if self.enable_bg { value & !4 } else { value & !1 }
    }

    #[inline]
    fn src_cycles(&self, ns: f32) -> u32 {
        cycles(ns, self.src_period)
    }

    #[inline]
    fn dst_cycles(&self, ns: f32) -> u32 {
        cycles(ns, self.dst_period)
    }
}

impl<B: RegisterBus, D: DelayNs> Sequencer<'_, B, D> {
    /// Switch the EMC clock from `src` to `dst`, or run the training pass `needs` at the
    /// rate of `dst`.
    ///
    /// `clk_src_emc` is the `CLK_SOURCE_EMC` value selecting the destination clock. Training
    /// results end up in `dst`, as do the clock tree delays measured when `dst` has periodic
    /// training enabled.
    ///
    /// Returns [Error::ClockChangeTimeout] if the clock change handshake does not complete
    /// and [Error::TimingUpdateTimeout] if the latency allowance update after an upward
    /// switch does not latch.
    pub(crate) fn clock_change(
        &mut self,
        src: &OperatingPoint,
        dst: &mut OperatingPoint,
        needs: NeedsTraining,
        clk_src_emc: u32,
    ) -> Result<(), Error> {
        log::debug!(
            "clock change {} kHz -> {} kHz, training {:#x}",
            src.rate_khz,
            dst.rate_khz,
            needs.raw_value()
        );
        let mut t = self.transition(src, dst, needs);

        self.pre_switch(src, dst, &mut t)?;
        self.prepare_destination(src, dst, &t, clk_src_emc)?;
        self.program_shadow(src, dst, &t);
        self.enter_self_refresh(src, dst, &mut t);
        self.exit_self_refresh(src, dst, &t);
        self.restore_queued(src, dst, &t);
        self.switch_clock(src, dst, &t, clk_src_emc)?;
        self.post_switch(src, dst, &t)
    }

    fn transition(
        &mut self,
        src: &OperatingPoint,
        dst: &OperatingPoint,
        needs: NeedsTraining,
    ) -> Transition {
        let dram = self.dram_type();
        let two_rank = self.device_count() == 2;
        let src_period = src.period_ns();
        let dst_period = dst.period_ns();

        self.session.fsp_for_src_freq = !self.session.fsp_for_src_freq;

        let lpddr4 = dram == DramType::Lpddr4;
        let lpddr2 = dram == DramType::Lpddr2;
        let ddr3 = dram == DramType::Ddr3;
        let bg = src.burst[burst::BG_BIAS_CTRL_0] ^ dst.burst[burst::BG_BIAS_CTRL_0];
        let zq_cal_ns = if src_period <= 2.0 {
            1000u32.wrapping_sub(dst.timings.t_fc_lpddr4) as f32
        } else {
            1000.0
        };

        Transition {
            needs,
            tristate: needs.tristate(),
            ca: needs.ca_any(),
            swap: needs.swap_rank(),
            lpddr4,
            lpddr2,
            ddr3,
            lpddr3: lpddr2 && FbioCfg5::new_with_raw_value(dst.burst[burst::FBIO_CFG5]).lpddr3(),
            two_rank,
            ch1: src.channel1_enabled(),
            zcal_shared: src.burst[burst::ZCAL_WAIT_CNT] & 0x8000_0000 != 0,
            opt_zcal: (dst.burst[burst::ZCAL_INTERVAL] != 0
                && src.burst[burst::ZCAL_INTERVAL] == 0)
                || lpddr4,
            opt_dll_mode: ddr3 && dst.emrs & 1 == 0,
            enable_bg: dst.burst[burst::BG_BIAS_CTRL_0] & 1 == 0,
            bg_change: (bg | (bg >> 2)) & 1 != 0,
            src_period,
            dst_period,
            zq_cal_clocks: (zq_cal_ns / dst_period) as i32,
            fsp: FspFlip::new(dst.mrw3, self.session.fsp_for_src_freq, needs, two_rank),
            dbg: 0,
            pin: 0,
            pipe_clk: 0,
            dbg_val: 0,
            compensate: false,
            ramp_down_wait: 0,
            ramp_up_wait: 0,
            in_self_refresh: false,
        }
    }

    /// Quiesce the power features, measure clock tree drift and prepare the pads.
    fn pre_switch(
        &mut self,
        src: &OperatingPoint,
        dst: &mut OperatingPoint,
        t: &mut Transition,
    ) -> Result<(), Error> {
        t.dbg = self.read(emc::DBG);
        t.pin = self.read(emc::PIN);
        let cfg = dst.burst[burst::CFG] & 0x0FFF_FFFF;
        let sel_dpd = dst.sel_dpd_ctrl & 0xFFFF_FEC3;
        t.pipe_clk = self.read(emc::CFG_PIPE_CLK);
        self.dll_disable()?;

        // Auto calibration stays off until the destination settings are in place.
        self.write(emc::AUTO_CAL_CONFIG, (dst.auto_cal_config[0] & 0x7FFF_F9FF) | 0x600);
        self.write(emc::DBG, t.dbg | 2);
        self.write(emc::CFG, cfg);
        self.write(emc::SEL_DPD_CTRL, sel_dpd);
        self.write(emc::DBG, t.dbg);

        if !t.tristate && dst.periodic_training {
            let powerdown = if t.two_rank {
                status::IN_POWERDOWN_MASK
            } else {
                status::IN_POWERDOWN_DEV0
            };
            self.wait_status_both(t.ch1, emc::EMC_STATUS, powerdown, false)
                .or_warn("power down exit");
            self.wait_status_both(t.ch1, emc::EMC_STATUS, status::IN_SELF_REFRESH_MASK, false)
                .or_warn("self refresh exit");

            dst.clock_tree.current = dst.clock_tree.trained;
            let adel = self.periodic_compensation_handler(
                src,
                dst,
                t.two_rank,
                t.ch1,
                CompensationSequence::Dvfs,
            );
            t.compensate = (dst.rate_mhz().raw() << 7).wrapping_mul(adel) / 1_000_000 > dst.tree_margin;
            log::debug!("clock tree drift {}, compensating trims: {}", adel, t.compensate);
        }

        self.write(emc::INTSTATUS, emc::CLKCHANGE_COMPLETE_INT);
        self.write(emc::DBG, t.dbg | 2);
        self.write(emc::CFG, cfg);
        self.write(emc::SEL_DPD_CTRL, sel_dpd);
        self.write(emc::CFG_PIPE_CLK, t.pipe_clk | 1);
        self.write(emc::FDPD_CTRL_CMD_NO_RAMP, dst.fdpd_ctrl_cmd_no_ramp & !1);

        if t.bg_change {
            self.write(emc::DBG, t.dbg | 2);
            self.write(
                emc::PMACRO_BG_BIAS_CTRL_0,
                t.bg_bias_hold(src.burst[burst::BG_BIAS_CTRL_0]),
            );
        }

        // The VREF generator needs a microsecond to settle once switched on.
        let src_dq = src.burst[burst::DATA_PAD_TX_CTRL];
        let dst_dq = dst.burst[burst::DATA_PAD_TX_CTRL];
        let turns_on = |bit: u32| src_dq & bit == 0 && dst_dq & bit != 0;
        if turns_on(0x100) || turns_on(1) {
            self.write(
                emc::PMACRO_DATA_PAD_TX_CTRL,
                (((dst_dq & 1) | (src_dq & !1)) & !0x100) | (dst_dq & 0x100),
            );
            self.delay.delay_us(1);
        } else if t.bg_change {
            self.delay.delay_us(1);
        }
        self.write(emc::DBG, t.dbg);
        Ok(())
    }

    /// Lock or bypass the DLL, stage auto calibration and patch the precharge timings.
    fn prepare_destination(
        &mut self,
        src: &OperatingPoint,
        dst: &OperatingPoint,
        t: &Transition,
        clk_src_emc: u32,
    ) -> Result<(), Error> {
        if dst.dll_enabled() {
            self.dll_prelock(dst, t.tristate, clk_src_emc)?;
        } else {
            self.change_dll_src(dst, clk_src_emc);
            self.dll_disable()?;
        }

        let acc = &dst.auto_cal_config;
        self.write(emc::AUTO_CAL_CONFIG, (acc[0] & 0x7FFF_F9FF) | 0x600);
        self.write(emc::DBG, t.dbg | 2);
        for (offset, value) in AUTO_CAL_CONFIG_REGS.into_iter().zip(acc[1..].iter().copied()) {
            self.write(offset, value);
        }
        self.write(emc::DBG, t.dbg);
        self.write(emc::AUTO_CAL_CONFIG, (acc[0] & 0x7FFF_F9FE) | 0x601);

        if t.src_period <= 50.0 || !t.lpddr4 {
            self.write(emc::CFG_2, dst.cfg_2);
        } else {
            self.ccfifo(emc::SELF_REF, 1, 0);
        }

        if t.ca && t.two_rank {
            self.write(emc::PIN, 0x107);
        }

        if t.lpddr4 {
            let orig = PrechargeTimings::of(src);
            let war = PrechargeTimings::patched(src, t.src_period);
            if war != orig {
                log::debug!("precharge timings patched to {:?}", war);
                self.write(emc::DBG, t.dbg | 2);
                self.write(emc::RP, war.rp);
                self.write(emc::R2P, war.r2p);
                self.write(emc::W2P, war.w2p);
                self.write(emc::TRPAB, war.trpab);
                self.write(emc::DBG, t.dbg);
                self.delay.delay_us(1);
            }

            self.write(emc::MRW3, t.fsp.wr);
            self.write(emc::MRW, dst.mrw);
            self.write(emc::MRW2, dst.mrw2);
        }
        Ok(())
    }

    /// Write the destination (or training shadow) images into the shadow registers.
    fn program_shadow(&mut self, src: &OperatingPoint, dst: &mut OperatingPoint, t: &Transition) {
        let needs = t.needs;
        let image = if !t.tristate {
            Some(&dst.burst)
        } else if t.ca {
            Some(&dst.shadow_ca)
        } else if needs.quse_any() {
            Some(&dst.shadow_quse)
        } else if needs.rdwr_any() {
            Some(&dst.shadow_rdwr)
        } else {
            None
        };

        if let Some(image) = image {
            for (&offset, &value) in BURST_REGS.iter().zip(image.iter()) {
                if offset == emc::CFG {
                    let mask = if t.lpddr4 { 0x0FFF_FFFF } else { 0xCFFF_FFFF };
                    self.write(offset, value & mask);
                    continue;
                }
                if lpddr4_only(offset) && !t.lpddr4 {
                    continue;
                }
                let value = match offset {
                    emc::ZCAL_INTERVAL if t.opt_zcal => 0,
                    emc::PMACRO_AUTOCAL_CFG_COMMON => value | 0x1_0000,
                    emc::PMACRO_DATA_PAD_TX_CTRL => value & 0xFEFE_FDFD,
                    emc::PMACRO_CMD_PAD_TX_CTRL => (value & 0xFAFE_FDFD) | 0x400_0000,
                    emc::PMACRO_BRICK_CTRL_RFU1 => value & 0xF800_F800,
                    emc::PMACRO_COMMON_PAD_TX_CTRL => value & 0xFFFF_FFF0,
                    emc::TRAINING_CTRL => value | ((t.swap as u32) << 14),
                    _ => value,
                };
                self.write(offset, value);
            }
        }

        let run_clocks = if t.tristate { src.run_clocks } else { dst.run_clocks };
        self.write(emc::MRW, (run_clocks & 0xFF) | 0x17_0000);

        for (&offset, &value) in BURST_REGS_PER_CH.iter().zip(dst.burst_per_ch.iter()) {
            if (t.lpddr4 || !lpddr4_only_per_ch(offset)) && channel_enabled(offset, t.ch1) {
                self.write(offset, value);
            }
        }
        for (&offset, &value) in VREF_REGS_PER_CH.iter().zip(dst.vref_per_ch.iter()) {
            if channel_enabled(offset, t.ch1) {
                self.write(offset, value);
            }
        }
        if t.tristate {
            for (&offset, &value) in TRAINING_MOD_REGS.iter().zip(dst.training_mod.iter()) {
                if channel_enabled(offset, t.ch1) {
                    self.write(offset, value);
                }
            }
        }

        for (&offset, &value) in TRIM_REGS.iter().zip(dst.trim.iter()) {
            let value = if t.compensate && is_compensated(offset) {
                compensated_trim(dst, offset)
            } else {
                value
            };
            self.write(offset, value);
        }
        for (&offset, &value) in TRIM_REGS_PER_CH.iter().zip(dst.trim_per_ch.iter()) {
            if !channel_enabled(offset, t.ch1) {
                continue;
            }
            let value = if t.compensate && is_compensated(offset & 0xFFF) {
                compensated_trim(dst, offset & 0xFFF)
            } else {
                value
            };
            self.write(offset, value);
        }

        if t.tristate {
            if needs.wr() && dst.periodic_training {
                self.periodic_compensation_handler(
                    src,
                    dst,
                    t.two_rank,
                    t.ch1,
                    CompensationSequence::WriteTraining,
                );
            }
        } else {
            for (&offset, &value) in BURST_MC_REGS.iter().zip(dst.burst_mc.iter()) {
                self.write_block(Block::Mc, offset, value);
            }
        }

        // Downward switches lower the latency allowances before the clock changes.
        if dst.rate_khz < src.rate_khz && !t.tristate {
            for (offset, value) in dst.la_scale_values() {
                self.write_block(Block::Mc, offset, value);
            }
        }

        if t.lpddr4 {
            let interval = src.burst[burst::ZCAL_INTERVAL] & 0xFF00_0000;
            self.write(emc::ZCAL_INTERVAL, interval);
            self.write(emc::ZCAL_WAIT_CNT, dst.burst[burst::ZCAL_WAIT_CNT] & 0xFFFF_F800);
            self.write(emc::DBG, t.dbg | 0x4000_0002);
            self.write(emc::ZCAL_INTERVAL, interval);
            self.write(emc::DBG, t.dbg);

            if t.tristate {
                self.write(emc::DBG, t.dbg | 2);
                self.write(
                    emc::PMACRO_AUTOCAL_CFG_COMMON,
                    dst.burst[burst::AUTOCAL_CFG_COMMON] | 0x1_0000,
                );
                if t.ca {
                    self.write(emc::FBIO_CFG5, src.burst[burst::FBIO_CFG5] | 0x800_0000);
                }
                self.write(emc::DBG, t.dbg);
                if t.ch1 {
                    self.ccfifo(emc::CFG_SYNC, 0, 0);
                }
                self.ccfifo(emc::DBG, (t.dbg & 0xF3FF_FFFF) | 0x400_0000, 0);
            }
        }
    }

    /// Queue self refresh entry, the pad ramps around the clock stop and the CKE bring-up.
    fn enter_self_refresh(&mut self, src: &OperatingPoint, dst: &OperatingPoint, t: &mut Transition) {
        let mut self_ref = 1;
        if t.ddr3 && !t.opt_dll_mode {
            self.ccfifo(emc::EMRS, dst.emrs, 0);
        } else if t.lpddr4 {
            self_ref = 0x101;
        }
        self.ccfifo(emc::SELF_REF, self_ref, 0);

        // Fast sources preload the destination set point before the clock stops.
        if !t.ca && t.src_period <= 2.0 && t.lpddr4 {
            let merge = |index: usize, keep: u32, take: u32| {
                (src.burst[index] & keep) | (dst.burst[index] & take)
            };
            self.ccfifo(emc::MRW3, t.fsp.wr ^ 0x40, 0);
            self.ccfifo(emc::MRW6, merge(burst::MRW6, 0xC0C0, 0xFFFF_3F3F), 0);
            self.ccfifo(emc::MRW14, merge(burst::MRW14, 0x3838, 0xFFFF_0707), 0);
            if t.two_rank {
                self.ccfifo(emc::MRW7, merge(burst::MRW7, 0xC0C0, 0xFFFF_3F3F), 0);
                self.ccfifo(emc::MRW15, merge(burst::MRW15, 0x3838, 0xFFFF_0707), 0);
            }
            if t.opt_zcal {
                let zq = if !t.two_rank || t.zcal_shared { 0x8000_0001 } else { 1 };
                self.ccfifo(emc::ZQ_CAL, zq, 0);
            }
        }

        t.dbg_val = t.dbg;
        let t_rp = src.timings.t_rp as f32 / t.src_period;
        let t_rfc = src.timings.t_rfc as f32 / t.src_period;
        if t.lpddr4 {
            if t.tristate {
                t.dbg_val = (t.dbg & 0xF3FF_FFFF) | 0x4400_0000;
                self.ccfifo(emc::DBG, t.dbg_val, 0);
            }
            let ref_delay = if t.ca {
                self.ccfifo(
                    emc::PMACRO_DATA_RX_TERM_MODE,
                    src.burst[burst::DATA_RX_TERM_MODE] & 0xFFFF_FCCC,
                    0,
                );
                if t.two_rank && t.swap {
                    self.ccfifo(emc::MRW3, t.fsp.op | 8, t_rp as u32);
                    self.ccfifo(emc::MRW3, t.fsp.catr | 8, 0);
                } else {
                    self.ccfifo(emc::MRW3, t.fsp.catr | 8, t_rp as u32);
                }
                self.ccfifo(emc::TR_CTRL_0, 0x15A, 0);
                t.src_cycles(1000.0)
            } else {
                self.ccfifo(emc::MRW3, t.fsp.op | 8, t_rp as u32);
                t.src_cycles(dst.timings.t_fc_lpddr4 as f32)
            };
            self.ccfifo(emc::INTSTATUS, 0, ref_delay);
            self.ccfifo(emc::PIN, t.pin & !7, 30);
        } else {
            t.in_self_refresh = true;
            self.ccfifo(emc::SELF_REF, 1, 0);
        }

        let sync_delay = if t.lpddr4 { 0 } else { (t_rp + t_rfc + 20.0) as u32 };
        self.ccfifo(emc::CFG_SYNC, 0, sync_delay);
        self.ccfifo(emc::DBG, t.dbg_val | 0x4000_0002, 0);
        t.ramp_down_wait = self.ramp_down(false, src, dst, t.src_period);

        self.ccfifo(emc::STALL_THEN_EXE_AFTER_CLKCHANGE, 1, 0);
        if !t.tristate {
            self.ccfifo(emc::DBG, (t.dbg_val & 0xBFFF_FFFF) | 2, 0);
        }

        t.ramp_up_wait = self.ramp_up(false, src, dst, t.needs, t.dst_period);
        self.ccfifo(emc::DBG, t.dbg_val, 0);

        if t.lpddr4 {
            let pin = if t.ca {
                let ranks = match (t.two_rank, t.swap) {
                    (false, _) => 0,
                    (true, true) => 5,
                    (true, false) => 6,
                };
                (t.pin & !7) | ranks
            } else if t.two_rank {
                t.pin | 7
            } else {
                (t.pin & !7) | 1
            };
            self.ccfifo(emc::PIN, pin, 0);
        }
        log::debug!(
            "ramp down {} ns, ramp up {} ns",
            t.ramp_down_wait,
            t.ramp_up_wait
        );
    }

    /// Queue the ZQ latch, then the training kick-off or the legacy self refresh exit, then
    /// the bias regulator switch.
    fn exit_self_refresh(&mut self, src: &OperatingPoint, dst: &OperatingPoint, t: &Transition) {
        if t.lpddr4 && !t.ca && t.opt_zcal {
            self.zq_latch(dst, t);
        }
        self.ccfifo(emc::INTSTATUS, 0, 10);

        if t.tristate && t.lpddr4 {
            self.kick_training(src, dst, t);
        } else if !t.lpddr4 {
            self.legacy_self_refresh_exit(dst, t);
        }

        if t.bg_change {
            self.ccfifo(emc::DBG, t.dbg | 2, 0);
            if t.tristate {
                self.ccfifo(
                    emc::PMACRO_BG_BIAS_CTRL_0,
                    src.burst[burst::BG_BIAS_CTRL_0],
                    t.src_cycles(1250.0),
                );
            } else {
                let wait = if t.ramp_up_wait <= 1250 {
                    t.dst_cycles((1250 - t.ramp_up_wait) as f32)
                } else {
                    0
                };
                self.ccfifo(emc::PMACRO_BG_BIAS_CTRL_0, dst.burst[burst::BG_BIAS_CTRL_0], wait);
            }
            self.ccfifo(emc::DBG, t.dbg, 0);
        }
    }

    fn zq_latch(&mut self, dst: &OperatingPoint, t: &Transition) {
        let slow_source = t.src_period > 2.0;
        let pdex = round_cycles(dst.timings.t_pdex as f32 / t.dst_period);
        let mut wait = if slow_source {
            t.zq_cal_clocks - pdex
        } else {
            let flush = (t.ramp_up_wait + t.ramp_down_wait) as f32;
            t.zq_cal_clocks - (flush / t.dst_period) as i32
        };
        let flip = exit_flip(t.fsp.op);

        let zq = if !t.two_rank {
            let pdex = pdex.max(0) as u32;
            if slow_source {
                self.ccfifo(emc::ZQ_CAL, 0x8000_0001, pdex);
            }
            if !t.tristate {
                self.ccfifo(emc::MRW3, flip, pdex);
                self.ccfifo(emc::SELF_REF, 0x100, 0);
                self.ccfifo(emc::REF, 0, 0);
            }
            wait = wait.max(0);
            0x8000_0002
        } else if t.zcal_shared {
            if slow_source {
                self.ccfifo(emc::ZQ_CAL, 0x8000_0001, pdex.max(0) as u32);
            }
            self.ccfifo(emc::ZQ_CAL, 0x8000_0002, (wait + pdex).max(0) as u32);
            self.ccfifo(emc::ZQ_CAL, 0x4000_0001, 0);
            if !t.tristate {
                self.ccfifo(emc::MRW3, flip, 0);
                self.ccfifo(emc::SELF_REF, 0x100, 0);
                self.ccfifo(emc::REF, 0, 0);
            }
            wait = (1000.0 / t.dst_period) as i32;
            0x4000_0002
        } else {
            let pdex = pdex.max(0) as u32;
            if slow_source {
                self.ccfifo(emc::ZQ_CAL, 1, pdex);
            }
            if !t.tristate {
                self.ccfifo(emc::MRW3, flip, pdex);
                self.ccfifo(emc::SELF_REF, 0x100, 0);
                self.ccfifo(emc::REF, 0, 0);
            }
            wait = wait.max(0);
            2
        };
        self.ccfifo(emc::ZQ_CAL, zq, wait as u32);
    }

    /// Queue the training command and the switch back to the source clock once it is done.
    fn kick_training(&mut self, src: &OperatingPoint, dst: &OperatingPoint, t: &Transition) {
        let cmd = t.needs.training_cmd().raw_value();
        log::debug!("queueing training command {:#x}", cmd);
        let src_us = t.src_cycles(1000.0);
        self.ccfifo(emc::INTSTATUS, 0, t.dst_cycles(1020.0));
        self.ccfifo(emc::TRAINING_CMD, cmd, 0);
        if t.bg_change {
            self.ccfifo(
                emc::PMACRO_BG_BIAS_CTRL_0,
                t.bg_bias_hold(src.burst[burst::BG_BIAS_CTRL_0]),
                0,
            );
        }
        self.ccfifo(emc::SWITCH_BACK_CTRL, 1, 0);
        if !t.ca || t.swap {
            self.ccfifo(emc::MRW3, t.fsp.op ^ 0xC0, 0);
            self.ccfifo(emc::INTSTATUS, 0, t.dst_cycles(1000.0));
        }

        self.ccfifo(emc::PIN, t.pin & !7, 0);
        self.ccfifo(emc::CFG_SYNC, 0, 0);
        self.ccfifo(emc::DBG, t.dbg_val | 0x4000_0002, 0);
        self.ramp_down(true, src, dst, t.dst_period);
        self.ccfifo(emc::STALL_THEN_EXE_AFTER_CLKCHANGE, 1, 0);
        self.ccfifo(emc::DBG, (t.dbg_val & 0xBFFF_FFFF) | 2, 0);
        self.ramp_up(true, src, dst, t.needs, t.src_period);
        self.ccfifo(emc::DBG, t.dbg_val, 0);

        let pin = if t.two_rank { t.pin | 7 } else { (t.pin & !7) | 1 };
        self.ccfifo(emc::PIN, pin, 0);

        if t.ca {
            self.ccfifo(emc::TR_CTRL_0, 0x4A, t.src_cycles(200.0));
            self.ccfifo(emc::TR_CTRL_0, 0x40, src_us);
            self.ccfifo(emc::MRW3, t.fsp.catr & !1, 0);
            self.ccfifo(emc::INTSTATUS, 0, src_us);
            self.ccfifo(
                emc::PMACRO_DATA_RX_TERM_MODE,
                src.burst[burst::DATA_RX_TERM_MODE],
                0,
            );
        }
        self.ccfifo(emc::DBG, t.dbg, 0);

        let back_flip = exit_flip(t.fsp.op ^ 0xC0);
        if t.opt_zcal {
            self.ccfifo(emc::ZQ_CAL, 0x8000_0001, 0);
            self.ccfifo(emc::ZQ_CAL, 0x8000_0002, src_us);

            if t.two_rank && t.zcal_shared {
                if !t.ca || t.swap {
                    self.ccfifo(emc::ZQ_CAL, 0x4000_0001, 0);
                    self.ccfifo(emc::ZQ_CAL, 0x4000_0002, src_us);
                    if !t.ca {
                        self.ccfifo(emc::MRW3, back_flip, 0);
                    }
                }
                self.ccfifo(emc::SELF_REF, 0x100, 0);
                return;
            } else if t.two_rank {
                if t.ca && !t.swap {
                    self.ccfifo(emc::SELF_REF, 0x100, 0);
                    return;
                }
                self.ccfifo(emc::ZQ_CAL, 0x4000_0001, 0);
                self.ccfifo(emc::ZQ_CAL, 0x4000_0002, src_us);
            }
        }

        if !t.ca {
            self.ccfifo(emc::MRW3, back_flip, 0);
        }
        self.ccfifo(emc::SELF_REF, 0x100, 0);
    }

    /// Manual self refresh exit and mode register programming for DDR3 and LPDDR2/LPDDR3.
    fn legacy_self_refresh_exit(&mut self, dst: &OperatingPoint, t: &Transition) {
        self.ccfifo(emc::SELF_REF, 0, 0);

        if !t.lpddr2 {
            if t.ddr3 {
                if t.opt_dll_mode {
                    self.ccfifo(emc::EMRS, dst.emrs & 0xFBFF_FFFF, 0);
                }
                self.ccfifo(emc::EMRS2, dst.emrs2 & 0xFBFF_FFFF, 0);
                self.ccfifo(emc::MRS, dst.mrs | 0x400_0000, 0);
                if t.opt_zcal {
                    self.ccfifo(emc::ZQ_CAL, 0x8000_0001, 0);
                    if t.two_rank {
                        self.ccfifo(emc::ZQ_CAL, 0x4000_0001, 0);
                    }
                }
            }
            return;
        }

        self.ccfifo(emc::MRW2, dst.mrw2, 0);
        self.ccfifo(emc::MRW, dst.mrw, 0);
        if t.lpddr3 {
            self.ccfifo(emc::MRW4, dst.mrw4, 0);
        }

        if t.opt_zcal {
            let wait = round_cycles(90.0 / t.dst_period) as u32;
            self.ccfifo(emc::MRS_WAIT_CNT2, ((wait & 0xB) << 16) | (wait & 0x3FF), 0);
            self.ccfifo(emc::MRW, 0x880A_0056, 0);
            if t.two_rank {
                self.ccfifo(emc::MRW, 0x480A_0056, 0);
            }
        }
    }

    /// Queue the refresh and the restore of the registers parked before the switch.
    fn restore_queued(&mut self, src: &OperatingPoint, dst: &OperatingPoint, t: &Transition) {
        if t.tristate || !t.lpddr4 {
            self.ccfifo(emc::REF, 0, 0);
        }

        self.ccfifo(emc::DBG, t.dbg | 2, 0);
        if t.opt_zcal {
            if t.tristate {
                self.ccfifo(emc::ZCAL_INTERVAL, src.burst[burst::ZCAL_INTERVAL], 0);
            } else if !t.lpddr4 {
                self.ccfifo(emc::ZCAL_INTERVAL, dst.burst[burst::ZCAL_INTERVAL], 0);
            }
        }
        self.ccfifo(emc::CFG, dst.burst[burst::CFG] & 0xEFFF_FFFF, 0);

        if t.tristate && t.lpddr4 {
            self.ccfifo(emc::SEL_DPD_CTRL, src.sel_dpd_ctrl, 0);
        }
        self.ccfifo(emc::DBG, t.dbg, 0);
        self.ccfifo(emc::CFG_PIPE_CLK, t.pipe_clk, 0);
        if t.bg_change {
            self.write(
                emc::PMACRO_BG_BIAS_CTRL_0,
                t.bg_bias_final(dst.burst[burst::BG_BIAS_CTRL_0]),
            );
        }
    }

    /// Write the clock source and wait until the controller drained the command FIFO.
    fn switch_clock(
        &mut self,
        src: &OperatingPoint,
        dst: &mut OperatingPoint,
        t: &Transition,
        clk_src_emc: u32,
    ) -> Result<(), Error> {
        if t.tristate {
            // Training switches back to the clock running now.
            let current = self.read_block(Block::Car, car::CLK_SOURCE_EMC);
            self.write_block(Block::Car, car::CLK_SOURCE_EMC_SAFE, current);
            self.change_dll_src(src, current);
        }
        self.modify(emc::CFG_DIG_DLL, |v| (v & 0xFFFF_FF24) | 0x88);

        self.write_block(Block::Car, car::CLK_SOURCE_EMC, clk_src_emc);
        self.wait_status(Channel::Ch0, emc::INTSTATUS, emc::CLKCHANGE_COMPLETE_INT, true)
            .map_err(|e| {
                log::error!("clock change to {} kHz: {}", dst.rate_khz, e);
                Error::ClockChangeTimeout
            })?;

        if t.tristate {
            let dbg = self.read(emc::DBG);
            self.write(emc::DBG, dbg | 1);
            self.capture_training_results(dst, t.needs, t.two_rank, t.ch1);
            self.write(emc::DBG, dbg);
        }

        // Upward switches raise the latency allowances once the new clock runs.
        if dst.rate_khz > src.rate_khz && !t.tristate {
            for (offset, value) in dst.la_scale_values() {
                self.write_block(Block::Mc, offset, value);
            }
            let dual = self.dual_channel();
            self.timing_update(dual).map_err(|e| {
                log::error!("latency allowance update: {}", e);
                Error::TimingUpdateTimeout
            })?;
        }
        Ok(())
    }

    /// Restore the live registers, then re-enable the DLL and auto calibration.
    fn post_switch(
        &mut self,
        src: &OperatingPoint,
        dst: &OperatingPoint,
        t: &Transition,
    ) -> Result<(), Error> {
        if !t.in_self_refresh {
            self.write(emc::DBG, t.dbg | 2);
            self.write(emc::ZCAL_WAIT_CNT, dst.burst[burst::ZCAL_WAIT_CNT]);
            self.write(emc::ZCAL_INTERVAL, dst.burst[burst::ZCAL_INTERVAL]);
            self.write(emc::DBG, t.dbg);
        }

        self.write(emc::DBG, t.dbg | 2);
        self.write(emc::CFG, dst.burst[burst::CFG]);
        self.write(emc::DBG, t.dbg);
        self.write(emc::FDPD_CTRL_CMD_NO_RAMP, dst.fdpd_ctrl_cmd_no_ramp);
        self.write(emc::SEL_DPD_CTRL, dst.sel_dpd_ctrl);

        if t.tristate && t.lpddr4 {
            self.write(emc::DBG, t.dbg | 2);
            self.write(emc::CFG, dst.burst[burst::CFG]);
            self.write(emc::SEL_DPD_CTRL, dst.sel_dpd_ctrl);
            self.write(emc::ZCAL_WAIT_CNT, src.burst[burst::ZCAL_WAIT_CNT]);
            self.write(emc::ZCAL_INTERVAL, src.burst[burst::ZCAL_INTERVAL]);
            for (offset, value) in AUTO_CAL_CONFIG_REGS
                .into_iter()
                .zip(src.auto_cal_config[1..].iter().copied())
            {
                self.write(offset, value);
            }
            self.write(emc::DBG, t.dbg);
            self.write(emc::TR_DVFS, dst.burst[burst::TR_DVFS] & !1);
        }

        self.write(emc::DBG, t.dbg | 2);
        self.write(
            emc::PMACRO_AUTOCAL_CFG_COMMON,
            dst.burst[burst::AUTOCAL_CFG_COMMON],
        );
        self.write(emc::DBG, t.dbg);

        // Power fix for the training write pointer.
        self.write(emc::PMACRO_CFG_PM_GLOBAL_0, 0xFF_0000);
        self.write(emc::PMACRO_TRAINING_CTRL_0, emc::CH0_TRAINING_E_WRPTR);
        self.write(emc::PMACRO_TRAINING_CTRL_1, emc::CH0_TRAINING_E_WRPTR);
        self.write(emc::PMACRO_CFG_PM_GLOBAL_0, 0);

        if t.tristate {
            self.write(emc::AUTO_CAL_CONFIG, src.auto_cal_config[0]);
            // The pass ended on the source clock, so the set point is back where it was.
            self.session.fsp_for_src_freq = !self.session.fsp_for_src_freq;
        } else {
            if dst.dll_enabled() {
                self.dll_enable_rs(t.ch1)?;
            }
            self.write(emc::AUTO_CAL_CONFIG, dst.auto_cal_config[0]);
        }
        log::debug!("clock change to {} kHz done", dst.rate_khz);
        Ok(())
    }
}
