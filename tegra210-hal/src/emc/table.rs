//! Rate table model.
//!
//! Every [OperatingPoint] holds the register images needed to run the DRAM at one frequency.
//! The images are positional: element `i` of an image is written to element `i` of the matching
//! address table in [tegra210::emc] or [tegra210::mc].
use tegra210::{
    emc::{
        self, BURST_REGS, BURST_REGS_PER_CH, DramType, FbioCfg5, FbioCfg7, TRIM_REGS,
        TRIM_REGS_PER_CH, find_in_table, table_index,
    },
    mc::LA_SCALE_REGS,
};

use crate::time::{KiloHertz, MegaHertz};

/// Burst image positions of the registers the sequencer reads individually.
pub mod burst {
    use super::*;

    pub const CFG: usize = table_index(&BURST_REGS, emc::CFG);
    pub const RP: usize = table_index(&BURST_REGS, emc::RP);
    pub const R2P: usize = table_index(&BURST_REGS, emc::R2P);
    pub const W2P: usize = table_index(&BURST_REGS, emc::W2P);
    pub const TRPAB: usize = table_index(&BURST_REGS, emc::TRPAB);
    pub const FBIO_CFG5: usize = table_index(&BURST_REGS, emc::FBIO_CFG5);
    pub const FBIO_CFG7: usize = table_index(&BURST_REGS, emc::FBIO_CFG7);
    pub const CFG_DIG_DLL: usize = table_index(&BURST_REGS, emc::CFG_DIG_DLL);
    pub const ZCAL_INTERVAL: usize = table_index(&BURST_REGS, emc::ZCAL_INTERVAL);
    pub const ZCAL_WAIT_CNT: usize = table_index(&BURST_REGS, emc::ZCAL_WAIT_CNT);
    pub const DLL_CFG_0: usize = table_index(&BURST_REGS, emc::DLL_CFG_0);
    pub const DLL_CFG_1: usize = table_index(&BURST_REGS, emc::DLL_CFG_1);
    pub const MRW6: usize = table_index(&BURST_REGS, emc::MRW6);
    pub const MRW7: usize = table_index(&BURST_REGS, emc::MRW7);
    pub const MRW14: usize = table_index(&BURST_REGS, emc::MRW14);
    pub const MRW15: usize = table_index(&BURST_REGS, emc::MRW15);
    pub const TR_DVFS: usize = table_index(&BURST_REGS, emc::TR_DVFS);
    pub const BRICK_CTRL_RFU1: usize = table_index(&BURST_REGS, emc::PMACRO_BRICK_CTRL_RFU1);
    pub const BG_BIAS_CTRL_0: usize = table_index(&BURST_REGS, emc::PMACRO_BG_BIAS_CTRL_0);
    pub const DATA_RX_TERM_MODE: usize =
        table_index(&BURST_REGS, emc::PMACRO_DATA_RX_TERM_MODE);
    pub const CMD_PAD_TX_CTRL: usize = table_index(&BURST_REGS, emc::PMACRO_CMD_PAD_TX_CTRL);
    pub const DATA_PAD_TX_CTRL: usize = table_index(&BURST_REGS, emc::PMACRO_DATA_PAD_TX_CTRL);
    pub const COMMON_PAD_TX_CTRL: usize =
        table_index(&BURST_REGS, emc::PMACRO_COMMON_PAD_TX_CTRL);
    pub const AUTOCAL_CFG_COMMON: usize =
        table_index(&BURST_REGS, emc::PMACRO_AUTOCAL_CFG_COMMON);
}

/// Trim image positions used by periodic compensation.
pub mod trim {
    use super::*;

    /// Outbound long DQ delay lines of rank 0 (registers 0 to 3).
    pub const OB_LONG_DQ_RANK0: usize = table_index(&TRIM_REGS, emc::PMACRO_OB_DDLL_LONG_DQ_RANK0_0);
    /// Outbound long DQ delay lines of rank 1 (registers 0 to 3).
    pub const OB_LONG_DQ_RANK1: usize = table_index(&TRIM_REGS, emc::PMACRO_OB_DDLL_LONG_DQ_RANK1_0);

    pub const CH0_DATA_BRLSHFT_0: usize =
        table_index(&TRIM_REGS_PER_CH, emc::CH0_OFFSET + emc::DATA_BRLSHFT_0);
    pub const CH1_DATA_BRLSHFT_0: usize =
        table_index(&TRIM_REGS_PER_CH, emc::CH1_OFFSET + emc::DATA_BRLSHFT_0);
    pub const CH0_DATA_BRLSHFT_1: usize =
        table_index(&TRIM_REGS_PER_CH, emc::CH0_OFFSET + emc::DATA_BRLSHFT_1);
    pub const CH1_DATA_BRLSHFT_1: usize =
        table_index(&TRIM_REGS_PER_CH, emc::CH1_OFFSET + emc::DATA_BRLSHFT_1);
}

/// Index of a clock tree lane in the per-lane arrays.
///
/// Lanes are ordered channel first, then device (rank), then byte lane within the 16-bit
/// channel word.
#[inline]
pub const fn lane(channel: usize, device: usize, byte: usize) -> usize {
    channel * 4 + device * 2 + byte
}

/// DRAM timing parameters in nanoseconds.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DramTimings {
    pub t_rp: u32,
    pub t_fc_lpddr4: u32,
    pub t_rfc: u32,
    pub t_pdex: u32,
    /// Read latency in clock cycles.
    pub rl: u32,
}

/// DQS clock tree delays of one operating point, one value per [lane].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClockTree {
    /// Last accepted estimate.
    pub current: [u32; 8],
    /// Estimate captured when write training last ran at this rate.
    pub trained: [u32; 8],
}

/// Moving average filter state of the clock tree estimator. Averages are scaled by 100.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PeriodicFilter {
    pub movavg: [u32; 8],
    pub dvfs_samples: u32,
    pub write_samples: u32,
    pub movavg_weight: u32,
    /// Bit 0 lets a switch reuse the moving averages of the source rate.
    pub config_ctrl: u32,
}

/// One entry of the rate table.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatingPoint {
    pub rate_khz: u32,
    /// `CLK_SOURCE_EMC` value for this rate.
    pub clk_src_emc: u32,
    /// `CLK_SOURCE_EMC_DLL` value for this rate.
    pub dll_clk_src: u32,
    /// Bit 0 gates the EMC DLL clock.
    pub clk_enb_emc_dll: u32,
    /// Raw [super::training::NeedsTraining] bits.
    pub needs_training: u32,
    /// Selects the 256 word slice of the training pattern RAM contents.
    pub training_pattern: u32,
    pub trained: bool,
    pub periodic_training: bool,
    /// Oscillator run length code for clock tree sampling.
    pub run_clocks: u32,
    /// Clock tree drift (in delay line taps) tolerated before compensation kicks in.
    pub tree_margin: u32,
    pub timings: DramTimings,

    pub mrw: u32,
    pub mrw2: u32,
    pub mrw3: u32,
    pub mrw4: u32,
    pub mrs: u32,
    pub emrs: u32,
    pub emrs2: u32,
    /// `AUTO_CAL_CONFIG` followed by `AUTO_CAL_CONFIG2` to `AUTO_CAL_CONFIG8`.
    pub auto_cal_config: [u32; 8],
    pub cfg_2: u32,
    pub sel_dpd_ctrl: u32,
    pub fdpd_ctrl_cmd_no_ramp: u32,

    pub burst: [u32; 221],
    pub shadow_ca: [u32; 221],
    pub shadow_quse: [u32; 221],
    pub shadow_rdwr: [u32; 221],
    pub burst_per_ch: [u32; 8],
    pub vref_per_ch: [u32; 4],
    pub training_mod: [u32; 20],
    pub trim: [u32; 138],
    pub trim_per_ch: [u32; 10],
    /// Signed (bit 31) VREF adjustments applied when training results are captured.
    pub save_restore_mod: [u32; 12],
    pub burst_mc: [u32; 33],
    pub la_scale: [u32; 24],
    /// Number of valid entries in [Self::la_scale].
    pub num_up_down: usize,

    pub clock_tree: ClockTree,
    pub ptfv: PeriodicFilter,
}

impl OperatingPoint {
    /// Entry with all images cleared.
    pub const fn new(rate_khz: u32) -> Self {
        Self {
            rate_khz,
            clk_src_emc: 0,
            dll_clk_src: 0,
            clk_enb_emc_dll: 0,
            needs_training: 0,
            training_pattern: 0,
            trained: false,
            periodic_training: false,
            run_clocks: 0,
            tree_margin: 0,
            timings: DramTimings {
                t_rp: 0,
                t_fc_lpddr4: 0,
                t_rfc: 0,
                t_pdex: 0,
                rl: 0,
            },
            mrw: 0,
            mrw2: 0,
            mrw3: 0,
            mrw4: 0,
            mrs: 0,
            emrs: 0,
            emrs2: 0,
            auto_cal_config: [0; 8],
            cfg_2: 0,
            sel_dpd_ctrl: 0,
            fdpd_ctrl_cmd_no_ramp: 0,
            burst: [0; 221],
            shadow_ca: [0; 221],
            shadow_quse: [0; 221],
            shadow_rdwr: [0; 221],
            burst_per_ch: [0; 8],
            vref_per_ch: [0; 4],
            training_mod: [0; 20],
            trim: [0; 138],
            trim_per_ch: [0; 10],
            save_restore_mod: [0; 12],
            burst_mc: [0; 33],
            la_scale: [0; 24],
            num_up_down: 0,
            clock_tree: ClockTree {
                current: [0; 8],
                trained: [0; 8],
            },
            ptfv: PeriodicFilter {
                movavg: [0; 8],
                dvfs_samples: 0,
                write_samples: 0,
                movavg_weight: 0,
                config_ctrl: 0,
            },
        }
    }

    #[inline]
    pub const fn rate(&self) -> KiloHertz {
        KiloHertz::from_raw(self.rate_khz)
    }

    /// Clock period in nanoseconds.
    #[inline]
    pub fn period_ns(&self) -> f32 {
        1_000_000.0 / self.rate_khz as f32
    }

    #[inline]
    pub const fn rate_mhz(&self) -> MegaHertz {
        MegaHertz::from_raw(self.rate_khz / 1000)
    }

    /// DRAM type the burst image was generated for.
    #[inline]
    pub fn dram_type(&self) -> DramType {
        FbioCfg5::new_with_raw_value(self.burst[burst::FBIO_CFG5]).dram_type()
    }

    /// Channel 1 is enabled in the burst image.
    #[inline]
    pub fn channel1_enabled(&self) -> bool {
        FbioCfg7::new_with_raw_value(self.burst[burst::FBIO_CFG7]).ch1_enable()
    }

    /// Burst image value of `CFG_DIG_DLL` enables the digital DLL.
    #[inline]
    pub const fn dll_enabled(&self) -> bool {
        self.burst[burst::CFG_DIG_DLL] & 1 != 0
    }

    /// Active latency allowance values, clamped to the register table.
    #[inline]
    pub fn la_scale_values(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let count = self.num_up_down.min(LA_SCALE_REGS.len());
        LA_SCALE_REGS
            .iter()
            .copied()
            .zip(self.la_scale.iter().copied())
            .take(count)
    }

    /// Store a trained register value in the image which owns `offset`.
    ///
    /// The per-channel trim, per-channel burst, trim and burst images are searched in that
    /// order. Returns false if no image holds the register.
    pub fn store_trained(&mut self, offset: u32, value: u32) -> bool {
        let slot = if let Some(i) = find_in_table(&TRIM_REGS_PER_CH, offset) {
            &mut self.trim_per_ch[i]
        } else if let Some(i) = find_in_table(&BURST_REGS_PER_CH, offset) {
            &mut self.burst_per_ch[i]
        } else if let Some(i) = find_in_table(&TRIM_REGS, offset) {
            &mut self.trim[i]
        } else if let Some(i) = find_in_table(&BURST_REGS, offset) {
            &mut self.burst[i]
        } else {
            log::warn!("no image slot for trained register {:#x}", offset);
            return false;
        };
        *slot = value;
        true
    }
}

/// Position of the entry for `rate` among the first `entries` table entries.
///
/// If the rate appears more than once, the last match wins.
pub fn find_rate(table: &[OperatingPoint], entries: usize, rate: KiloHertz) -> Option<usize> {
    let entries = entries.min(table.len());
    table[..entries]
        .iter()
        .rposition(|entry| entry.rate_khz == rate.raw())
}
