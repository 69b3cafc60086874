//! # External memory controller (EMC) registers
//!
//! All offsets are relative to [crate::EMC_BASE_ADDR]. The broadcast space reaches both
//! channels on writes. The channel 0 and channel 1 views live at [CH0_OFFSET] and [CH1_OFFSET]
//! relative to the same base, which is how the per-channel address tables encode them.
use arbitrary_int::{u15, u3};

/// Offset of the channel 0 view relative to the broadcast base.
pub const CH0_OFFSET: u32 = 0x3000;
/// Offset of the channel 1 view relative to the broadcast base.
pub const CH1_OFFSET: u32 = 0x4000;

pub const INTSTATUS: u32 = 0x000;
pub const DBG: u32 = 0x008;
pub const CFG: u32 = 0x00C;
pub const PIN: u32 = 0x024;
pub const TIMING_CONTROL: u32 = 0x028;
pub const RP: u32 = 0x038;
pub const R2P: u32 = 0x044;
pub const W2P: u32 = 0x048;
pub const TRPAB: u32 = 0x09C;
pub const MRS_WAIT_CNT2: u32 = 0x0C4;
pub const MRS: u32 = 0x0CC;
pub const EMRS: u32 = 0x0D0;
pub const REF: u32 = 0x0D4;
pub const SELF_REF: u32 = 0x0E0;
pub const MRW: u32 = 0x0E8;
pub const MRR: u32 = 0x0EC;
pub const FBIO_CFG5: u32 = 0x104;
pub const MPC: u32 = 0x128;
pub const EMRS2: u32 = 0x12C;
pub const MRW2: u32 = 0x134;
pub const MRW3: u32 = 0x138;
pub const MRW4: u32 = 0x13C;
pub const CFG_SYNC: u32 = 0x28C;
pub const AUTO_CAL_CONFIG: u32 = 0x2A4;
pub const EMC_STATUS: u32 = 0x2B4;
pub const CFG_2: u32 = 0x2B8;
pub const CFG_DIG_DLL: u32 = 0x2BC;
pub const DIG_DLL_STATUS: u32 = 0x2C4;
pub const AUTO_CAL_CONFIG8: u32 = 0x2DC;
pub const ZCAL_INTERVAL: u32 = 0x2E0;
pub const ZCAL_WAIT_CNT: u32 = 0x2E4;
pub const ZQ_CAL: u32 = 0x2EC;
pub const PMACRO_BRICK_CTRL_RFU1: u32 = 0x330;
pub const TR_CTRL_0: u32 = 0x3B8;
pub const SWITCH_BACK_CTRL: u32 = 0x3C0;
pub const STALL_THEN_EXE_AFTER_CLKCHANGE: u32 = 0x3CC;
pub const SEL_DPD_CTRL: u32 = 0x3D8;
pub const CCFIFO_ADDR: u32 = 0x3E8;
pub const CCFIFO_DATA: u32 = 0x3EC;
pub const AUTO_CAL_CONFIG2: u32 = 0x458;
pub const AUTO_CAL_CONFIG3: u32 = 0x45C;
pub const TR_DVFS: u32 = 0x460;
pub const MRW6: u32 = 0x4A4;
pub const MRW7: u32 = 0x4A8;
pub const MRW8: u32 = 0x4AC;
pub const MRW9: u32 = 0x4B0;
pub const MRW10: u32 = 0x4B4;
pub const MRW11: u32 = 0x4B8;
pub const MRW12: u32 = 0x4BC;
pub const MRW13: u32 = 0x4C0;
pub const MRW14: u32 = 0x4C4;
pub const MRW15: u32 = 0x4D0;
pub const FDPD_CTRL_CMD_NO_RAMP: u32 = 0x4D8;
pub const CFG_PIPE_CLK: u32 = 0x558;
pub const AUTO_CAL_CONFIG7: u32 = 0x574;
pub const FBIO_CFG7: u32 = 0x584;
pub const DATA_BRLSHFT_0: u32 = 0x588;
pub const DATA_BRLSHFT_1: u32 = 0x58C;
pub const CMD_BRLSHFT_0: u32 = 0x59C;
pub const CMD_BRLSHFT_1: u32 = 0x5A0;
pub const QUSE_BRLSHFT_0: u32 = 0x5AC;
pub const AUTO_CAL_CONFIG4: u32 = 0x5B0;
pub const AUTO_CAL_CONFIG5: u32 = 0x5B4;
pub const QUSE_BRLSHFT_1: u32 = 0x5B8;
pub const QUSE_BRLSHFT_2: u32 = 0x5BC;
pub const QUSE_BRLSHFT_3: u32 = 0x5C4;
pub const AUTO_CAL_CONFIG6: u32 = 0x5CC;
pub const DLL_CFG_0: u32 = 0x5E4;
pub const DLL_CFG_1: u32 = 0x5E8;
pub const CFG_UPDATE: u32 = 0x5F4;

pub const PMACRO_OB_DDLL_LONG_DQ_RANK0_0: u32 = 0x600;
pub const PMACRO_OB_DDLL_LONG_DQ_RANK0_1: u32 = 0x604;
pub const PMACRO_OB_DDLL_LONG_DQ_RANK0_2: u32 = 0x608;
pub const PMACRO_OB_DDLL_LONG_DQ_RANK0_3: u32 = 0x60C;
pub const PMACRO_OB_DDLL_LONG_DQ_RANK0_4: u32 = 0x610;
pub const PMACRO_OB_DDLL_LONG_DQ_RANK0_5: u32 = 0x614;
pub const PMACRO_OB_DDLL_LONG_DQ_RANK1_0: u32 = 0x620;
pub const PMACRO_OB_DDLL_LONG_DQ_RANK1_1: u32 = 0x624;
pub const PMACRO_OB_DDLL_LONG_DQ_RANK1_2: u32 = 0x628;
pub const PMACRO_OB_DDLL_LONG_DQ_RANK1_3: u32 = 0x62C;
pub const PMACRO_QUSE_DDLL_RANK0_0: u32 = 0x640;
pub const PMACRO_QUSE_DDLL_RANK1_0: u32 = 0x660;
pub const PMACRO_IB_DDLL_LONG_DQS_RANK0_0: u32 = 0x6C0;
pub const PMACRO_IB_DDLL_LONG_DQS_RANK1_0: u32 = 0x6E0;
pub const PMACRO_OB_DDLL_SHORT_DQ_RANK0_BYTE0_0: u32 = 0x800;
pub const PMACRO_OB_DDLL_SHORT_DQ_RANK0_CMD0_0: u32 = 0x880;
pub const PMACRO_OB_DDLL_SHORT_DQ_RANK1_BYTE0_0: u32 = 0x900;
pub const PMACRO_IB_DDLL_SHORT_DQ_RANK0_BYTE0_0: u32 = 0xA00;
pub const PMACRO_IB_DDLL_SHORT_DQ_RANK1_BYTE0_0: u32 = 0xB00;
pub const PMACRO_IB_VREF_DQ_0: u32 = 0xBE0;
pub const PMACRO_IB_VREF_DQ_1: u32 = 0xBE4;
pub const PMACRO_IB_VREF_DQS_0: u32 = 0xBF0;
pub const PMACRO_IB_VREF_DQS_1: u32 = 0xBF4;
pub const PMACRO_CFG_PM_GLOBAL_0: u32 = 0xC30;
pub const PMACRO_BG_BIAS_CTRL_0: u32 = 0xC3C;
pub const PMACRO_DATA_RX_TERM_MODE: u32 = 0xC5C;
pub const PMACRO_CMD_PAD_TX_CTRL: u32 = 0xC60;
pub const PMACRO_DATA_PAD_TX_CTRL: u32 = 0xC64;
pub const PMACRO_COMMON_PAD_TX_CTRL: u32 = 0xC68;
pub const PMACRO_AUTOCAL_CFG_COMMON: u32 = 0xC78;
pub const PMACRO_TRAINING_CTRL_0: u32 = 0xCF8;
pub const PMACRO_TRAINING_CTRL_1: u32 = 0xCFC;
pub const TRAINING_CMD: u32 = 0xE00;
pub const TRAINING_CTRL: u32 = 0xE04;
pub const TRAINING_OPT_CA_VREF: u32 = 0xEC0;
pub const TRAINING_OPT_DQ_OB_VREF: u32 = 0xEC4;
pub const TRAINING_OPT_DQS_IB_VREF_RANK0: u32 = 0xED8;
pub const TRAINING_OPT_DQS_IB_VREF_RANK1: u32 = 0xEDC;
pub const TRAINING_PATRAM_CTRL: u32 = 0xEE4;
pub const TRAINING_PATRAM_DQ: u32 = 0xEE8;
pub const TRAINING_PATRAM_DMI: u32 = 0xEEC;

/// Offset of the short delay line register `k` (0..=2) of `byte` relative to a block base such
/// as [PMACRO_OB_DDLL_SHORT_DQ_RANK0_BYTE0_0].
#[inline]
pub const fn short_ddll(block: u32, byte: u32, k: u32) -> u32 {
    block + 0x10 * byte + 4 * k
}

/// Interrupt status bits.
pub const CLKCHANGE_COMPLETE_INT: u32 = 1 << 4;

/// `EMC_STATUS` masks used by the bounded status waits.
pub mod status {
    pub const TIMING_UPDATE_STALLED: u32 = 1 << 23;
    pub const MRR_DIVLD: u32 = 1 << 20;
    pub const IN_SELF_REFRESH_MASK: u32 = 0x300;
    pub const IN_POWERDOWN_MASK: u32 = 0x30;
    /// Power-down status of device 0 only.
    pub const IN_POWERDOWN_DEV0: u32 = 0x10;
    pub const REQ_FIFO_EMPTY: u32 = 1 << 0;
}

pub const CH0_TRAINING_E_WRPTR: u32 = 1 << 3;

#[bitbybit::bitenum(u2, exhaustive = true)]
#[derive(Debug, PartialEq, Eq)]
pub enum DramType {
    Ddr3 = 0b00,
    Lpddr4 = 0b01,
    /// Also covers LPDDR3, which is flagged separately in [FbioCfg5].
    Lpddr2 = 0b10,
    Ddr2 = 0b11,
}

#[bitbybit::bitfield(u32)]
#[derive(Debug)]
pub struct FbioCfg5 {
    #[bit(25, rw)]
    lpddr3: bool,
    #[bits(0..=1, rw)]
    dram_type: DramType,
}

#[bitbybit::bitfield(u32)]
#[derive(Debug)]
pub struct FbioCfg7 {
    #[bit(2, rw)]
    ch1_enable: bool,
    #[bit(1, rw)]
    ch0_enable: bool,
}

impl FbioCfg7 {
    #[inline]
    pub const fn dual_channel(&self) -> bool {
        self.ch0_enable() && self.ch1_enable()
    }
}

/// Command-clock FIFO address word. Writing it pushes the value previously written to
/// [CCFIFO_DATA] into the deferred write queue.
#[bitbybit::bitfield(u32, default = 0x0)]
#[derive(Debug)]
pub struct CcfifoAddr {
    #[bit(31, rw)]
    push: bool,
    /// Delay in EMC clock cycles, observed before the write executes.
    #[bits(16..=30, rw)]
    delay: u15,
    #[bits(0..=15, rw)]
    offset: u16,
}

/// Training command. Each set bit kicks off one training sub-phase.
#[bitbybit::bitfield(u32, default = 0x0)]
#[derive(Debug)]
pub struct TrainingCmd {
    #[bit(31, rw)]
    go: bool,
    #[bit(8, rw)]
    quse_vref: bool,
    #[bit(7, rw)]
    rd_vref: bool,
    #[bit(6, rw)]
    wr_vref: bool,
    #[bit(5, rw)]
    ca_vref: bool,
    #[bit(4, rw)]
    quse: bool,
    #[bit(3, rw)]
    wr: bool,
    #[bit(2, rw)]
    rd: bool,
    #[bit(1, rw)]
    ca: bool,
}

/// Source select of the EMC 2x clock, shared by `CLK_SOURCE_EMC` and the rate table entries.
#[bitbybit::bitenum(u3, exhaustive = true)]
#[derive(Debug, PartialEq, Eq)]
pub enum Emc2xClkSrc {
    PllmOut0 = 0,
    PllcOut0 = 1,
    PllpOut0 = 2,
    ClkM = 3,
    PllmUd = 4,
    PllmbUd = 5,
    PllmbOut0 = 6,
    PllpUd = 7,
}

impl Emc2xClkSrc {
    /// Source is one of the PLLM outputs.
    #[inline]
    pub const fn is_pllm(self) -> bool {
        matches!(self, Self::PllmOut0 | Self::PllmUd)
    }

    /// Source is one of the PLLMB outputs.
    #[inline]
    pub const fn is_pllmb(self) -> bool {
        matches!(self, Self::PllmbUd | Self::PllmbOut0)
    }

    /// The 2x clock divider field of `CLK_SOURCE_EMC` does not apply to these sources.
    #[inline]
    pub const fn ignores_divider(self) -> bool {
        self.raw_value().value() <= Self::PllmbUd.raw_value().value()
    }

    #[inline]
    pub const fn from_raw(raw: u8) -> Self {
        Self::new_with_raw_value(u3::new(raw & 0b111))
    }
}

/// Registers written from the burst image of an operating point, in image order.
pub const BURST_REGS: [u32; 221] = [
    0x002C, 0x0030, 0x0590, 0x0580, 0x00C0, 0x0034, 0x0038, 0x003C,
    0x0040, 0x0044, 0x0048, 0x0144, 0x00AC, 0x05C0, 0x004C, 0x0050,
    0x0054, 0x0058, 0x00B8, 0x04E0, 0x005C, 0x0498, 0x0494, 0x02D0,
    0x0490, 0x048C, 0x0060, 0x0568, 0x0468, 0x046C, 0x014C, 0x04A4,
    0x0150, 0x0154, 0x056C, 0x0064, 0x0068, 0x006C, 0x02CC, 0x02D8,
    0x02D4, 0x0070, 0x0074, 0x03DC, 0x0078, 0x007C, 0x0080, 0x0084,
    0x0088, 0x008C, 0x011C, 0x0118, 0x00B4, 0x0090, 0x03E4, 0x0094,
    0x0158, 0x015C, 0x0098, 0x009C, 0x00A0, 0x00A4, 0x04A8, 0x00A8,
    0x00B0, 0x0104, 0x0584, 0x02BC, 0x02C0, 0x0CF4, 0x055C, 0x0554,
    0x0610, 0x0614, 0x0630, 0x0634, 0x04AC, 0x0670, 0x0674, 0x0680,
    0x0684, 0x0688, 0x068C, 0x0690, 0x0694, 0x06A0, 0x06A4, 0x06A8,
    0x06AC, 0x06B0, 0x06B4, 0x0C00, 0x0C04, 0x0C08, 0x0C0C, 0x0C10,
    0x0C20, 0x0C24, 0x0C28, 0x080C, 0x081C, 0x082C, 0x083C, 0x084C,
    0x085C, 0x086C, 0x087C, 0x088C, 0x089C, 0x08AC, 0x08BC, 0x090C,
    0x091C, 0x092C, 0x093C, 0x094C, 0x095C, 0x096C, 0x097C, 0x0980,
    0x0984, 0x0988, 0x098C, 0x0990, 0x0994, 0x0998, 0x099C, 0x09A0,
    0x09A4, 0x09A8, 0x09AC, 0x09B0, 0x09B4, 0x09B8, 0x09BC, 0x0480,
    0x0310, 0x0314, 0x0100, 0x02E0, 0x02E4, 0x00C8, 0x00C4, 0x0464,
    0x05E4, 0x05E8, 0x0C78, 0x0C44, 0x000C, 0x0560, 0x03E0, 0x0564,
    0x0594, 0x0598, 0x05A4, 0x05A8, 0x0C40, 0x0C54, 0x0C50, 0x0C5C,
    0x0C58, 0x0C60, 0x0C64, 0x0C68, 0x0C34, 0x0C38, 0x0CF0, 0x0330,
    0x0318, 0x0334, 0x031C, 0x0C3C, 0x049C, 0x0720, 0x0724, 0x0728,
    0x072C, 0x0730, 0x0734, 0x05F0, 0x0740, 0x0744, 0x0748, 0x074C,
    0x0750, 0x0754, 0x0760, 0x0770, 0x0774, 0x0778, 0x0780, 0x0784,
    0x0788, 0x03B4, 0x0460, 0x03BC, 0x03C4, 0x03F4, 0x03F8, 0x04C4,
    0x03FC, 0x0400, 0x0E04, 0x0E44, 0x0E6C, 0x0E30, 0x0E34, 0x0E38,
    0x0E3C, 0x0E0C, 0x0E10, 0x0E14, 0x0ED0, 0x0E24, 0x0E28, 0x0E2C,
    0x0E18, 0x0E1C, 0x0E20, 0x0E5C, 0x04D0,
];

/// Per-channel mode register writes (MRW10 to MRW13 for channel 0 and channel 1).
pub const BURST_REGS_PER_CH: [u32; 8] = [
    0x34B4, 0x44B4, 0x34B8, 0x44B8, 0x34BC, 0x44BC, 0x34C0, 0x44C0,
];

pub const VREF_REGS_PER_CH: [u32; 4] = [
    0x3ED4, 0x4ED4, 0x3ED8, 0x4ED8,
];

/// Training modifier registers, only written on training passes.
pub const TRAINING_MOD_REGS: [u32; 20] = [
    0x3E98, 0x4E98, 0x3E9C, 0x4E9C, 0x3EA0, 0x4EA0, 0x3EA4, 0x4EA4,
    0x3EA8, 0x4EA8, 0x3EAC, 0x4EAC, 0x3EB0, 0x4EB0, 0x3EB4, 0x4EB4,
    0x3EB8, 0x4EB8, 0x3EBC, 0x4EBC,
];

/// Delay line trim registers, in trim image order.
pub const TRIM_REGS: [u32; 138] = [
    0x06C0, 0x06C4, 0x06C8, 0x06CC, 0x06E0, 0x06E4, 0x06E8, 0x06EC,
    0x0A00, 0x0A04, 0x0A08, 0x0A10, 0x0A14, 0x0A18, 0x0A20, 0x0A24,
    0x0A28, 0x0A30, 0x0A34, 0x0A38, 0x0A40, 0x0A44, 0x0A48, 0x0A50,
    0x0A54, 0x0A58, 0x0A60, 0x0A64, 0x0A68, 0x0A70, 0x0A74, 0x0A78,
    0x0B00, 0x0B04, 0x0B08, 0x0B10, 0x0B14, 0x0B18, 0x0B20, 0x0B24,
    0x0B28, 0x0B30, 0x0B34, 0x0B38, 0x0B40, 0x0B44, 0x0B48, 0x0B50,
    0x0B54, 0x0B58, 0x0B60, 0x0B64, 0x0B68, 0x0B70, 0x0B74, 0x0B78,
    0x0BF0, 0x0BF4, 0x0BE0, 0x0BE4, 0x0640, 0x0644, 0x0648, 0x064C,
    0x0650, 0x0654, 0x0660, 0x0664, 0x0668, 0x066C, 0x0800, 0x0804,
    0x0808, 0x0810, 0x0814, 0x0818, 0x0820, 0x0824, 0x0828, 0x0830,
    0x0834, 0x0838, 0x0840, 0x0844, 0x0848, 0x0850, 0x0854, 0x0858,
    0x0860, 0x0864, 0x0868, 0x0870, 0x0874, 0x0878, 0x0880, 0x0884,
    0x0888, 0x0890, 0x0894, 0x0898, 0x08A0, 0x08A4, 0x08A8, 0x08B0,
    0x08B4, 0x08B8, 0x0900, 0x0904, 0x0908, 0x0910, 0x0914, 0x0918,
    0x0920, 0x0924, 0x0928, 0x0930, 0x0934, 0x0938, 0x0940, 0x0944,
    0x0948, 0x0950, 0x0954, 0x0958, 0x0960, 0x0964, 0x0968, 0x0970,
    0x0974, 0x0978, 0x0600, 0x0604, 0x0608, 0x060C, 0x0620, 0x0624,
    0x0628, 0x062C,
];

/// Per-channel barrel shifter registers.
pub const TRIM_REGS_PER_CH: [u32; 10] = [
    0x359C, 0x45A0, 0x3588, 0x4588, 0x358C, 0x458C, 0x35AC, 0x45B8,
    0x35BC, 0x45C4,
];

/// Registers reprogrammed by periodic compensation, in the order they are written.
pub const PERIODIC_TRAINING_REGS: [u32; 10] = [
    PMACRO_OB_DDLL_LONG_DQ_RANK0_0,
    PMACRO_OB_DDLL_LONG_DQ_RANK0_1,
    PMACRO_OB_DDLL_LONG_DQ_RANK0_2,
    PMACRO_OB_DDLL_LONG_DQ_RANK0_3,
    PMACRO_OB_DDLL_LONG_DQ_RANK1_0,
    PMACRO_OB_DDLL_LONG_DQ_RANK1_1,
    PMACRO_OB_DDLL_LONG_DQ_RANK1_2,
    PMACRO_OB_DDLL_LONG_DQ_RANK1_3,
    DATA_BRLSHFT_0,
    DATA_BRLSHFT_1,
];

/// Position of `offset` inside one of the register address tables.
///
/// Intended for `const` contexts: an offset missing from the table fails compilation.
pub const fn table_index(table: &[u32], offset: u32) -> usize {
    let mut i = 0;
    while i < table.len() {
        if table[i] == offset {
            return i;
        }
        i += 1;
    }
    panic!("register offset is not part of the address table");
}

/// Same as [table_index], but usable at runtime.
pub fn find_in_table(table: &[u32], offset: u32) -> Option<usize> {
    table.iter().position(|&entry| entry == offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_sizes() {
        assert_eq!(BURST_REGS.len(), 221);
        assert_eq!(TRIM_REGS.len(), 138);
        assert_eq!(TRIM_REGS_PER_CH.len(), 10);
        assert_eq!(TRAINING_MOD_REGS.len(), 20);
    }

    #[test]
    fn burst_table_lookups() {
        assert_eq!(table_index(&BURST_REGS, PMACRO_CMD_PAD_TX_CTRL), 161);
        assert_eq!(table_index(&BURST_REGS, CFG), 148);
        assert_eq!(find_in_table(&BURST_REGS, CCFIFO_ADDR), None);
    }

    #[test]
    fn ccfifo_word_layout() {
        let word = CcfifoAddr::new_with_raw_value(0)
            .with_offset(0x3B8)
            .with_delay(u15::new(0x1234))
            .with_push(true);
        assert_eq!(word.raw_value(), 0x8000_0000 | (0x1234 << 16) | 0x3B8);
    }

    #[test]
    fn clock_source_classes() {
        assert!(Emc2xClkSrc::PllmUd.is_pllm());
        assert!(Emc2xClkSrc::PllmbOut0.is_pllmb());
        assert!(Emc2xClkSrc::PllmbUd.ignores_divider());
        assert!(!Emc2xClkSrc::PllmbOut0.ignores_divider());
        assert_eq!(Emc2xClkSrc::from_raw(6), Emc2xClkSrc::PllmbOut0);
    }
}
