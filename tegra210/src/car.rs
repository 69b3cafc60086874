//! # Clock and reset controller (CAR)
//!
//! Only the EMC clock source and the PLLM/PLLMB pair are described here. Offsets are relative
//! to [crate::CAR_BASE_ADDR].
use arbitrary_int::u5;

use crate::emc::Emc2xClkSrc;

pub const PLLM_BASE: u32 = 0x090;
pub const PLLM_MISC2: u32 = 0x09C;
pub const CLK_SOURCE_EMC: u32 = 0x19C;
pub const CLK_OUT_ENB_X: u32 = 0x280;
pub const PLLMB_BASE: u32 = 0x5E8;
pub const CLK_SOURCE_EMC_DLL: u32 = 0x664;
pub const CLK_SOURCE_EMC_SAFE: u32 = 0x724;

/// `PLLM_MISC2` bit which enables the PLLM kick-start circuit.
pub const PLLM_MISC2_KCP_EN: u32 = 0x10;
/// `CLK_OUT_ENB_X` bit gating the EMC DLL clock.
pub const CLK_ENB_EMC_DLL: u32 = 1 << 14;

#[bitbybit::bitfield(u32, default = 0x0)]
#[derive(Debug)]
pub struct PllBase {
    #[bit(30, rw)]
    enable: bool,
    #[bit(27, r)]
    lock: bool,
    #[bits(20..=24, rw)]
    post_div: u5,
    #[bits(8..=15, rw)]
    feedback: u8,
    #[bits(0..=7, rw)]
    input: u8,
}

/// EMC clock source. The raw value is what the rate table stores per operating point.
#[bitbybit::bitfield(u32)]
#[derive(Debug)]
pub struct ClkSourceEmc {
    #[bits(29..=31, rw)]
    emc_2x_clk_src: Emc2xClkSrc,
    /// Divider of the 2x clock in half steps. Ignored by the undivided sources.
    #[bits(0..=7, rw)]
    emc_2x_clk_divisor: u8,
}

impl ClkSourceEmc {
    /// Effective divider of the 2x clock, `1 + divisor / 2`.
    #[inline]
    pub fn divider(&self) -> f32 {
        let div = self.emc_2x_clk_divisor();
        ((div >> 1) + 1) as f32 + (div & 1) as f32 * 0.5
    }
}
