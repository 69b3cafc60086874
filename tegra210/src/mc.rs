//! # Memory controller (MC)
//!
//! Offsets are relative to [crate::MC_BASE_ADDR].

pub const EMEM_ADR_CFG: u32 = 0x054;

#[bitbybit::bitfield(u32)]
#[derive(Debug)]
pub struct EmemAdrCfg {
    /// Set if the board carries two DRAM devices (ranks).
    #[bit(0, rw)]
    emem_numdev: bool,
}

impl EmemAdrCfg {
    #[inline]
    pub fn device_count(&self) -> u32 {
        self.emem_numdev() as u32 + 1
    }
}

/// MC registers that follow the EMC burst image on a non-training switch.
pub const BURST_MC_REGS: [u32; 33] = [
    0x0090, 0x0094, 0x06F0, 0x06F4, 0x0098, 0x009C, 0x00A0, 0x00A4,
    0x00A8, 0x00AC, 0x00B0, 0x00B4, 0x00B8, 0x00BC, 0x00C0, 0x06C4,
    0x00C4, 0x06C0, 0x00D0, 0x00D4, 0x00D8, 0x00DC, 0x00C8, 0x00E0,
    0x0BCC, 0x0BD0, 0x0BD4, 0x0BD8, 0x0BDC, 0x0BE0, 0x0BE4, 0x0BE8,
    0x0BEC,
];

/// Latency allowance registers, rescaled on every rate change.
pub const LA_SCALE_REGS: [u32; 24] = [
    0x044C, 0x050C, 0x0960, 0x037C, 0x0380, 0x0390, 0x03B8, 0x03BC,
    0x03C0, 0x03C4, 0x0344, 0x0348, 0x0320, 0x0310, 0x0314, 0x02E4,
    0x03AC, 0x03E8, 0x0328, 0x03D8, 0x0394, 0x0398, 0x0370, 0x0374,
];
