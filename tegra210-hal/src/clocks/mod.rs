//! EMC clock tree helpers.
use tegra210::car::{self, ClkSourceEmc, PllBase};

use crate::bus::{Block, RegisterBus};

pub mod pll;

pub use pll::{EmcPll, PllLockTimeout};

/// Currently active EMC clock source, as read back from the CAR.
#[inline]
pub fn emc_clock_source<B: RegisterBus>(bus: &mut B) -> ClkSourceEmc {
    ClkSourceEmc::new_with_raw_value(bus.read(Block::Car, car::CLK_SOURCE_EMC))
}

/// Post divider of the PLL feeding the EMC, or 0 if the EMC runs from another source.
pub fn emc_pll_post_divider<B: RegisterBus>(bus: &mut B) -> u8 {
    let src = emc_clock_source(bus).emc_2x_clk_src();
    let base = if src.is_pllm() {
        car::PLLM_BASE
    } else if src.is_pllmb() {
        car::PLLMB_BASE
    } else {
        return 0;
    };
    PllBase::new_with_raw_value(bus.read(Block::Car, base))
        .post_div()
        .value()
}
