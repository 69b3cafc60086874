//! PLLM and PLLMB programming for the EMC clock.
use arbitrary_int::u5;
use tegra210::{
    car::{self, ClkSourceEmc, PllBase},
    emc::Emc2xClkSrc,
};

use crate::{
    bus::{Block, RegisterBus},
    time::KiloHertz,
};

/// The two PLLs which can feed the EMC. They are used in ping-pong fashion so the next rate can
/// lock on the idle PLL while the active one still clocks the DRAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmcPll {
    Pllm,
    Pllmb,
}

impl EmcPll {
    #[inline]
    pub const fn base_offset(self) -> u32 {
        match self {
            EmcPll::Pllm => car::PLLM_BASE,
            EmcPll::Pllmb => car::PLLMB_BASE,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{0:?} did not report lock")]
pub struct PllLockTimeout(pub EmcPll);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PllDividers {
    pub feedback: u8,
    pub input: u8,
    pub post: u5,
}

impl PllDividers {
    pub const fn new(feedback: u8, input: u8, post: u8) -> Self {
        Self {
            feedback,
            input,
            post: u5::new(post),
        }
    }

    /// PLL base register value with the PLL still disabled.
    #[inline]
    pub fn base_value(&self) -> PllBase {
        PllBase::new_with_raw_value(0)
            .with_input(self.input)
            .with_feedback(self.feedback)
            .with_post_div(self.post)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PllmTableRow {
    pub reference: KiloHertz,
    pub target: KiloHertz,
    pub dividers: PllDividers,
}

const fn row(reference: u32, target: u32, feedback: u8, input: u8, post: u8) -> PllmTableRow {
    PllmTableRow {
        reference: KiloHertz::from_raw(reference),
        target: KiloHertz::from_raw(target),
        dividers: PllDividers::new(feedback, input, post),
    }
}

/// Divider settings for the supported (reference, target) pairs.
pub const PLLM_TABLE: [PllmTableRow; 14] = [
    row(12_000, 800_000, 0x42, 1, 0),
    row(13_000, 800_000, 0x3D, 1, 0),
    row(38_400, 297_600, 0x5D, 4, 2),
    row(38_400, 400_000, 0x7D, 4, 2),
    row(38_400, 408_000, 0x55, 4, 1),
    row(38_400, 532_800, 0x6F, 4, 1),
    row(38_400, 665_600, 0x68, 3, 1),
    row(38_400, 800_000, 0x7D, 3, 1),
    row(38_400, 931_200, 0x61, 4, 0),
    row(38_400, 1_065_600, 0x6F, 4, 0),
    row(38_400, 1_200_000, 0x7D, 4, 0),
    row(38_400, 1_331_200, 0x68, 3, 0),
    row(38_400, 1_459_200, 0x4C, 2, 0),
    row(38_400, 1_600_000, 0x7D, 3, 0),
];

pub fn find_dividers(reference: KiloHertz, target: KiloHertz) -> Option<PllDividers> {
    PLLM_TABLE
        .iter()
        .find(|row| row.reference == reference && row.target == target)
        .map(|row| row.dividers)
}

/// Lock the idle EMC PLL to `target` and return the EMC clock source value to switch to.
///
/// It performs the following steps:
///
/// 1. Look up the dividers for the (reference, target) pair. Without a match, nothing is
///    programmed and `clk_src` is returned unchanged.
/// 2. Program the dividers and enable the selected PLL. For PLLM, the kick-start circuit is
///    enabled as well.
/// 3. For PLLMB, move a PLLM source select in `clk_src` to the matching PLLMB source.
/// 4. Busy-wait for the lock flag. With `spin_limit` set, give up after that many polls.
pub fn configure_emc_pll<B: RegisterBus>(
    bus: &mut B,
    reference: KiloHertz,
    target: KiloHertz,
    clk_src: u32,
    pll: EmcPll,
    spin_limit: Option<u32>,
) -> Result<u32, PllLockTimeout> {
    let Some(dividers) = find_dividers(reference, target) else {
        log::warn!(
            "no {:?} dividers for {} kHz -> {} kHz",
            pll,
            reference.raw(),
            target.raw()
        );
        return Ok(clk_src);
    };
    let base = pll.base_offset();
    bus.write(Block::Car, base, dividers.base_value().raw_value());

    let mut clk_src = ClkSourceEmc::new_with_raw_value(clk_src);
    match pll {
        EmcPll::Pllmb => {
            bus.modify(Block::Car, base, |v| {
                PllBase::new_with_raw_value(v).with_enable(true).raw_value()
            });
            match clk_src.emc_2x_clk_src() {
                Emc2xClkSrc::PllmUd => {
                    clk_src = clk_src.with_emc_2x_clk_src(Emc2xClkSrc::PllmbUd)
                }
                Emc2xClkSrc::PllmOut0 => {
                    clk_src = clk_src.with_emc_2x_clk_src(Emc2xClkSrc::PllmbOut0)
                }
                _ => (),
            }
        }
        EmcPll::Pllm => {
            bus.modify(Block::Car, car::PLLM_MISC2, |v| v | car::PLLM_MISC2_KCP_EN);
            bus.modify(Block::Car, base, |v| {
                PllBase::new_with_raw_value(v).with_enable(true).raw_value()
            });
        }
    }

    let mut polls: u32 = 0;
    while !PllBase::new_with_raw_value(bus.read(Block::Car, base)).lock() {
        if let Some(limit) = spin_limit {
            polls += 1;
            if polls >= limit {
                return Err(PllLockTimeout(pll));
            }
        }
        core::hint::spin_loop();
    }
    log::debug!("{:?} locked at {} kHz", pll, target.raw());
    Ok(clk_src.raw_value())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emc::sim::SimBus;

    const REF: KiloHertz = KiloHertz::from_raw(38_400);

    #[test]
    fn test_lookup_1600() {
        let div = find_dividers(REF, KiloHertz::from_raw(1_600_000)).unwrap();
        assert_eq!(div.feedback, 0x7D);
        assert_eq!(div.input, 3);
        assert_eq!(div.post.value(), 0);
        assert_eq!(div.base_value().raw_value(), 0x7D03);
    }

    #[test]
    fn test_lookup_with_post_div() {
        let div = find_dividers(REF, KiloHertz::from_raw(297_600)).unwrap();
        assert_eq!(div.base_value().raw_value(), 0x0020_5D04);
    }

    #[test]
    fn test_lookup_miss() {
        assert!(find_dividers(REF, KiloHertz::from_raw(204_000)).is_none());
        assert!(find_dividers(KiloHertz::from_raw(12_000), KiloHertz::from_raw(1_600_000)).is_none());
    }

    #[test]
    fn test_unknown_target_leaves_source() {
        let mut bus = SimBus::new();
        let clk = configure_emc_pll(
            &mut bus,
            REF,
            KiloHertz::from_raw(204_000),
            0x8000_0000,
            EmcPll::Pllmb,
            Some(10),
        )
        .unwrap();
        assert_eq!(clk, 0x8000_0000);
        assert_eq!(bus.peek(Block::Car, car::PLLMB_BASE), 0);
    }

    #[test]
    fn test_pllmb_rewrites_source() {
        let mut bus = SimBus::new();
        let clk = configure_emc_pll(
            &mut bus,
            REF,
            KiloHertz::from_raw(1_600_000),
            0x8000_0000,
            EmcPll::Pllmb,
            Some(10),
        )
        .unwrap();
        assert_eq!(clk >> 29, 5);
        let base = PllBase::new_with_raw_value(bus.peek(Block::Car, car::PLLMB_BASE));
        assert!(base.enable());
        assert_eq!(base.feedback(), 0x7D);

        let clk = configure_emc_pll(
            &mut bus,
            REF,
            KiloHertz::from_raw(1_600_000),
            0x0000_0001,
            EmcPll::Pllmb,
            Some(10),
        )
        .unwrap();
        assert_eq!(clk, 0xC000_0001);
    }

    #[test]
    fn test_pllm_enables_kick_start() {
        let mut bus = SimBus::new();
        let clk = configure_emc_pll(
            &mut bus,
            REF,
            KiloHertz::from_raw(800_000),
            0x8000_0000,
            EmcPll::Pllm,
            Some(10),
        )
        .unwrap();
        assert_eq!(clk, 0x8000_0000);
        assert_ne!(bus.peek(Block::Car, car::PLLM_MISC2) & car::PLLM_MISC2_KCP_EN, 0);
    }

    #[test]
    fn test_lock_timeout() {
        let mut bus = SimBus::new();
        bus.pll_locks = false;
        let result = configure_emc_pll(
            &mut bus,
            REF,
            KiloHertz::from_raw(800_000),
            0,
            EmcPll::Pllm,
            Some(4),
        );
        assert_eq!(result, Err(PllLockTimeout(EmcPll::Pllm)));
    }
}
