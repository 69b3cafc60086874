//! Outbound DQ trim compensation for clock tree drift.
use tegra210::emc;

use super::{
    clktree::drift_taps,
    table::{OperatingPoint, lane, trim},
};

/// (channel, long DQ register, byte) for the eight trims of one rank.
const TRIM_LANES: [(usize, usize, u32); 8] = [
    (0, 0, 0),
    (0, 0, 1),
    (0, 1, 2),
    (0, 1, 3),
    (1, 2, 4),
    (1, 2, 5),
    (1, 3, 6),
    (1, 3, 7),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrimRegister {
    LongDq { rank: usize, reg: usize },
    BarrelShift { rank: usize },
}

impl TrimRegister {
    fn decode(offset: u32) -> Option<Self> {
        use emc::*;
        let long = |rank, base| TrimRegister::LongDq {
            rank,
            reg: ((offset - base) / 4) as usize,
        };
        Some(match offset {
            PMACRO_OB_DDLL_LONG_DQ_RANK0_0
            | PMACRO_OB_DDLL_LONG_DQ_RANK0_1
            | PMACRO_OB_DDLL_LONG_DQ_RANK0_2
            | PMACRO_OB_DDLL_LONG_DQ_RANK0_3 => long(0, PMACRO_OB_DDLL_LONG_DQ_RANK0_0),
            PMACRO_OB_DDLL_LONG_DQ_RANK1_0
            | PMACRO_OB_DDLL_LONG_DQ_RANK1_1
            | PMACRO_OB_DDLL_LONG_DQ_RANK1_2
            | PMACRO_OB_DDLL_LONG_DQ_RANK1_3 => long(1, PMACRO_OB_DDLL_LONG_DQ_RANK1_0),
            DATA_BRLSHFT_0 => TrimRegister::BarrelShift { rank: 0 },
            DATA_BRLSHFT_1 => TrimRegister::BarrelShift { rank: 1 },
            _ => return None,
        })
    }

    const fn rank(self) -> usize {
        match self {
            TrimRegister::LongDq { rank, .. } | TrimRegister::BarrelShift { rank } => rank,
        }
    }
}

fn barrel_shift(entry: &OperatingPoint, channel: usize, rank: usize) -> u32 {
    let index = match (channel, rank) {
        (0, 0) => trim::CH0_DATA_BRLSHFT_0,
        (_, 0) => trim::CH1_DATA_BRLSHFT_0,
        (0, _) => trim::CH0_DATA_BRLSHFT_1,
        _ => trim::CH1_DATA_BRLSHFT_1,
    };
    entry.trim_per_ch[index]
}

/// Full delay (coarse barrel shift plus fine long DQ taps) of the eight byte trims of `rank`.
fn rank_trims(entry: &OperatingPoint, rank: usize) -> [i32; 8] {
    let long_base = if rank == 0 {
        trim::OB_LONG_DQ_RANK0
    } else {
        trim::OB_LONG_DQ_RANK1
    };
    TRIM_LANES.map(|(channel, reg, byte)| {
        let shift = if byte & 1 != 0 { 16 } else { 0 };
        let fine = (entry.trim[long_base + reg] >> shift) & 0x7FF;
        let coarse = (barrel_shift(entry, channel, rank) >> (3 * byte)) & 0x7;
        (fine + (coarse << 6)) as i32
    })
}

/// `offset` (relative to its channel) is a register [compensated_trim] recomputes.
#[inline]
pub(crate) fn is_compensated(offset: u32) -> bool {
    TrimRegister::decode(offset).is_some()
}

/// Register value for `offset` with the drift of the clock tree since write training folded
/// into the trained trims.
///
/// Lanes whose drift stays within the tree margin keep their trained value. Offsets other
/// than the long DQ and data barrel shifter registers yield 0.
pub fn compensated_trim(entry: &OperatingPoint, offset: u32) -> u32 {
    let Some(register) = TrimRegister::decode(offset) else {
        return 0;
    };
    let rank = register.rank();
    let mhz = entry.rate_mhz().raw() as i32;
    let margin = entry.tree_margin as i32;
    let mut trims = rank_trims(entry, rank);

    for (i, (channel, byte)) in [(0, 0), (0, 1), (1, 0), (1, 1)].into_iter().enumerate() {
        let l = lane(channel, rank, byte);
        let delta = entry.clock_tree.current[l].wrapping_sub(entry.clock_tree.trained[l]) as i32;
        let taps = drift_taps(mhz, delta);
        if taps > margin || taps < -margin {
            trims[2 * i] += taps;
            trims[2 * i + 1] += taps;
        }
    }

    match register {
        TrimRegister::LongDq { reg, .. } => {
            let lo = (trims[2 * reg] % 64) as u32 & 0x7FF;
            let hi = (trims[2 * reg + 1] % 64) as u32 & 0x7FF;
            lo | (hi << 16)
        }
        TrimRegister::BarrelShift { .. } => trims
            .iter()
            .enumerate()
            .fold(0, |acc, (i, t)| acc | (((t / 64) as u32 & 0x7) << (3 * i))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> OperatingPoint {
        let mut entry = OperatingPoint::new(1_600_000);
        entry.tree_margin = 2;
        entry.trim[trim::OB_LONG_DQ_RANK0] = (20 << 16) | 10;
        entry.trim_per_ch[trim::CH0_DATA_BRLSHFT_0] = 1 | (2 << 3);
        entry
    }

    #[test]
    fn test_drift_beyond_margin() {
        let mut entry = entry();
        entry.clock_tree.current[lane(0, 0, 0)] = 520;
        entry.clock_tree.trained[lane(0, 0, 0)] = 498;
        // 74 + 4 and 148 + 4 taps.
        assert_eq!(
            compensated_trim(&entry, emc::PMACRO_OB_DDLL_LONG_DQ_RANK0_0),
            0x0018_000E
        );
        assert_eq!(compensated_trim(&entry, emc::DATA_BRLSHFT_0), 0x11);
    }

    #[test]
    fn test_negative_drift() {
        let mut entry = entry();
        entry.clock_tree.current[lane(0, 0, 0)] = 476;
        entry.clock_tree.trained[lane(0, 0, 0)] = 498;
        let value = compensated_trim(&entry, emc::PMACRO_OB_DDLL_LONG_DQ_RANK0_0);
        assert_eq!(value & 0x7FF, 6);
        assert_eq!(value >> 16, 144 % 64);
    }

    #[test]
    fn test_drift_within_margin_keeps_trims() {
        let mut entry = entry();
        entry.clock_tree.current[lane(0, 0, 0)] = 499;
        entry.clock_tree.trained[lane(0, 0, 0)] = 498;
        assert_eq!(
            compensated_trim(&entry, emc::PMACRO_OB_DDLL_LONG_DQ_RANK0_0),
            (148 % 64) << 16 | 74 % 64
        );
    }

    #[test]
    fn test_rank1_register() {
        let mut entry = entry();
        entry.trim[trim::OB_LONG_DQ_RANK1 + 2] = 0x0005_0003;
        entry.trim_per_ch[trim::CH1_DATA_BRLSHFT_1] = 0o7654_0000;
        assert_eq!(
            compensated_trim(&entry, emc::PMACRO_OB_DDLL_LONG_DQ_RANK1_2),
            0x0005_0003
        );
        assert_eq!(compensated_trim(&entry, emc::DATA_BRLSHFT_1), 0o7654_0000);
    }

    #[test]
    fn test_other_registers() {
        let entry = entry();
        assert_eq!(compensated_trim(&entry, emc::PMACRO_OB_DDLL_LONG_DQ_RANK0_4), 0);
        assert_eq!(compensated_trim(&entry, emc::PMACRO_QUSE_DDLL_RANK0_0), 0);
        assert!(!is_compensated(emc::PMACRO_OB_DDLL_LONG_DQ_RANK0_4));
        assert!(is_compensated(emc::DATA_BRLSHFT_1));
        assert!(is_compensated(emc::PMACRO_OB_DDLL_LONG_DQ_RANK1_3));
    }
}
