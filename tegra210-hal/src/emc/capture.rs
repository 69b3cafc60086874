//! Persisting training results.
//!
//! After a training pass the controller holds the trained delay line, barrel shift and VREF
//! settings. They are read back per channel and stored in the destination operating point so
//! later switches to that rate program them from the table.
use embedded_hal::delay::DelayNs;
use tegra210::emc::{self, CH0_OFFSET, CH1_OFFSET, short_ddll};

use super::{regs::Sequencer, table::OperatingPoint, training::NeedsTraining};
use crate::bus::{Block, RegisterBus};

const MRW10_CA_VREF: u32 = 0x880C_0000;
const MRW12_DQ_VREF: u32 = 0x880E_0000;

/// Apply a sign-magnitude (bit 31) adjustment to the low byte of `value`.
#[inline]
fn adjust_byte(value: u32, adjustment: u32) -> u32 {
    let (value, step) = (value as u8, adjustment as u8);
    let adjusted = if adjustment & 0x8000_0000 != 0 {
        value.wrapping_sub(step)
    } else {
        value.wrapping_add(step)
    };
    adjusted as u32
}

/// Apply the 7-bit read VREF adjustments `mods` to the four packed codes of `value`.
fn adjust_rd_vref(value: u32, mods: &[u32]) -> u32 {
    mods.iter().enumerate().fold(0, |packed, (i, &m)| {
        let code = (value >> (8 * i)) & 0x7F;
        packed | ((adjust_byte(code, m & 0x7F) & 0x7F) << (8 * i))
    })
}

/// Average of the rank 0 and rank 1 codes, byte by byte.
fn average_ranks(rank0: u32, rank1: u32) -> u32 {
    (0..4).fold(0, |packed, i| {
        let sum = ((rank0 >> (8 * i)) & 0xFF) + ((rank1 >> (8 * i)) & 0xFF);
        packed | ((sum >> 1) << (8 * i))
    })
}

/// Where a trained register is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Broadcast,
    Ch0,
    Ch1,
}

struct Capture<'s, 'a, B, D> {
    seq: &'s mut Sequencer<'a, B, D>,
    ch1: bool,
}

impl<B: RegisterBus, D: DelayNs> Capture<'_, '_, B, D> {
    /// Read `offset`. Channel 1 reads as 0 while the channel is disabled.
    fn read(&mut self, source: Source, offset: u32) -> u32 {
        match source {
            Source::Broadcast => self.seq.read_block(Block::Emc, offset),
            Source::Ch0 => self.seq.read_block(Block::EmcCh0, offset),
            Source::Ch1 if self.ch1 => self.seq.read_block(Block::EmcCh1, offset),
            Source::Ch1 => 0,
        }
    }

    fn save(&mut self, entry: &mut OperatingPoint, source: Source, offset: u32, slot: u32) {
        let value = self.read(source, offset);
        entry.store_trained(slot, value);
    }

    fn save_same(&mut self, entry: &mut OperatingPoint, source: Source, offset: u32) {
        self.save(entry, source, offset, offset);
    }

    /// Four consecutive registers, the first two owned by channel 0, the last two by channel 1.
    fn save_quad(&mut self, entry: &mut OperatingPoint, base: u32) {
        for i in 0..4 {
            let source = if i < 2 { Source::Ch0 } else { Source::Ch1 };
            self.save_same(entry, source, base + 4 * i);
        }
    }

    /// Short delay lines of all eight bytes. Bytes 0 to 3 sit on channel 0.
    fn save_short_bytes(&mut self, entry: &mut OperatingPoint, block: u32) {
        for byte in 0..8 {
            let source = if byte < 4 { Source::Ch0 } else { Source::Ch1 };
            for k in 0..3 {
                self.save_same(entry, source, short_ddll(block, byte, k));
            }
        }
    }
}

impl<B: RegisterBus, D: DelayNs> Sequencer<'_, B, D> {
    /// Store the results of the training phases in `needs` in `entry`.
    pub(crate) fn capture_training_results(
        &mut self,
        entry: &mut OperatingPoint,
        needs: NeedsTraining,
        two_rank: bool,
        ch1: bool,
    ) {
        let mut cap = Capture { seq: self, ch1 };
        let self_refresh = needs.in_self_refresh();

        if needs.ca() {
            cap.save(entry, Source::Ch0, emc::CMD_BRLSHFT_0, CH0_OFFSET + emc::CMD_BRLSHFT_0);
            cap.save(entry, Source::Ch1, emc::CMD_BRLSHFT_1, CH1_OFFSET + emc::CMD_BRLSHFT_1);
            cap.save_same(entry, Source::Ch0, emc::PMACRO_OB_DDLL_LONG_DQ_RANK0_4);
            cap.save_same(entry, Source::Ch1, emc::PMACRO_OB_DDLL_LONG_DQ_RANK0_5);
            if self_refresh {
                for cmd in 0..4 {
                    for k in 0..3 {
                        let offset = short_ddll(emc::PMACRO_OB_DDLL_SHORT_DQ_RANK0_CMD0_0, cmd, k);
                        cap.save_same(entry, Source::Broadcast, offset);
                    }
                }
            }
        }

        if needs.ca_vref() {
            let ca0 = cap.read(Source::Ch0, emc::TRAINING_OPT_CA_VREF);
            let ca1 = cap.read(Source::Ch1, emc::TRAINING_OPT_CA_VREF);
            let select: u32 = if two_rank { 0x480C_0000 } else { 0xC80C_0000 };
            let mrw11 = |ca: u32| ((ca >> 16) & 0xFF) | ((ca >> 24) << 8) | (select & 0xFFFF_FF00);
            entry.store_trained(CH0_OFFSET + emc::MRW10, (ca0 & 0xFFFF) | MRW10_CA_VREF);
            entry.store_trained(CH1_OFFSET + emc::MRW10, (ca1 & 0xFFFF) | MRW10_CA_VREF);
            entry.store_trained(CH0_OFFSET + emc::MRW11, mrw11(ca0));
            entry.store_trained(CH1_OFFSET + emc::MRW11, mrw11(ca1));
        }

        if needs.quse() || needs.rd() {
            cap.save(entry, Source::Ch0, emc::QUSE_BRLSHFT_0, CH0_OFFSET + emc::QUSE_BRLSHFT_0);
            cap.save(entry, Source::Ch1, emc::QUSE_BRLSHFT_1, CH1_OFFSET + emc::QUSE_BRLSHFT_1);
            cap.save_quad(entry, emc::PMACRO_QUSE_DDLL_RANK0_0);
            if two_rank {
                cap.save(entry, Source::Ch0, emc::QUSE_BRLSHFT_2, CH0_OFFSET + emc::QUSE_BRLSHFT_2);
                cap.save(entry, Source::Ch1, emc::QUSE_BRLSHFT_3, CH1_OFFSET + emc::QUSE_BRLSHFT_3);
                cap.save_quad(entry, emc::PMACRO_QUSE_DDLL_RANK1_0);
            }
        }

        if needs.quse_vref() {
            if two_rank {
                for (source, slot) in [
                    (Source::Ch0, emc::PMACRO_IB_VREF_DQS_0),
                    (Source::Ch1, emc::PMACRO_IB_VREF_DQS_1),
                ] {
                    let rank0 = cap.read(source, emc::TRAINING_OPT_DQS_IB_VREF_RANK0);
                    let rank1 = cap.read(source, emc::TRAINING_OPT_DQS_IB_VREF_RANK1);
                    entry.store_trained(slot, average_ranks(rank0, rank1));
                }
            } else {
                cap.save_same(entry, Source::Broadcast, emc::PMACRO_IB_VREF_DQS_0);
                cap.save_same(entry, Source::Ch1, emc::PMACRO_IB_VREF_DQS_1);
            }
        }

        if needs.rd() {
            cap.save_quad(entry, emc::PMACRO_IB_DDLL_LONG_DQS_RANK0_0);
            if two_rank {
                cap.save_quad(entry, emc::PMACRO_IB_DDLL_LONG_DQS_RANK1_0);
            }
            if self_refresh {
                cap.save_short_bytes(entry, emc::PMACRO_IB_DDLL_SHORT_DQ_RANK0_BYTE0_0);
                if two_rank {
                    cap.save_short_bytes(entry, emc::PMACRO_IB_DDLL_SHORT_DQ_RANK1_BYTE0_0);
                }
            }
            if needs.rd_vref() {
                let mods = entry.save_restore_mod;
                for (i, offset) in [emc::PMACRO_IB_VREF_DQ_0, emc::PMACRO_IB_VREF_DQ_1]
                    .into_iter()
                    .enumerate()
                {
                    let value = cap.read(Source::Broadcast, offset);
                    entry.store_trained(offset, adjust_rd_vref(value, &mods[4 * i..4 * i + 4]));
                }
            }
        }

        if needs.wr() {
            cap.save(entry, Source::Ch0, emc::DATA_BRLSHFT_0, CH0_OFFSET + emc::DATA_BRLSHFT_0);
            cap.save(entry, Source::Ch1, emc::DATA_BRLSHFT_0, CH1_OFFSET + emc::DATA_BRLSHFT_0);
            if two_rank {
                cap.save(entry, Source::Ch0, emc::DATA_BRLSHFT_1, CH0_OFFSET + emc::DATA_BRLSHFT_1);
                cap.save(entry, Source::Ch1, emc::DATA_BRLSHFT_1, CH1_OFFSET + emc::DATA_BRLSHFT_1);
            }
            cap.save_quad(entry, emc::PMACRO_OB_DDLL_LONG_DQ_RANK0_0);
            if two_rank {
                cap.save_quad(entry, emc::PMACRO_OB_DDLL_LONG_DQ_RANK1_0);
            }
            if self_refresh {
                cap.save_short_bytes(entry, emc::PMACRO_OB_DDLL_SHORT_DQ_RANK0_BYTE0_0);
                if two_rank {
                    cap.save_short_bytes(entry, emc::PMACRO_OB_DDLL_SHORT_DQ_RANK1_BYTE0_0);
                }
            }
            if needs.wr_vref() {
                let vref0 = cap.read(Source::Ch0, emc::TRAINING_OPT_DQ_OB_VREF);
                let vref1 = cap.read(Source::Ch1, emc::TRAINING_OPT_DQ_OB_VREF);
                let m = &entry.save_restore_mod;
                let mr13: u32 = if two_rank { 0x480E_0000 } else { 0xC80E_0000 };

                let ch0_mrw12 = adjust_byte(vref0, m[8])
                    | MRW12_DQ_VREF
                    | (adjust_byte((vref0 & 0xFFFF) >> 8, m[9]) << 8);
                let ch0_mrw13 = (adjust_byte(vref0 >> 24, m[9]) << 8)
                    | adjust_byte((vref0 >> 16) & 0xFF, m[8])
                    | mr13;
                let ch1_mrw12 = adjust_byte(vref1, m[10])
                    | MRW12_DQ_VREF
                    | (adjust_byte((vref1 & 0xFFFF) >> 8, m[11]) << 8);
                let ch1_mrw13 = (adjust_byte(vref1 >> 24, m[11]) << 8)
                    | adjust_byte((vref1 >> 16) & 0xFF, m[10])
                    | mr13;

                entry.store_trained(CH1_OFFSET + emc::MRW12, ch1_mrw12);
                entry.store_trained(CH0_OFFSET + emc::MRW12, ch0_mrw12);
                entry.store_trained(CH0_OFFSET + emc::MRW13, ch0_mrw13);
                entry.store_trained(CH1_OFFSET + emc::MRW13, ch1_mrw13);
            }
        }
        log::debug!("captured training results {:#x}", needs.raw_value());
    }
}

#[cfg(test)]
mod tests {
    use tegra210::emc::{BURST_REGS_PER_CH, TRIM_REGS, find_in_table, table_index};

    use super::*;
    use crate::emc::{
        Config, Session,
        sim::{NoDelay, SimBus},
        table::trim,
    };

    fn capture(bus: &mut SimBus, entry: &mut OperatingPoint, needs: NeedsTraining, two_rank: bool, ch1: bool) {
        let mut delay = NoDelay::default();
        let config = Config::new();
        let mut session = Session::new();
        let mut seq = Sequencer::new(bus, &mut delay, &config, &mut session);
        seq.capture_training_results(entry, needs, two_rank, ch1);
    }

    fn per_ch(entry: &OperatingPoint, offset: u32) -> u32 {
        entry.burst_per_ch[table_index(&BURST_REGS_PER_CH, offset)]
    }

    fn trim_reg(entry: &OperatingPoint, offset: u32) -> u32 {
        entry.trim[table_index(&TRIM_REGS, offset)]
    }

    #[test]
    fn test_adjust_byte() {
        assert_eq!(adjust_byte(0x1_23, 0x10), 0x33);
        assert_eq!(adjust_byte(0x05, 0x8000_0007), 0xFE);
        assert_eq!(adjust_byte(0xF8, 0x10), 0x08);
        assert_eq!(adjust_rd_vref(0x7F01_2040, &[1, 0, 0x8000_0002, 0x8000_0001]), 0x7E7F_2041);
        assert_eq!(average_ranks(0x1020_30FF, 0x3040_50FF), 0x2030_40FF);
    }

    #[test]
    fn test_ca_vref() {
        let mut bus = SimBus::new();
        bus.poke(Block::EmcCh0, emc::TRAINING_OPT_CA_VREF, 0x1122_3344);
        bus.poke(Block::EmcCh1, emc::TRAINING_OPT_CA_VREF, 0x5566_7788);
        let mut entry = OperatingPoint::new(1_600_000);
        let needs = NeedsTraining::none().with_ca_vref(true);

        capture(&mut bus, &mut entry, needs, true, true);
        assert_eq!(per_ch(&entry, 0x34B4), 0x880C_3344);
        assert_eq!(per_ch(&entry, 0x44B4), 0x880C_7788);
        assert_eq!(per_ch(&entry, 0x34B8), 0x480C_1122);
        assert_eq!(per_ch(&entry, 0x44B8), 0x480C_5566);

        capture(&mut bus, &mut entry, needs, false, false);
        assert_eq!(per_ch(&entry, 0x34B8), 0xC80C_1122);
        assert_eq!(per_ch(&entry, 0x44B4), 0x880C_0000);
        assert_eq!(per_ch(&entry, 0x44B8), 0xC80C_0000);
    }

    #[test]
    fn test_wr_vref_wraps() {
        let mut bus = SimBus::new();
        bus.poke(Block::EmcCh0, emc::TRAINING_OPT_DQ_OB_VREF, 0x0203_0401);
        bus.poke(Block::EmcCh1, emc::TRAINING_OPT_DQ_OB_VREF, 0x10FF_2030);
        let mut entry = OperatingPoint::new(1_600_000);
        entry.save_restore_mod[8] = 0x8000_0002;
        entry.save_restore_mod[9] = 0x8000_0003;
        entry.save_restore_mod[10] = 0x01;
        entry.save_restore_mod[11] = 0x10;

        let needs = NeedsTraining::none().with_wr(true).with_wr_vref(true);
        capture(&mut bus, &mut entry, needs, false, true);
        assert_eq!(per_ch(&entry, 0x34BC), 0x880E_01FF);
        assert_eq!(per_ch(&entry, 0x34C0), 0xC80E_FF01);
        assert_eq!(per_ch(&entry, 0x44BC), 0x880E_3031);
        assert_eq!(per_ch(&entry, 0x44C0), 0xC80E_2000);
    }

    #[test]
    fn test_write_trims_follow_channel() {
        let mut bus = SimBus::new();
        for i in 0..4 {
            bus.poke(Block::EmcCh0, emc::PMACRO_OB_DDLL_LONG_DQ_RANK0_0 + 4 * i, 0x10 + i);
            bus.poke(Block::EmcCh1, emc::PMACRO_OB_DDLL_LONG_DQ_RANK0_0 + 4 * i, 0x20 + i);
        }
        bus.poke(Block::EmcCh0, emc::DATA_BRLSHFT_0, 0o1234);
        bus.poke(Block::EmcCh1, emc::DATA_BRLSHFT_0, 0o7654_0000);
        let mut entry = OperatingPoint::new(800_000);
        entry.trim_per_ch[trim::CH0_DATA_BRLSHFT_1] = 0xAA;

        capture(&mut bus, &mut entry, NeedsTraining::none().with_wr(true), false, true);
        let base = trim::OB_LONG_DQ_RANK0;
        assert_eq!(entry.trim[base..base + 4], [0x10, 0x11, 0x22, 0x23]);
        assert_eq!(entry.trim_per_ch[trim::CH0_DATA_BRLSHFT_0], 0o1234);
        assert_eq!(entry.trim_per_ch[trim::CH1_DATA_BRLSHFT_0], 0o7654_0000);
        // Rank 1 is untouched on a single rank board.
        assert_eq!(entry.trim_per_ch[trim::CH0_DATA_BRLSHFT_1], 0xAA);

        capture(&mut bus, &mut entry, NeedsTraining::none().with_wr(true), false, false);
        assert_eq!(entry.trim[base..base + 4], [0x10, 0x11, 0, 0]);
        assert_eq!(entry.trim_per_ch[trim::CH1_DATA_BRLSHFT_0], 0);
    }

    #[test]
    fn test_self_refresh_short_lines() {
        let mut bus = SimBus::new();
        let byte5 = short_ddll(emc::PMACRO_IB_DDLL_SHORT_DQ_RANK0_BYTE0_0, 5, 2);
        bus.poke(Block::EmcCh1, byte5, 0x55);
        let mut entry = OperatingPoint::new(1_600_000);

        let needs = NeedsTraining::none().with_rd(true);
        capture(&mut bus, &mut entry, needs, false, true);
        assert_eq!(trim_reg(&entry, byte5), 0);

        capture(&mut bus, &mut entry, needs.with_in_self_refresh(true), false, true);
        assert_eq!(trim_reg(&entry, byte5), 0x55);
        assert!(find_in_table(&TRIM_REGS, short_ddll(emc::PMACRO_IB_DDLL_SHORT_DQ_RANK1_BYTE0_0, 0, 0)).is_some());
    }

    #[test]
    fn test_quse_vref_rank_average() {
        let mut bus = SimBus::new();
        bus.poke(Block::EmcCh0, emc::TRAINING_OPT_DQS_IB_VREF_RANK0, 0x1010_1010);
        bus.poke(Block::EmcCh0, emc::TRAINING_OPT_DQS_IB_VREF_RANK1, 0x2020_2021);
        bus.poke(Block::EmcCh1, emc::TRAINING_OPT_DQS_IB_VREF_RANK0, 0x0000_00FF);
        bus.poke(Block::EmcCh1, emc::TRAINING_OPT_DQS_IB_VREF_RANK1, 0x0000_00FF);
        let mut entry = OperatingPoint::new(1_600_000);

        capture(&mut bus, &mut entry, NeedsTraining::none().with_quse_vref(true), true, true);
        assert_eq!(trim_reg(&entry, emc::PMACRO_IB_VREF_DQS_0), 0x1818_1818);
        assert_eq!(trim_reg(&entry, emc::PMACRO_IB_VREF_DQS_1), 0xFF);
    }
}
