//! Register level model of the EMC, MC and CAR blocks for the sequencer tests.
//!
//! Only the behavior the sequences rely on is modelled: broadcast writes, the command clock
//! FIFO, PLL lock, the clock change handshake, mode register reads and the DLL status bits.
use std::{collections::BTreeMap, vec::Vec};

use embedded_hal::delay::DelayNs;
use tegra210::{
    car,
    emc::{self, DramType, status},
    mc,
};

use super::table::{OperatingPoint, burst};
use crate::bus::{Block, RegisterBus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Bank {
    Ch0,
    Ch1,
    Mc,
    Car,
}

/// Write pushed into the command clock FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedWrite {
    pub offset: u32,
    pub value: u32,
    pub delay: u32,
}

pub struct SimBus {
    regs: BTreeMap<(Bank, u32), u32>,
    /// Every write in program order, as issued by the sequencer.
    pub writes: Vec<(Block, u32, u32)>,
    pub ccfifo: Vec<QueuedWrite>,
    pub clock_change_completes: bool,
    pub pll_locks: bool,
    /// `CFG_DIG_DLL` reads back with the enable bit stuck high.
    pub dll_stuck: bool,
    /// `MRR` read data of channel 0 and channel 1.
    pub mrr: [u32; 2],
    pub mpc_kicks: u32,
    pub patram_writes: u32,
}

const DLL_LOCKED: u32 = (1 << 17) | (1 << 15);

impl SimBus {
    pub fn new() -> Self {
        let mut bus = Self {
            regs: BTreeMap::new(),
            writes: Vec::new(),
            ccfifo: Vec::new(),
            clock_change_completes: true,
            pll_locks: true,
            dll_stuck: false,
            mrr: [0; 2],
            mpc_kicks: 0,
            patram_writes: 0,
        };
        bus.set(Bank::Ch0, emc::DIG_DLL_STATUS, DLL_LOCKED);
        bus.set(Bank::Ch1, emc::DIG_DLL_STATUS, DLL_LOCKED);
        bus
    }

    /// LPDDR4 board with one or two ranks on one or two channels.
    pub fn lpddr4(two_rank: bool, dual: bool) -> Self {
        let mut bus = Self::new();
        bus.poke(Block::Emc, emc::FBIO_CFG5, DramType::Lpddr4 as u32);
        bus.poke(Block::Emc, emc::FBIO_CFG7, if dual { 0x6 } else { 0x2 });
        bus.poke(Block::Mc, mc::EMEM_ADR_CFG, two_rank as u32);
        bus
    }

    fn bank(block: Block, offset: u32) -> (Bank, u32) {
        match block {
            Block::Emc if offset >= emc::CH1_OFFSET => (Bank::Ch1, offset - emc::CH1_OFFSET),
            Block::Emc if offset >= emc::CH0_OFFSET => (Bank::Ch0, offset - emc::CH0_OFFSET),
            Block::Emc | Block::EmcCh0 => (Bank::Ch0, offset),
            Block::EmcCh1 => (Bank::Ch1, offset),
            Block::Mc => (Bank::Mc, offset),
            Block::Car => (Bank::Car, offset),
        }
    }

    fn get(&self, bank: Bank, offset: u32) -> u32 {
        self.regs.get(&(bank, offset)).copied().unwrap_or(0)
    }

    fn set(&mut self, bank: Bank, offset: u32, value: u32) {
        self.regs.insert((bank, offset), value);
    }

    /// Raw register content, without read side effects.
    pub fn peek(&self, block: Block, offset: u32) -> u32 {
        let (bank, offset) = Self::bank(block, offset);
        self.get(bank, offset)
    }

    /// Set register content, without write side effects. Broadcast offsets reach both channels.
    pub fn poke(&mut self, block: Block, offset: u32, value: u32) {
        if block == Block::Emc && offset < emc::CH0_OFFSET {
            self.set(Bank::Ch0, offset, value);
            self.set(Bank::Ch1, offset, value);
        } else {
            let (bank, offset) = Self::bank(block, offset);
            self.set(bank, offset, value);
        }
    }

    /// Values written to one register, in order.
    pub fn writes_to(&self, block: Block, offset: u32) -> Vec<u32> {
        self.writes
            .iter()
            .filter(|(b, o, _)| *b == block && *o == offset)
            .map(|(_, _, v)| *v)
            .collect()
    }

    /// Values pushed through the command clock FIFO for one register, in order.
    pub fn queued_to(&self, offset: u32) -> Vec<QueuedWrite> {
        self.ccfifo
            .iter()
            .filter(|w| w.offset == offset)
            .copied()
            .collect()
    }

    fn store_channel(&mut self, bank: Bank, offset: u32, value: u32) {
        match offset {
            emc::INTSTATUS => {
                let old = self.get(bank, offset);
                self.set(bank, offset, old & !value);
            }
            _ => self.set(bank, offset, value),
        }
    }
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterBus for SimBus {
    fn read(&mut self, block: Block, offset: u32) -> u32 {
        let (bank, offset) = Self::bank(block, offset);
        let value = self.get(bank, offset);
        match (bank, offset) {
            (Bank::Ch0 | Bank::Ch1, emc::EMC_STATUS) => value | status::MRR_DIVLD,
            (Bank::Ch0, emc::MRR) => self.mrr[0],
            (Bank::Ch1, emc::MRR) => self.mrr[1],
            (Bank::Ch0 | Bank::Ch1, emc::CFG_DIG_DLL) if self.dll_stuck => value | 1,
            _ => value,
        }
    }

    fn write(&mut self, block: Block, offset: u32, value: u32) {
        self.writes.push((block, offset, value));
        let (bank, reg) = Self::bank(block, offset);
        match (bank, reg) {
            (Bank::Ch0, emc::CCFIFO_ADDR) => self.ccfifo.push(QueuedWrite {
                offset: value & 0xFFFF,
                value: self.get(Bank::Ch0, emc::CCFIFO_DATA),
                delay: (value >> 16) & 0x7FFF,
            }),
            (Bank::Ch0, emc::MPC) if value == 0x4B => self.mpc_kicks += 1,
            (Bank::Ch0, emc::TRAINING_PATRAM_CTRL) => self.patram_writes += 1,
            (Bank::Car, car::CLK_SOURCE_EMC) if self.clock_change_completes => {
                for ch in [Bank::Ch0, Bank::Ch1] {
                    let old = self.get(ch, emc::INTSTATUS);
                    self.set(ch, emc::INTSTATUS, old | emc::CLKCHANGE_COMPLETE_INT);
                }
            }
            _ => (),
        }

        match bank {
            Bank::Car if matches!(reg, car::PLLM_BASE | car::PLLMB_BASE) => {
                let lock = if self.pll_locks && value & (1 << 30) != 0 {
                    1 << 27
                } else {
                    0
                };
                self.set(bank, reg, value | lock);
            }
            Bank::Ch0 if block == Block::Emc && offset < emc::CH0_OFFSET => {
                self.store_channel(Bank::Ch0, reg, value);
                self.store_channel(Bank::Ch1, reg, value);
            }
            Bank::Ch0 | Bank::Ch1 => self.store_channel(bank, reg, value),
            _ => self.set(bank, reg, value),
        }
    }
}

/// Delay provider which only accounts for the requested time.
#[derive(Debug, Default)]
pub struct NoDelay {
    pub elapsed_us: u64,
}

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.elapsed_us += ns.div_ceil(1000) as u64;
    }

    fn delay_us(&mut self, us: u32) {
        self.elapsed_us += us as u64;
    }
}

/// Operating point with the identity registers filled in and plausible LPDDR4 timings.
pub fn operating_point(rate_khz: u32, clk_src_emc: u32, dram: DramType, dual: bool) -> OperatingPoint {
    let mut entry = OperatingPoint::new(rate_khz);
    entry.clk_src_emc = clk_src_emc;
    entry.burst[burst::FBIO_CFG5] = dram as u32;
    entry.burst[burst::FBIO_CFG7] = if dual { 0x6 } else { 0x2 };
    entry.timings.t_rp = 18;
    entry.timings.t_fc_lpddr4 = 250;
    entry.timings.t_rfc = 180;
    entry.timings.t_pdex = 10;
    entry.timings.rl = 28;
    entry.run_clocks = 64;
    entry.tree_margin = 2;
    entry.ptfv.dvfs_samples = 2;
    entry.ptfv.write_samples = 3;
    entry.ptfv.movavg_weight = 1;
    entry
}
