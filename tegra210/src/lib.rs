//! # PAC for the Tegra X1 (T210) memory and clock blocks
//!
//! This crate covers the register blocks touched when the external memory controller (EMC)
//! changes its operating frequency:
//!
//! - [emc]: the external memory controller, its broadcast space and the two per-channel views.
//! - [mc]: the memory controller arbitration unit.
//! - [car]: the clock and reset controller, for the EMC clock source and the PLLM/PLLMB pair.
//! - [timer]: the free-running microsecond timer used for short settle delays.
//!
//! The EMC register space is large and sparsely used. Instead of one monolithic MMIO struct,
//! the EMC and MC modules expose register offsets, bit layouts and the fixed register-address
//! tables which are walked when a rate table image is programmed.
#![no_std]

pub mod car;
pub mod emc;
pub mod mc;
pub mod timer;

/// EMC broadcast register space. Writes reach both channels.
pub const EMC_BASE_ADDR: usize = 0x7001_B000;
/// Channel 0 view of the EMC.
pub const EMC0_BASE_ADDR: usize = 0x7001_E000;
/// Channel 1 view of the EMC.
pub const EMC1_BASE_ADDR: usize = 0x7001_F000;
pub const MC_BASE_ADDR: usize = 0x7001_9000;
pub const CAR_BASE_ADDR: usize = 0x6000_6000;
pub const TIMER_BASE_ADDR: usize = 0x6000_5000;

// The per-channel address tables encode channel 0 registers as 0x3xxx and channel 1 registers
// as 0x4xxx relative to the broadcast base.
static_assertions::const_assert_eq!(EMC0_BASE_ADDR - EMC_BASE_ADDR, emc::CH0_OFFSET as usize);
static_assertions::const_assert_eq!(EMC1_BASE_ADDR - EMC_BASE_ADDR, emc::CH1_OFFSET as usize);
