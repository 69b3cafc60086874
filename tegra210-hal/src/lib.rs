//! # HAL for the external memory controller of the Tegra X1 (T210)
//!
//! This crate sits on top of the [tegra210] PAC and implements the EMC frequency switch and DRAM
//! training sequences:
//!
//! - [emc]: rate table model, clock-switch sequencer, training orchestration, periodic
//!   compensation and the rate-change front end.
//! - [clocks]: PLLM/PLLMB divider selection for the EMC clock.
//! - [bus]: the register access seam shared by the sequencer and the test simulator.
//!
//! All sequences are blocking and poll hardware status. They must not run concurrently with
//! each other.
#![no_std]

#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod bus;
pub mod clocks;
pub mod emc;
pub mod time;
