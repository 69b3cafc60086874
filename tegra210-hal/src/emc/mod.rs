//! # EMC frequency switching and DRAM training
//!
//! [EmcScaler] is the front end. It resolves the source and destination operating points in
//! the rate table, prepares the PLL for the destination rate and runs one of the four
//! [TrainMode] sequences. The clock change itself is queued mostly into the EMC command clock
//! FIFO and executed by the hardware around the clock switch.
//!
//! The process wide state of the driver lives in [Session]. Callers which reload the driver
//! between rate changes should persist it and pass it back with [EmcScaler::with_session].
use core::cmp::Ordering;

use embedded_hal::delay::DelayNs;
use tegra210::{car::ClkSourceEmc, emc::Emc2xClkSrc};

use crate::{
    bus::RegisterBus,
    clocks::{EmcPll, PllLockTimeout, emc_pll_post_divider, pll::configure_emc_pll},
    time::KiloHertz,
};

mod capture;
pub mod clktree;
mod dll;
mod periodic;
mod ramp;
mod regs;
pub mod switch;
pub mod table;
pub mod training;
pub mod trimmer;

#[cfg(test)]
pub(crate) mod sim;

pub use switch::{FspFlip, PrechargeTimings};
pub use table::{OperatingPoint, find_rate};
pub use training::{
    MAX_TRAINING_PASSES, NeedsTraining, PATTERN_WORDS, TrainingPatterns, training_plan,
};

use regs::Sequencer;

/// Status reported to the caller for a successful request.
pub const STATUS_OK: u32 = 0;
/// Status reported to the caller for any failed request.
pub const STATUS_FAILED: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Polls of a status register before a wait times out, one microsecond apart.
    pub status_poll_retries: u32,
    /// Reference clock of the EMC PLLs.
    pub pll_reference: KiloHertz,
    /// Rate tables with more entries are rejected.
    pub max_table_entries: usize,
    /// Bound for the DLL and PLL lock spins. `None` spins until the hardware gets there.
    pub dll_spin_limit: Option<u32>,
}

impl Config {
    pub const fn new() -> Self {
        Self {
            status_poll_retries: 1000,
            pll_reference: KiloHertz::from_raw(38_400),
            max_table_entries: 900,
            dll_spin_limit: None,
        }
    }

    pub const fn with_dll_spin_limit(mut self, polls: u32) -> Self {
        self.dll_spin_limit = Some(polls);
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("clock change did not complete")]
    ClockChangeTimeout,
    #[error("timing update after the clock change did not complete")]
    TimingUpdateTimeout,
    #[error("rate table has {entries} entries")]
    TableTooLarge { entries: usize },
    #[error("no rate table entry for {khz} kHz")]
    UnknownRate { khz: u32 },
    #[error("invalid train mode {0}")]
    InvalidTrainMode(u32),
    #[error("EMC PLL post divider {0} is out of range")]
    InvalidPllPostDivider(u8),
    #[error("DLL did not reach the requested state")]
    DllLockTimeout,
    #[error("PLL lock error: {0}")]
    PllLock(#[from] PllLockTimeout),
}

impl Error {
    /// Status code of the error for the caller.
    #[inline]
    pub const fn code(&self) -> u32 {
        STATUS_FAILED
    }
}

/// Status code for the outcome of a request.
#[inline]
pub const fn status_code(result: &Result<(), Error>) -> u32 {
    match result {
        Ok(()) => STATUS_OK,
        Err(e) => e.code(),
    }
}

/// Driver state which outlives a single rate change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Session {
    /// The EMC runs from PLLMB, so the next relock goes to PLLM.
    pub emc_2x_clk_src_is_pllmb: bool,
    /// The DRAM operates from frequency set point 1 at the current rate.
    pub fsp_for_src_freq: bool,
    /// The training pattern RAM holds the patterns.
    pub patterns_loaded: bool,
}

impl Session {
    pub const fn new() -> Self {
        Self {
            emc_2x_clk_src_is_pllmb: false,
            fsp_for_src_freq: false,
            patterns_loaded: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::TryFromPrimitive)]
#[repr(u32)]
pub enum TrainMode {
    /// Switch to the destination rate.
    Switch = 0,
    /// Train the destination rate and stay at the source rate.
    Train = 1,
    /// Train the destination rate, then switch to it.
    TrainSwitch = 2,
    /// Compensate clock tree drift at the current rate.
    PeriodicTrain = 3,
}

/// Factory rate table profile fitting a board memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableProfile {
    A,
    B,
}

impl TableProfile {
    pub const fn from_sdram_id(id: u32) -> Self {
        match id {
            1 => TableProfile::B,
            _ => TableProfile::A,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateChangeRequest {
    pub rate_from: KiloHertz,
    pub rate_to: KiloHertz,
    /// Valid entries at the start of the rate table.
    pub entries: usize,
    pub mode: TrainMode,
}

/// Whether moving from `src` to `dst` changes the EMC clock by more than 1%.
///
/// Entries on different clock sources always count as a change, except for a move between
/// the two PLLM outputs. Returns [Error::InvalidPllPostDivider] if the PLL driving the EMC
/// right now reports a post divider above 5.
pub fn check_freq_changed<B: RegisterBus>(
    bus: &mut B,
    src: &OperatingPoint,
    dst: &OperatingPoint,
) -> Result<bool, Error> {
    let post_div = emc_pll_post_divider(bus);
    if post_div > 5 {
        return Err(Error::InvalidPllPostDivider(post_div));
    }

    let src_sel = ClkSourceEmc::new_with_raw_value(src.clk_src_emc);
    let dst_sel = ClkSourceEmc::new_with_raw_value(dst.clk_src_emc);
    let (src_clk, dst_clk) = (src_sel.emc_2x_clk_src(), dst_sel.emc_2x_clk_src());
    let pllm_output = |clk: Emc2xClkSrc| matches!(clk, Emc2xClkSrc::PllmOut0 | Emc2xClkSrc::PllmUd);
    if src_clk != dst_clk && !(pllm_output(src_clk) && pllm_output(dst_clk)) {
        return Ok(true);
    }

    let divided = |rate_khz: u32, sel: ClkSourceEmc| {
        let div = if sel.emc_2x_clk_src().ignores_divider() {
            1.0
        } else {
            sel.divider()
        };
        rate_khz as f32 * div * (post_div as f32 + 1.0)
    };
    let ratio = divided(src.rate_khz, src_sel) / divided(dst.rate_khz, dst_sel);
    Ok(!(0.99..=1.01).contains(&ratio))
}

/// EMC rate change front end.
///
/// Owns the register bus, a delay source and the driver [Session], and works on a rate table
/// supplied by the boot environment. Trained values and clock tree measurements are written
/// back into that table.
pub struct EmcScaler<'a, B, D> {
    bus: B,
    delay: D,
    config: Config,
    session: Session,
    table: &'a mut [OperatingPoint],
    entries: usize,
    patterns: TrainingPatterns<'a>,
    rate_from: KiloHertz,
    current_entry: Option<usize>,
}

impl<'a, B: RegisterBus, D: DelayNs> EmcScaler<'a, B, D> {
    /// Create the front end for a controller currently running at `rate_from`.
    ///
    /// The first `entries` operating points of `table` take part in rate lookups.
    pub fn new(
        bus: B,
        delay: D,
        config: Config,
        table: &'a mut [OperatingPoint],
        entries: usize,
        patterns: TrainingPatterns<'a>,
        rate_from: KiloHertz,
    ) -> Self {
        Self {
            bus,
            delay,
            config,
            session: Session::new(),
            table,
            entries,
            patterns,
            rate_from,
            current_entry: None,
        }
    }

    /// Continue a session of an earlier driver instance.
    pub fn with_session(mut self, session: Session) -> Self {
        self.session = session;
        self
    }

    #[inline]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Rate the last switch landed on.
    #[inline]
    pub fn rate_from(&self) -> KiloHertz {
        self.rate_from
    }

    /// Operating point the last switch landed on.
    #[inline]
    pub fn current_entry(&self) -> Option<&OperatingPoint> {
        self.current_entry.map(|i| &self.table[i])
    }

    #[inline]
    pub fn table(&self) -> &[OperatingPoint] {
        &*self.table
    }

    #[inline]
    pub fn bus(&self) -> &B {
        &self.bus
    }

    #[inline]
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Release the bus and the delay source.
    pub fn release(self) -> (B, D) {
        (self.bus, self.delay)
    }

    /// Raw request interface: `mode` is the numeric [TrainMode]. Returns [STATUS_OK] or
    /// [STATUS_FAILED].
    pub fn execute(&mut self, rate_to_khz: u32, mode: u32) -> u32 {
        let result = TrainMode::try_from(mode)
            .map_err(|e| Error::InvalidTrainMode(e.number))
            .and_then(|mode| self.change_rate(KiloHertz::from_raw(rate_to_khz), mode));
        if let Err(e) = &result {
            log::error!("EMC request for {} kHz failed: {}", rate_to_khz, e);
        }
        status_code(&result)
    }

    /// Run `mode` towards `rate_to`, starting from the rate the last switch landed on.
    pub fn change_rate(&mut self, rate_to: KiloHertz, mode: TrainMode) -> Result<(), Error> {
        self.set_rate(RateChangeRequest {
            rate_from: self.rate_from,
            rate_to,
            entries: self.entries,
            mode,
        })
    }

    /// Run one rate change request.
    ///
    /// It performs the following steps:
    ///
    /// 1. Periodic compensation requests go straight to [Self::periodic_training].
    /// 2. Validate the table size and look up both entries. An unknown source rate falls back
    ///    to the first entry.
    /// 3. If the EMC clock changes, lock the idle PLL to the destination rate. Otherwise keep
    ///    the destination clock source, moved onto PLLMB if that is the active PLL.
    /// 4. Switch, train, or train and switch.
    ///
    /// [Self::rate_from] and [Self::current_entry] only move on switching modes.
    pub fn set_rate(&mut self, request: RateChangeRequest) -> Result<(), Error> {
        let train = match request.mode {
            TrainMode::PeriodicTrain => return self.periodic_training(),
            TrainMode::Switch => None,
            TrainMode::Train => Some(false),
            TrainMode::TrainSwitch => Some(true),
        };

        if request.entries > self.config.max_table_entries {
            return Err(Error::TableTooLarge {
                entries: request.entries,
            });
        }
        let dst_index = find_rate(&*self.table, request.entries, request.rate_to).ok_or(
            Error::UnknownRate {
                khz: request.rate_to.raw(),
            },
        )?;
        let src_index = find_rate(&*self.table, request.entries, request.rate_from).unwrap_or(0);

        let table = &mut *self.table;
        let src_copy;
        let (src, dst) = match src_index.cmp(&dst_index) {
            Ordering::Less => {
                let (lo, hi) = table.split_at_mut(dst_index);
                (&lo[src_index], &mut hi[0])
            }
            Ordering::Greater => {
                let (lo, hi) = table.split_at_mut(src_index);
                (&hi[0], &mut lo[dst_index])
            }
            Ordering::Equal => {
                src_copy = table[src_index].clone();
                (&src_copy, &mut table[dst_index])
            }
        };

        let freq_changed = check_freq_changed(&mut self.bus, src, dst)?;
        log::info!(
            "requested EMC rate change {} kHz -> {} kHz ({:?})",
            src.rate_khz,
            dst.rate_khz,
            request.mode
        );

        let clk_src_emc = if freq_changed {
            let src_clk = ClkSourceEmc::new_with_raw_value(src.clk_src_emc).emc_2x_clk_src();
            if src_clk.raw_value().value() & 3 != 0 {
                if src_clk.is_pllmb() {
                    self.session.emc_2x_clk_src_is_pllmb = false;
                }
            } else {
                self.session.emc_2x_clk_src_is_pllmb = !self.session.emc_2x_clk_src_is_pllmb;
            }
            let pll = if self.session.emc_2x_clk_src_is_pllmb {
                EmcPll::Pllmb
            } else {
                EmcPll::Pllm
            };
            configure_emc_pll(
                &mut self.bus,
                self.config.pll_reference,
                dst.rate(),
                dst.clk_src_emc,
                pll,
                self.config.dll_spin_limit,
            )?
        } else {
            let sel = ClkSourceEmc::new_with_raw_value(dst.clk_src_emc);
            match sel.emc_2x_clk_src() {
                Emc2xClkSrc::PllmUd | Emc2xClkSrc::PllmbUd
                    if self.session.emc_2x_clk_src_is_pllmb =>
                {
                    sel.with_emc_2x_clk_src(Emc2xClkSrc::PllmbUd).raw_value()
                }
                Emc2xClkSrc::PllmOut0 | Emc2xClkSrc::PllmbOut0
                    if self.session.emc_2x_clk_src_is_pllmb =>
                {
                    sel.with_emc_2x_clk_src(Emc2xClkSrc::PllmbOut0).raw_value()
                }
                _ => dst.clk_src_emc,
            }
        };

        let mut seq = Sequencer::new(
            &mut self.bus,
            &mut self.delay,
            &self.config,
            &mut self.session,
        );
        match train {
            None => seq.clock_change(src, dst, NeedsTraining::none(), clk_src_emc)?,
            Some(switch_rate) => {
                seq.train_patterns(src, dst, switch_rate, clk_src_emc, &self.patterns)?
            }
        }

        if train == Some(false) {
            // Training ran on the idle PLL and the EMC is back on the active one.
            if freq_changed {
                self.session.emc_2x_clk_src_is_pllmb = !self.session.emc_2x_clk_src_is_pllmb;
            }
        } else {
            self.rate_from = dst.rate();
            self.current_entry = Some(dst_index);
        }
        Ok(())
    }

    /// Compensate clock tree drift of the operating point the last switch landed on.
    ///
    /// Does nothing before the first switch.
    pub fn periodic_training(&mut self) -> Result<(), Error> {
        let Some(index) = self.current_entry else {
            return Ok(());
        };
        let mut seq = Sequencer::new(
            &mut self.bus,
            &mut self.delay,
            &self.config,
            &mut self.session,
        );
        seq.periodic_compensation(&mut self.table[index])
    }

    /// Boot time training.
    ///
    /// Trains every rate in `rates` from the current rate, then switches through them in order.
    /// The switches leave the trained values of the last two rates in both frequency set
    /// points. The first error aborts the sequence.
    pub fn boot_training(&mut self, rates: &[KiloHertz]) -> Result<(), Error> {
        for &rate in rates {
            self.change_rate(rate, TrainMode::Train)?;
        }
        for &rate in rates {
            self.change_rate(rate, TrainMode::Switch)?;
        }
        log::info!("boot training done, running at {} kHz", self.rate_from.raw());
        Ok(())
    }
}
