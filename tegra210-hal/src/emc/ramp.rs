//! Pad power ramps around the clock change.
//!
//! Both ramps only queue writes into the command clock FIFO. They return the time (in ns) the
//! queued sequence takes, which later feeds the ZQ latch timing.
use embedded_hal::delay::DelayNs;
use tegra210::emc;

use super::{
    regs::Sequencer,
    table::{OperatingPoint, burst},
    training::NeedsTraining,
};
use crate::bus::RegisterBus;

/// Periods at or above this (in ns) need no DQ/CMD pad pre-emphasis handling.
const HIGH_SPEED_PERIOD: f32 = 1.0;
/// Periods at or above this can switch the common pads in one step.
const MID_SPEED_PERIOD: f32 = 1.666_666_7;
/// Below this period the IO brick duty cycle correction runs through the pad controls.
const IOBRICK_DCC_PERIOD: f32 = 0.416_666_67;

/// Pad control values driving one ramp.
#[derive(Debug, Clone, Copy)]
struct PadControls {
    cmd: u32,
    dq: u32,
    rfu1: u32,
    cfg5: u32,
    common: u32,
}

impl PadControls {
    fn from_image(image: &[u32; 221]) -> Self {
        Self {
            cmd: image[burst::CMD_PAD_TX_CTRL],
            dq: image[burst::DATA_PAD_TX_CTRL],
            rfu1: image[burst::BRICK_CTRL_RFU1],
            cfg5: image[burst::FBIO_CFG5],
            common: image[burst::COMMON_PAD_TX_CTRL],
        }
    }
}

/// Clock cycles per 100 ns, plus one.
#[inline]
fn cycles_per_100ns(period: f32) -> f32 {
    100.0 / period + 1.0
}

impl<B: RegisterBus, D: DelayNs> Sequencer<'_, B, D> {
    /// Queue the pad power-down sequence executed before the clock stops.
    ///
    /// With `flip_backward`, the ramp returns from a training clock and uses the destination
    /// image. Otherwise it leaves the source rate and keeps the destination DQ enables.
    pub(crate) fn ramp_down(
        &mut self,
        flip_backward: bool,
        src: &OperatingPoint,
        dst: &OperatingPoint,
        src_period: f32,
    ) -> u32 {
        let pads = if flip_backward {
            PadControls::from_image(&dst.burst)
        } else {
            let mut pads = PadControls::from_image(&src.burst);
            pads.dq |= dst.burst[burst::DATA_PAD_TX_CTRL] & 0x101;
            pads
        };
        let pc = cycles_per_100ns(src_period);
        let mut dq = pads.dq;
        let mut cmd_force_on = pads.cmd | 0x400_0000;
        let mut wait = (src_period * 12.0) as u32;

        self.ccfifo(emc::PMACRO_CMD_PAD_TX_CTRL, cmd_force_on, 0);
        self.ccfifo(emc::FBIO_CFG5, pads.cfg5 | 0x100, 12);

        if src_period >= HIGH_SPEED_PERIOD {
            self.ccfifo(
                emc::PMACRO_BRICK_CTRL_RFU1,
                pads.rfu1 & 0xF800_F800,
                (pc + 19.0) as u32,
            );
            wait = (wait as f32 + (100.0 + src_period * 20.0)) as u32;
        } else {
            wait += 100;
            if src_period >= IOBRICK_DCC_PERIOD {
                self.ccfifo(emc::PMACRO_BRICK_CTRL_RFU1, pads.rfu1 & 0xFEED_FEED, pc as u32);
            } else {
                dq = (dq & 0xFEFE_FDFD) | 0x1_0200;
                cmd_force_on = (pads.cmd & 0xFEFE_FDFD) | 0x401_0200;
                self.ccfifo(emc::PMACRO_CMD_PAD_TX_CTRL, cmd_force_on, pc as u32);
                self.ccfifo(emc::PMACRO_DATA_PAD_TX_CTRL, dq, 0);
                self.ccfifo(emc::PMACRO_BRICK_CTRL_RFU1, pads.rfu1 & 0xFEED_FEED, 0);
            }
            wait += 200;
            self.ccfifo(emc::PMACRO_BRICK_CTRL_RFU1, pads.rfu1 & 0xFE40_FE40, pc as u32);
            if src_period >= IOBRICK_DCC_PERIOD {
                self.ccfifo(emc::PMACRO_BRICK_CTRL_RFU1, pads.rfu1 & 0xF800_F800, pc as u32);
            } else {
                self.ccfifo(
                    emc::PMACRO_CMD_PAD_TX_CTRL,
                    cmd_force_on & 0xFEFE_FDFD,
                    pc as u32,
                );
                self.ccfifo(emc::PMACRO_DATA_PAD_TX_CTRL, dq & 0xFEFE_FDFD, 0);
                self.ccfifo(emc::PMACRO_BRICK_CTRL_RFU1, pads.rfu1 & 0xF800_F800, 0);
            }
        }

        if src_period >= MID_SPEED_PERIOD {
            self.ccfifo(emc::PMACRO_COMMON_PAD_TX_CTRL, pads.common & 0xFFFF_FFF0, pc as u32);
        } else {
            wait += 400;
            self.ccfifo(emc::PMACRO_COMMON_PAD_TX_CTRL, pads.common & 0xFFFF_FFFA, pc as u32);
            self.ccfifo(emc::PMACRO_COMMON_PAD_TX_CTRL, pads.common & 0xFFFF_FFF0, pc as u32);
            self.ccfifo(0, 0, pc as u32);
        }
        wait
    }

    /// Queue the pad power-up sequence executed once the new clock runs.
    ///
    /// The pad image follows the training phase in `needs`: a CA, QUSE or read/write shadow
    /// image, else the destination burst image. With `flip_backward` the source image is used.
    pub(crate) fn ramp_up(
        &mut self,
        flip_backward: bool,
        src: &OperatingPoint,
        dst: &OperatingPoint,
        needs: NeedsTraining,
        dst_period: f32,
    ) -> u32 {
        let image = if flip_backward {
            &src.burst
        } else if needs.ca_any() {
            &dst.shadow_ca
        } else if needs.quse_any() {
            &dst.shadow_quse
        } else if needs.rdwr_any() {
            &dst.shadow_rdwr
        } else {
            &dst.burst
        };
        let pads = PadControls::from_image(image);
        let pc = cycles_per_100ns(dst_period);
        let mut cmd_data = (pads.cmd & 0xFEFE_FDFD) | 0x400_0000;
        let mut dq = pads.dq;

        if dst_period >= MID_SPEED_PERIOD {
            self.ccfifo(emc::PMACRO_COMMON_PAD_TX_CTRL, pads.common | 8, 0);
            self.ccfifo(emc::PMACRO_BRICK_CTRL_RFU1, pads.rfu1 | 0x600, 0);
            self.ccfifo(emc::FBIO_CFG5, pads.cfg5 & 0xFFFF_FEFF, 12);
            self.ccfifo(emc::PMACRO_CMD_PAD_TX_CTRL, cmd_data & 0xFBFF_FFFF, 5);
            return (dst_period * 12.0) as u32;
        }

        self.ccfifo(emc::PMACRO_COMMON_PAD_TX_CTRL, pads.common & 0xA, 0);
        self.ccfifo(emc::PMACRO_COMMON_PAD_TX_CTRL, pads.common & 0xF, pc as u32);

        let wait = if dst_period < HIGH_SPEED_PERIOD {
            if dst_period >= IOBRICK_DCC_PERIOD {
                self.ccfifo(emc::PMACRO_BRICK_CTRL_RFU1, pads.rfu1 & 0xFE40_FE40, pc as u32);
            } else {
                cmd_data = (pads.cmd & 0xFEFE_FDFD) | 0x401_0200;
                dq = (dq & 0xFEFE_FDFD) | 0x1_0200;
                self.ccfifo(emc::PMACRO_CMD_PAD_TX_CTRL, cmd_data, pc as u32);
                self.ccfifo(emc::PMACRO_DATA_PAD_TX_CTRL, dq, 0);
                self.ccfifo(emc::PMACRO_BRICK_CTRL_RFU1, pads.rfu1 & 0xFE40_FE40, 0);
            }

            self.ccfifo(emc::PMACRO_BRICK_CTRL_RFU1, pads.rfu1 & 0xFEED_FEED, pc as u32);

            if dst_period >= IOBRICK_DCC_PERIOD {
                self.ccfifo(emc::PMACRO_BRICK_CTRL_RFU1, pads.rfu1, pc as u32);
            } else {
                cmd_data |= 0x101_0202;
                dq |= 0x101_0202;
                self.ccfifo(emc::PMACRO_CMD_PAD_TX_CTRL, cmd_data, pc as u32);
                self.ccfifo(emc::PMACRO_DATA_PAD_TX_CTRL, dq, 0);
                self.ccfifo(emc::PMACRO_BRICK_CTRL_RFU1, pads.rfu1, 0);
            }

            self.ccfifo(emc::FBIO_CFG5, pads.cfg5 & 0xFFFF_FEFF, (pc + 9.0) as u32);
            (400.0 + (100.0 + dst_period * 10.0)) as u32
        } else {
            self.ccfifo(emc::PMACRO_BRICK_CTRL_RFU1, pads.rfu1 | 0x600_0600, pc as u32);
            self.ccfifo(emc::FBIO_CFG5, pads.cfg5 & 0xFFFF_FEFF, (pc + 9.0) as u32);
            (100.0 + (100.0 + dst_period * 10.0)) as u32
        };
        self.ccfifo(emc::PMACRO_CMD_PAD_TX_CTRL, cmd_data & 0xFBFF_FFFF, 5);
        wait
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emc::{
        Config, Session,
        sim::{NoDelay, SimBus},
    };

    fn entries() -> (OperatingPoint, OperatingPoint) {
        let mut src = OperatingPoint::new(204_000);
        src.burst[burst::CMD_PAD_TX_CTRL] = 0x0101_0202;
        src.burst[burst::DATA_PAD_TX_CTRL] = 0x0000_0010;
        src.burst[burst::BRICK_CTRL_RFU1] = 0xFFFF_FFFF;
        src.burst[burst::COMMON_PAD_TX_CTRL] = 0xF;
        let mut dst = OperatingPoint::new(1_600_000);
        dst.burst[burst::DATA_PAD_TX_CTRL] = 0x0000_0101;
        dst.burst[burst::BRICK_CTRL_RFU1] = 0x1234_5678;
        dst.burst[burst::COMMON_PAD_TX_CTRL] = 0xF;
        dst.shadow_ca[burst::BRICK_CTRL_RFU1] = 0xCAFE_0000;
        (src, dst)
    }

    #[test]
    fn test_ramp_down_slow_source() {
        let (src, dst) = entries();
        let mut bus = SimBus::new();
        let mut delay = NoDelay::default();
        let config = Config::new();
        let mut session = Session::new();
        let mut seq = Sequencer::new(&mut bus, &mut delay, &config, &mut session);
        let wait = seq.ramp_down(false, &src, &dst, src.period_ns());
        // 4.9 ns period: 58 + 100 + 98.
        assert_eq!(wait, 256);
        assert_eq!(bus.ccfifo.len(), 4);
        assert_eq!(bus.ccfifo[0].value, 0x0501_0202);
        assert_eq!(bus.ccfifo[1].delay, 12);
        assert_eq!(bus.ccfifo[2].value, 0xF800_F800);
        // 100 / 4.9 + 1 + 19
        assert_eq!(bus.ccfifo[2].delay, 40);
        assert_eq!(bus.ccfifo[3].offset, emc::PMACRO_COMMON_PAD_TX_CTRL);
        assert_eq!(bus.ccfifo[3].value, 0);
    }

    #[test]
    fn test_ramp_down_fast_source_keeps_dst_dq_enables() {
        let (src, dst) = entries();
        let mut bus = SimBus::new();
        let mut delay = NoDelay::default();
        let config = Config::new();
        let mut session = Session::new();
        let mut seq = Sequencer::new(&mut bus, &mut delay, &config, &mut session);
        // Below the duty cycle correction threshold.
        let wait = seq.ramp_down(false, &src, &dst, 0.4);
        assert_eq!(wait, 4 + 100 + 200 + 400);
        let dq = bus.queued_to(emc::PMACRO_DATA_PAD_TX_CTRL);
        assert_eq!(dq.len(), 2);
        assert_eq!(dq[0].value, (0x111 & 0xFEFE_FDFD) | 0x1_0200);
        assert_eq!(dq[1].value, dq[0].value & 0xFEFE_FDFD);
        // The final FIFO entry is an empty write used as a delay.
        let last = bus.ccfifo.last().copied().unwrap();
        assert_eq!((last.offset, last.value, last.delay), (0, 0, 251));
    }

    #[test]
    fn test_ramp_up_tiers() {
        let (src, dst) = entries();
        let none = NeedsTraining::new_with_raw_value(0);
        let mut bus = SimBus::new();
        let mut delay = NoDelay::default();
        let config = Config::new();
        let mut session = Session::new();
        let mut seq = Sequencer::new(&mut bus, &mut delay, &config, &mut session);

        assert_eq!(seq.ramp_up(false, &src, &dst, none, 2.0), 24);
        assert_eq!(seq.ramp_up(false, &src, &dst, none, 1.25), 212);
        assert_eq!(seq.ramp_up(false, &src, &dst, none, 0.625), 506);
        assert_eq!(seq.ramp_up(false, &src, &dst, none, 0.4), 504);
        let rfu1 = bus.queued_to(emc::PMACRO_BRICK_CTRL_RFU1);
        assert_eq!(rfu1[0].value, 0x1234_5678 | 0x600);
        assert_eq!(rfu1[1].value, 0x1234_5678 | 0x600_0600);
    }

    #[test]
    fn test_ramp_up_uses_training_shadow() {
        let (src, dst) = entries();
        let mut bus = SimBus::new();
        let mut delay = NoDelay::default();
        let config = Config::new();
        let mut session = Session::new();
        let mut seq = Sequencer::new(&mut bus, &mut delay, &config, &mut session);
        let ca = NeedsTraining::new_with_raw_value(0).with_ca(true);
        seq.ramp_up(false, &src, &dst, ca, 2.0);
        seq.ramp_up(true, &src, &dst, ca, 2.0);
        let rfu1 = bus.queued_to(emc::PMACRO_BRICK_CTRL_RFU1);
        assert_eq!(rfu1[0].value, 0xCAFE_0600);
        assert_eq!(rfu1[1].value, 0xFFFF_FFFF);
    }
}
