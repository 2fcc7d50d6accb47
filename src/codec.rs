/*
   Copyright 2018 Ilya Epifanov

   Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
   http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
   http://opensource.org/licenses/MIT>, at your option. This file may not be
   copied, modified, or distributed except according to those terms.
*/
//! Packing of the 18 and 20 bit multisynth parameters into byte registers.
//!
//! Every parameter spans three registers: a shared one holding the top bits
//! next to an unrelated field, followed by two private bytes (bits 15:8 and
//! 7:0). The shared byte is always written with a mask.

use crate::rational::RationalTriple;
use crate::register::{Register, RegisterBus};
use crate::{FeedbackMultisynth, Multisynth};

/// Where the top bits of a parameter live inside its shared register.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HighBits {
    /// Bits 17:16 in bits 1:0.
    Bits1_0,
    /// Bits 19:16 in bits 3:0.
    LowNibble,
    /// Bits 19:16 in bits 7:4.
    HighNibble,
}

impl HighBits {
    pub fn mask(self) -> u8 {
        match self {
            HighBits::Bits1_0 => 0b0000_0011,
            HighBits::LowNibble => 0b0000_1111,
            HighBits::HighNibble => 0b1111_0000,
        }
    }

    fn shift(self) -> u32 {
        match self {
            HighBits::Bits1_0 | HighBits::LowNibble => 0,
            HighBits::HighNibble => 4,
        }
    }

    fn width(self) -> u32 {
        match self {
            HighBits::Bits1_0 => 18,
            HighBits::LowNibble | HighBits::HighNibble => 20,
        }
    }
}

/// A logical parameter split over three register addresses.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub shared: u8,
    pub high_bits: HighBits,
    pub mid: u8,
    pub low: u8,
}

impl Parameter {
    pub const fn bits18(shared: u8, mid: u8, low: u8) -> Self {
        Parameter {
            shared,
            high_bits: HighBits::Bits1_0,
            mid,
            low,
        }
    }

    pub const fn bits20(shared: u8, high_bits: HighBits, mid: u8, low: u8) -> Self {
        Parameter {
            shared,
            high_bits,
            mid,
            low,
        }
    }

    pub fn width(&self) -> u32 {
        self.high_bits.width()
    }

    pub fn max(&self) -> u32 {
        (1 << self.width()) - 1
    }

    /// Lane bytes for `value`; bits above the parameter width are dropped.
    /// Only the bits under `high_bits.mask()` are meaningful in the first lane.
    pub fn pack(&self, value: u32) -> [u8; 3] {
        let value = value & self.max();
        [
            ((value >> 16) << self.high_bits.shift()) as u8 & self.high_bits.mask(),
            (value >> 8) as u8,
            value as u8,
        ]
    }

    pub fn unpack(&self, lanes: [u8; 3]) -> u32 {
        let high = ((lanes[0] & self.high_bits.mask()) >> self.high_bits.shift()) as u32;
        high << 16 | (lanes[1] as u32) << 8 | lanes[2] as u32
    }

    pub fn read<B: RegisterBus>(&self, bus: &mut B) -> Result<u32, B::Error> {
        let lanes = [
            bus.read_register(self.shared)?,
            bus.read_register(self.mid)?,
            bus.read_register(self.low)?,
        ];
        Ok(self.unpack(lanes))
    }

    pub fn write<B: RegisterBus>(&self, bus: &mut B, value: u32) -> Result<(), B::Error> {
        let lanes = self.pack(value);
        bus.write_register_masked(self.shared, lanes[0], self.high_bits.mask())?;
        bus.write_register(self.mid, lanes[1])?;
        bus.write_register(self.low, lanes[2])
    }
}

/// Register layout of one fractional multisynth, relative to its base:
///
/// ```text
/// base+0  P3[15:8]
/// base+1  P3[7:0]
/// base+2  P1[17:16] in bits 1:0 (rest: output divider / divide-by-4)
/// base+3  P1[15:8]
/// base+4  P1[7:0]
/// base+5  P3[19:16] in bits 7:4, P2[19:16] in bits 3:0
/// base+6  P2[15:8]
/// base+7  P2[7:0]
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MultisynthLayout {
    pub p1: Parameter,
    pub p2: Parameter,
    pub p3: Parameter,
}

impl MultisynthLayout {
    pub const fn at(base: u8) -> Self {
        MultisynthLayout {
            p1: Parameter::bits18(base + 2, base + 3, base + 4),
            p2: Parameter::bits20(base + 5, HighBits::LowNibble, base + 6, base + 7),
            p3: Parameter::bits20(base + 5, HighBits::HighNibble, base, base + 1),
        }
    }

    pub fn write<B: RegisterBus>(&self, bus: &mut B, params: FeedbackParams) -> Result<(), B::Error> {
        self.p1.write(bus, params.p1)?;
        self.p2.write(bus, params.p2)?;
        self.p3.write(bus, params.p3)
    }

    pub fn read<B: RegisterBus>(&self, bus: &mut B) -> Result<FeedbackParams, B::Error> {
        Ok(FeedbackParams {
            p1: self.p1.read(bus)?,
            p2: self.p2.read(bus)?,
            p3: self.p3.read(bus)?,
        })
    }
}

pub trait FractionalMultisynth {
    fn base_addr(&self) -> u8;

    fn layout(&self) -> MultisynthLayout {
        MultisynthLayout::at(self.base_addr())
    }
}

impl FractionalMultisynth for FeedbackMultisynth {
    fn base_addr(&self) -> u8 {
        match *self {
            FeedbackMultisynth::MSNA => Register::MSNA.addr(),
            FeedbackMultisynth::MSNB => Register::MSNB.addr(),
        }
    }
}

impl FractionalMultisynth for Multisynth {
    fn base_addr(&self) -> u8 {
        Register::MS0.addr() + 8 * (*self as u8)
    }
}

/// The encoded `P1`, `P2`, `P3` of a divider or multiplier `a + b/c`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FeedbackParams {
    pub p1: u32,
    pub p2: u32,
    pub p3: u32,
}

impl FeedbackParams {
    /// `P1 = 128a + floor(128b/c) - 512`, `P2 = 128b - c*floor(128b/c)`, `P3 = c`
    pub fn from_triple(t: RationalTriple) -> Self {
        let ratio = (128u64 * t.b as u64 / t.c as u64) as u32;
        FeedbackParams {
            p1: (128 * t.a + ratio).saturating_sub(512),
            p2: 128 * t.b - t.c * ratio,
            p3: t.c,
        }
    }

    /// Divide-by-4 mode ignores the divider, which must read as `0 + 0/1`.
    pub const fn divide_by_4() -> Self {
        FeedbackParams { p1: 0, p2: 0, p3: 1 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Access, FakeRegisters};

    #[test]
    fn round_trip_18_bits() {
        let p = Parameter::bits18(44, 45, 46);
        assert_eq!(p.max(), 0x3_ffff);
        for v in 0..=p.max() {
            assert_eq!(p.unpack(p.pack(v)), v);
        }
        assert_eq!(p.pack(0x3_ffff), [0b11, 0xff, 0xff]);
    }

    #[test]
    fn round_trip_20_bits_both_nibbles() {
        for &hb in [HighBits::LowNibble, HighBits::HighNibble].iter() {
            let p = Parameter::bits20(47, hb, 48, 49);
            assert_eq!(p.max(), 0xf_ffff);
            for v in 0..=p.max() {
                assert_eq!(p.unpack(p.pack(v)), v);
            }
        }
        assert_eq!(Parameter::bits20(0, HighBits::HighNibble, 1, 2).pack(0xa_0000)[0], 0xa0);
        assert_eq!(Parameter::bits20(0, HighBits::LowNibble, 1, 2).pack(0xa_0000)[0], 0x0a);
    }

    #[test]
    fn round_trip_through_registers_with_foreign_bits() {
        let mut regs = FakeRegisters::new();
        // output divider and divide-by-4 share the P1 byte
        regs.set(44, 0b0101_1100);
        let p = Parameter::bits18(44, 45, 46);
        for v in (0..=p.max()).step_by(97).chain(Some(p.max())) {
            p.write(&mut regs, v).unwrap();
            assert_eq!(p.read(&mut regs).unwrap(), v);
            assert_eq!(regs.get(44) & 0b0111_1100, 0b0101_1100);
        }
    }

    #[test]
    fn shared_nibbles_do_not_disturb_each_other() {
        let mut regs = FakeRegisters::default();
        let layout = MultisynthLayout::at(26);

        layout.p3.write(&mut regs, 0xf_ffff).unwrap();
        layout.p2.write(&mut regs, 0x5_0000).unwrap();
        assert_eq!(layout.p3.read(&mut regs).unwrap(), 0xf_ffff);
        assert_eq!(layout.p2.read(&mut regs).unwrap(), 0x5_0000);

        layout.p3.write(&mut regs, 0).unwrap();
        assert_eq!(layout.p2.read(&mut regs).unwrap(), 0x5_0000);
        assert_eq!(regs.get(31), 0x05);
    }

    #[test]
    fn shared_lane_uses_masked_write() {
        let mut regs = FakeRegisters::new();
        Parameter::bits18(28, 29, 30).write(&mut regs, 0x1_2345).unwrap();
        assert_eq!(
            regs.writes(),
            &[
                Access::Masked(28, 0x01, 0b11),
                Access::Write(29, 0x23),
                Access::Write(30, 0x45),
            ][..]
        );
    }

    #[test]
    fn multisynth_addresses() {
        assert_eq!(FeedbackMultisynth::MSNA.base_addr(), 26);
        assert_eq!(FeedbackMultisynth::MSNB.base_addr(), 34);
        assert_eq!(Multisynth::MS0.base_addr(), 42);
        assert_eq!(Multisynth::MS5.base_addr(), 82);
        let l = Multisynth::MS1.layout();
        assert_eq!(l.p1, Parameter::bits18(52, 53, 54));
        assert_eq!(l.p3.mid, 50);
        assert_eq!(l.p2.shared, 55);
    }

    #[test]
    fn params_from_triple() {
        // 36 + 0/1
        let p = FeedbackParams::from_triple(RationalTriple { a: 36, b: 0, c: 1 });
        assert_eq!(p, FeedbackParams { p1: 128 * 36 - 512, p2: 0, p3: 1 });

        // 10 + 1/2: floor(64) -> p1 = 1280 + 64 - 512, p2 = 128 - 128
        let p = FeedbackParams::from_triple(RationalTriple { a: 10, b: 1, c: 2 });
        assert_eq!(p, FeedbackParams { p1: 832, p2: 0, p3: 2 });

        // 25 + 3/5: floor(384/5) = 76, p2 = 384 - 380
        let p = FeedbackParams::from_triple(RationalTriple { a: 25, b: 3, c: 5 });
        assert_eq!(p, FeedbackParams { p1: 3200 + 76 - 512, p2: 4, p3: 5 });
    }

    #[test]
    fn layout_round_trip() {
        let mut regs = FakeRegisters::new();
        let params = FeedbackParams { p1: 0x2_1234, p2: 0xa_5678, p3: 0xf_ffff };
        Multisynth::MS3.layout().write(&mut regs, params).unwrap();
        assert_eq!(Multisynth::MS3.layout().read(&mut regs).unwrap(), params);
    }
}
