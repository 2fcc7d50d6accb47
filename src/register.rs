/*
   Copyright 2018 Ilya Epifanov

   Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
   http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
   http://opensource.org/licenses/MIT>, at your option. This file may not be
   copied, modified, or distributed except according to those terms.
*/
//! Register map and byte-level register access.

use crate::hal::blocking::i2c::{Write, WriteRead};

/// Seven bit I²C address with the A0 pin low.
pub const ADDRESS: u8 = 0b0110_0000;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Register {
    DeviceStatus = 0,
    OutputEnable = 3,
    Clk0 = 16,
    Clk1 = 17,
    Clk2 = 18,
    Clk3 = 19,
    Clk4 = 20,
    Clk5 = 21,
    Clk6 = 22,
    Clk7 = 23,
    MSNA = 26,
    MSNB = 34,
    MS0 = 42,
    MS6Divider = 90,
    MS7Divider = 91,
    Clk67OutputDivider = 92,
    PLLReset = 177,
    CrystalLoad = 183,
}

impl Register {
    pub fn addr(&self) -> u8 {
        *self as u8
    }
}

bitflags! {
    pub struct DeviceStatusBits: u8 {
        const SYS_INIT = 0b1000_0000;
        const LOL_B = 0b0100_0000;
        const LOL_A = 0b0010_0000;
        const LOS_CLKIN = 0b0001_0000;
        const LOS_XTAL = 0b0000_1000;
        const REVID_MASK = 0b0000_0011;
    }
}

impl DeviceStatusBits {
    /// Revision id from bits 1:0 (0 = A, 1 = B).
    pub fn revision(&self) -> u8 {
        (*self & DeviceStatusBits::REVID_MASK).bits()
    }
}

bitflags! {
    pub(crate) struct CrystalLoadBits: u8 {
        const RESERVED = 0b00_010010;
        const CL_MASK = 0b11_000000;
        const CL_6 = 0b01_000000;
        const CL_8 = 0b10_000000;
        const CL_10 = 0b11_000000;
    }
}

bitflags! {
    pub(crate) struct ClockControlBits: u8 {
        const CLK_PDN = 0b1000_0000;
        const MS_INT = 0b0100_0000;
        /// CLK6 and CLK7 only: FBA_INT and FBB_INT.
        const FB_INT = 0b0100_0000;
        const MS_SRC = 0b0010_0000;
        const CLK_INV = 0b0001_0000;
        const CLK_SRC_MASK = 0b0000_1100;
        const CLK_SRC_XTAL = 0b0000_0000;
        const CLK_SRC_CLKIN = 0b0000_0100;
        const CLK_SRC_MS_ALT = 0b0000_1000;
        const CLK_SRC_MS = 0b0000_1100;
        const CLK_DRV_MASK = 0b0000_0011;
        const CLK_DRV_2 = 0b0000_0000;
        const CLK_DRV_4 = 0b0000_0001;
        const CLK_DRV_6 = 0b0000_0010;
        const CLK_DRV_8 = 0b0000_0011;
    }
}

bitflags! {
    pub(crate) struct PLLResetBits: u8 {
        const PLLB_RST = 0b1000_0000;
        const PLLA_RST = 0b0010_0000;
    }
}

bitflags! {
    /// Output divider byte of multisynths 0-5, shared with `MSx_P1[17:16]`.
    pub(crate) struct OutputDividerBits: u8 {
        const R_DIV_MASK = 0b0111_0000;
        const DIVBY4 = 0b0000_1100;
    }
}

bitflags! {
    /// Register 92, output dividers of multisynths 6 and 7.
    pub(crate) struct SimpleOutputDividerBits: u8 {
        const R7_DIV_MASK = 0b0111_0000;
        const R6_DIV_MASK = 0b0000_0111;
    }
}

/// Byte-addressed register access.
///
/// Only bits set in `mask` are modified by `write_register_masked`; the
/// default implementation is a read-modify-write.
pub trait RegisterBus {
    type Error;

    fn read_register(&mut self, addr: u8) -> Result<u8, Self::Error>;
    fn write_register(&mut self, addr: u8, byte: u8) -> Result<(), Self::Error>;

    fn write_register_masked(&mut self, addr: u8, byte: u8, mask: u8) -> Result<(), Self::Error> {
        let current = self.read_register(addr)?;
        self.write_register(addr, (current & !mask) | (byte & mask))
    }
}

/// Register access over a blocking `embedded-hal` I²C bus.
#[derive(Debug)]
pub struct I2cRegisters<I2C> {
    i2c: I2C,
    address: u8,
}

impl<I2C> I2cRegisters<I2C> {
    pub fn new(i2c: I2C, address_bit: bool) -> Self {
        I2cRegisters {
            i2c,
            address: ADDRESS | if address_bit { 1 } else { 0 },
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn release(self) -> I2C {
        self.i2c
    }
}

impl<I2C, E> RegisterBus for I2cRegisters<I2C>
where
    I2C: WriteRead<Error = E> + Write<Error = E>,
{
    type Error = E;

    fn read_register(&mut self, addr: u8) -> Result<u8, E> {
        let mut buffer = [0u8; 1];
        self.i2c.write_read(self.address, &[addr], &mut buffer)?;
        Ok(buffer[0])
    }

    fn write_register(&mut self, addr: u8, byte: u8) -> Result<(), E> {
        log::trace!("reg {} <- {:#010b}", addr, byte);
        self.i2c.write(self.address, &[addr, byte])
    }
}
