/*
   Copyright 2018 Ilya Epifanov

   Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
   http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
   http://opensource.org/licenses/MIT>, at your option. This file may not be
   copied, modified, or distributed except according to those terms.
*/
//! In-memory register file and I²C peripheral for tests.

use std::vec::Vec;

use crate::hal::blocking::i2c::{Write, WriteRead};
use crate::register::RegisterBus;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Access {
    Write(u8, u8),
    /// address, data, mask
    Masked(u8, u8, u8),
}

impl Access {
    pub fn addr(&self) -> u8 {
        match *self {
            Access::Write(addr, _) | Access::Masked(addr, _, _) => addr,
        }
    }
}

/// Records every write request at the `RegisterBus` level.
pub struct FakeRegisters {
    regs: [u8; 256],
    log: Vec<Access>,
    reads: usize,
    fail_after: Option<usize>,
}

impl Default for FakeRegisters {
    fn default() -> Self {
        FakeRegisters::new()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct BusFault;

impl FakeRegisters {
    pub fn new() -> Self {
        FakeRegisters {
            regs: [0; 256],
            log: Vec::new(),
            reads: 0,
            fail_after: None,
        }
    }

    /// Fails every write once `writes` writes have gone through.
    pub fn failing_after(writes: usize) -> Self {
        FakeRegisters {
            fail_after: Some(writes),
            ..FakeRegisters::new()
        }
    }

    pub fn set(&mut self, addr: u8, byte: u8) {
        self.regs[addr as usize] = byte;
    }

    pub fn get(&self, addr: u8) -> u8 {
        self.regs[addr as usize]
    }

    pub fn writes(&self) -> &[Access] {
        &self.log
    }

    pub fn reads(&self) -> usize {
        self.reads
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
        self.reads = 0;
    }

    fn check(&self) -> Result<(), BusFault> {
        match self.fail_after {
            Some(n) if self.log.len() >= n => Err(BusFault),
            _ => Ok(()),
        }
    }
}

impl RegisterBus for FakeRegisters {
    type Error = BusFault;

    fn read_register(&mut self, addr: u8) -> Result<u8, BusFault> {
        self.reads += 1;
        Ok(self.regs[addr as usize])
    }

    fn write_register(&mut self, addr: u8, byte: u8) -> Result<(), BusFault> {
        self.check()?;
        self.log.push(Access::Write(addr, byte));
        self.regs[addr as usize] = byte;
        Ok(())
    }

    fn write_register_masked(&mut self, addr: u8, byte: u8, mask: u8) -> Result<(), BusFault> {
        self.check()?;
        self.log.push(Access::Masked(addr, byte, mask));
        let current = self.regs[addr as usize];
        self.regs[addr as usize] = (current & !mask) | (byte & mask);
        Ok(())
    }
}

/// A single-device I²C bus: `[reg, data..]` writes with auto-increment,
/// `write_read` of `[reg]`.
pub struct FakeI2c {
    pub address: u8,
    pub regs: [u8; 256],
}

#[derive(Debug, PartialEq, Eq)]
pub enum I2cFault {
    Nack(u8),
}

impl FakeI2c {
    pub fn new(address: u8) -> Self {
        FakeI2c {
            address,
            regs: [0; 256],
        }
    }
}

impl Write for FakeI2c {
    type Error = I2cFault;

    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), I2cFault> {
        if address != self.address {
            return Err(I2cFault::Nack(address));
        }
        if let Some((&reg, data)) = bytes.split_first() {
            for (i, &b) in data.iter().enumerate() {
                self.regs[reg as usize + i] = b;
            }
        }
        Ok(())
    }
}

impl WriteRead for FakeI2c {
    type Error = I2cFault;

    fn write_read(&mut self, address: u8, bytes: &[u8], buffer: &mut [u8]) -> Result<(), I2cFault> {
        if address != self.address {
            return Err(I2cFault::Nack(address));
        }
        let reg = bytes.first().copied().unwrap_or(0) as usize;
        for (i, b) in buffer.iter_mut().enumerate() {
            *b = self.regs[reg + i];
        }
        // SYS_INIT clears itself once read
        if reg == 0 {
            self.regs[0] &= 0b0111_1111;
        }
        Ok(())
    }
}
