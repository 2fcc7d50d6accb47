/*
   Copyright 2018 Ilya Epifanov

   Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
   http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
   http://opensource.org/licenses/MIT>, at your option. This file may not be
   copied, modified, or distributed except according to those terms.
*/
/*!
A platform agnostic Rust driver for the [Si5351], based on the
[`embedded-hal`] traits, that plans all outputs at once.

## The Device

The Silicon Labs [Si5351] is an any-frequency CMOS clock generator with two
PLLs feeding up to eight multisynth outputs.

The device has an I²C interface.

## Frequency planning

Every output runs `f_out = f_ref * M / (N * R)`. Outputs are configured
first and written together by `apply`, which searches `M`, `N` and `R` for
each enabled output and makes the outputs share the two PLLs, preferring
integer dividers. Outputs at 150 MHz and above use divide-by-4 mode.

## Usage

Instantiate the device with an `embedded_hal` I²C implementation:

```ignore
use si5351_synth::{ClockOutput, CrystalLoad, Outputs, Si5351, Si5351Device};

let mut clock = Si5351Device::new(i2c, false, 25_000_000, Outputs::Three)?;
clock.init(CrystalLoad::_10)?;
```

Or, if you have an [Adafruit module], you can use shortcut functions to initializate it:

```ignore
let mut clock = Si5351Device::new_adafruit_module(i2c)?;
clock.init_adafruit_module()?;
```

Then configure the outputs and write them:

```ignore
clock.set_frequency(ClockOutput::Clk0, 14_175_000)?;
clock.set_clock_enabled(ClockOutput::Clk0, true)?;
clock.set_frequency(ClockOutput::Clk1, 200_000_000)?;
clock.set_clock_enabled(ClockOutput::Clk1, true)?;
clock.apply()?;
```

The divider search itself is available without a device through
[`synth::MultiSynthConfigurator`].

[Si5351]: https://www.silabs.com/documents/public/data-sheets/Si5351-B.pdf
[`embedded-hal`]: https://github.com/japaric/embedded-hal
[Adafruit module]: https://www.adafruit.com/product/2045
*/
#![cfg_attr(not(test), no_std)]
#![deny(missing_debug_implementations)]

#[macro_use]
extern crate bitflags;
use embedded_hal as hal;

use core::fmt;

use crate::hal::blocking::i2c::{Write, WriteRead};

pub mod codec;
pub mod rational;
pub mod register;
pub mod synth;

#[cfg(test)]
mod testing;

use crate::register::{
    ClockControlBits, CrystalLoadBits, I2cRegisters, PLLResetBits, Register, RegisterBus,
};
use crate::synth::{MultiSynthConfigurator, Plan};

pub use crate::register::DeviceStatusBits;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error<E> {
    CommunicationError(E),
    Rejected(Rejected),
    /// No divider chain reaches this output frequency (Hz).
    UnsatisfiableDivider(u32),
}

/// A configuration change that was refused; nothing was modified.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Rejected {
    ReferenceFrequency(u32),
    OutputFrequency(u32),
    /// A third distinct frequency of 112.5 MHz or more.
    HighFrequencyLimit,
    /// The output does not exist on this device variant.
    ClockOutput(ClockOutput),
}

impl<E> From<Rejected> for Error<E> {
    fn from(e: Rejected) -> Self {
        Error::Rejected(e)
    }
}

impl fmt::Display for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Rejected::ReferenceFrequency(freq) => write!(f, "Reference frequency {} Hz out of range", freq),
            Rejected::OutputFrequency(freq) => write!(f, "Output frequency {} Hz out of range", freq),
            Rejected::HighFrequencyLimit => write!(f, "Too many outputs above 112.5 MHz"),
            Rejected::ClockOutput(clk) => write!(f, "No such output: {:?}", clk),
        }
    }
}

impl<E: fmt::Debug> fmt::Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::CommunicationError(e) => write!(f, "Communication Error: {:?}", e),
            Error::Rejected(r) => write!(f, "Rejected: {}", r),
            Error::UnsatisfiableDivider(freq) => write!(f, "No divider for {} Hz", freq),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CrystalLoad {
    _6,
    _8,
    _10,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PLL {
    A,
    B,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FeedbackMultisynth {
    MSNA,
    MSNB,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Multisynth {
    MS0,
    MS1,
    MS2,
    MS3,
    MS4,
    MS5,
}

/// Integer-only multisynths of the 8 output variant.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SimpleMultisynth {
    MS6,
    MS7,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ClockOutput {
    Clk0 = 0,
    Clk1,
    Clk2,
    Clk3,
    Clk4,
    Clk5,
    Clk6,
    Clk7,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OutputDivider {
    Div1 = 0,
    Div2,
    Div4,
    Div8,
    Div16,
    Div32,
    Div64,
    Div128,
}

/// Output driver current.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DriveStrength {
    Output2mA,
    Output4mA,
    Output6mA,
    Output8mA,
}

/// Device variant by number of outputs (Si5351A 10-MSOP, 20-QFN, 20-QFN B/C).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Outputs {
    Three,
    Four,
    Eight,
}

impl PLL {
    pub fn multisynth(&self) -> FeedbackMultisynth {
        match *self {
            PLL::A => FeedbackMultisynth::MSNA,
            PLL::B => FeedbackMultisynth::MSNB,
        }
    }

    pub(crate) fn reset_bits(&self) -> PLLResetBits {
        match *self {
            PLL::A => PLLResetBits::PLLA_RST,
            PLL::B => PLLResetBits::PLLB_RST,
        }
    }
}

impl SimpleMultisynth {
    pub fn base_addr(&self) -> u8 {
        self.register().addr()
    }

    fn register(&self) -> Register {
        match *self {
            SimpleMultisynth::MS6 => Register::MS6Divider,
            SimpleMultisynth::MS7 => Register::MS7Divider,
        }
    }
}

impl ClockOutput {
    pub const ALL: [ClockOutput; 8] = [
        ClockOutput::Clk0,
        ClockOutput::Clk1,
        ClockOutput::Clk2,
        ClockOutput::Clk3,
        ClockOutput::Clk4,
        ClockOutput::Clk5,
        ClockOutput::Clk6,
        ClockOutput::Clk7,
    ];

    fn register(self) -> Register {
        match self {
            ClockOutput::Clk0 => Register::Clk0,
            ClockOutput::Clk1 => Register::Clk1,
            ClockOutput::Clk2 => Register::Clk2,
            ClockOutput::Clk3 => Register::Clk3,
            ClockOutput::Clk4 => Register::Clk4,
            ClockOutput::Clk5 => Register::Clk5,
            ClockOutput::Clk6 => Register::Clk6,
            ClockOutput::Clk7 => Register::Clk7,
        }
    }

    pub fn ix(&self) -> u8 {
        *self as u8
    }

    /// The fractional multisynth driving this output, if it has one.
    pub fn multisynth(&self) -> Option<Multisynth> {
        match *self {
            ClockOutput::Clk0 => Some(Multisynth::MS0),
            ClockOutput::Clk1 => Some(Multisynth::MS1),
            ClockOutput::Clk2 => Some(Multisynth::MS2),
            ClockOutput::Clk3 => Some(Multisynth::MS3),
            ClockOutput::Clk4 => Some(Multisynth::MS4),
            ClockOutput::Clk5 => Some(Multisynth::MS5),
            ClockOutput::Clk6 | ClockOutput::Clk7 => None,
        }
    }

    pub fn simple_multisynth(&self) -> Option<SimpleMultisynth> {
        match *self {
            ClockOutput::Clk6 => Some(SimpleMultisynth::MS6),
            ClockOutput::Clk7 => Some(SimpleMultisynth::MS7),
            _ => None,
        }
    }

    pub fn is_simple(&self) -> bool {
        self.simple_multisynth().is_some()
    }
}

impl OutputDivider {
    pub fn bits(&self) -> u8 {
        *self as u8
    }

    /// Smallest divider of at least `desired_divider`.
    pub fn min_divider(desired_divider: u64) -> Option<OutputDivider> {
        match 64 - (desired_divider.max(1) - 1).leading_zeros() {
            0 => Some(OutputDivider::Div1),
            1 => Some(OutputDivider::Div2),
            2 => Some(OutputDivider::Div4),
            3 => Some(OutputDivider::Div8),
            4 => Some(OutputDivider::Div16),
            5 => Some(OutputDivider::Div32),
            6 => Some(OutputDivider::Div64),
            7 => Some(OutputDivider::Div128),
            _ => None,
        }
    }

    pub fn denominator(&self) -> u32 {
        1 << self.bits()
    }
}

impl DriveStrength {
    pub(crate) fn control_bits(&self) -> ClockControlBits {
        match *self {
            DriveStrength::Output2mA => ClockControlBits::CLK_DRV_2,
            DriveStrength::Output4mA => ClockControlBits::CLK_DRV_4,
            DriveStrength::Output6mA => ClockControlBits::CLK_DRV_6,
            DriveStrength::Output8mA => ClockControlBits::CLK_DRV_8,
        }
    }
}

impl Outputs {
    pub fn count(&self) -> usize {
        match *self {
            Outputs::Three => 3,
            Outputs::Four => 4,
            Outputs::Eight => 8,
        }
    }

    pub fn contains(&self, clk: ClockOutput) -> bool {
        (clk.ix() as usize) < self.count()
    }
}

/// Si5351 driver
#[derive(Debug)]
pub struct Si5351Device<I2C> {
    bus: I2cRegisters<I2C>,
    synth: MultiSynthConfigurator,
}

pub trait Si5351<E> {
    fn init_adafruit_module(&mut self) -> Result<(), Error<E>>;
    fn init(&mut self, xtal_load: CrystalLoad) -> Result<(), Error<E>>;
    fn read_device_status(&mut self) -> Result<DeviceStatusBits, Error<E>>;

    /// Changes the output frequency; written on the next `apply`.
    fn set_frequency(&mut self, clk: ClockOutput, freq: u32) -> Result<(), Error<E>>;
    fn set_clock_enabled(&mut self, clk: ClockOutput, enabled: bool) -> Result<(), Error<E>>;
    fn set_drive_strength(&mut self, clk: ClockOutput, drive: DriveStrength) -> Result<(), Error<E>>;

    /// Plans and writes all outputs.
    fn apply(&mut self) -> Result<Plan, Error<E>>;
    fn reset_pll(&mut self, pll: PLL) -> Result<(), Error<E>>;
}

impl<I2C, E> Si5351Device<I2C>
where
    I2C: WriteRead<Error = E> + Write<Error = E>,
{
    /// Creates a new driver from a I2C peripheral
    pub fn new(i2c: I2C, address_bit: bool, xtal_freq: u32, outputs: Outputs) -> Result<Self, Error<E>> {
        Ok(Si5351Device {
            bus: I2cRegisters::new(i2c, address_bit),
            synth: MultiSynthConfigurator::new(xtal_freq, outputs)?,
        })
    }

    pub fn new_adafruit_module(i2c: I2C) -> Result<Self, Error<E>> {
        Si5351Device::new(i2c, false, 25_000_000, Outputs::Three)
    }

    pub fn configurator(&self) -> &MultiSynthConfigurator {
        &self.synth
    }

    pub fn release(self) -> I2C {
        self.bus.release()
    }

    fn read_register(&mut self, reg: Register) -> Result<u8, Error<E>> {
        self.bus.read_register(reg.addr()).map_err(Error::CommunicationError)
    }

    fn write_register(&mut self, reg: Register, byte: u8) -> Result<(), Error<E>> {
        self.bus.write_register(reg.addr(), byte).map_err(Error::CommunicationError)
    }
}

impl<I2C, E> Si5351<E> for Si5351Device<I2C>
where
    I2C: WriteRead<Error = E> + Write<Error = E>,
{
    fn init_adafruit_module(&mut self) -> Result<(), Error<E>> {
        self.init(CrystalLoad::_10)
    }

    fn init(&mut self, xtal_load: CrystalLoad) -> Result<(), Error<E>> {
        let device_status = loop {
            let device_status = self.read_device_status()?;
            if !device_status.contains(DeviceStatusBits::SYS_INIT) {
                break device_status;
            }
        };
        log::debug!("si5351 rev {} at {:#04x}", device_status.revision(), self.bus.address());

        self.write_register(Register::OutputEnable, 0xff)?;
        for &clk in ClockOutput::ALL.iter() {
            self.write_register(clk.register(), ClockControlBits::CLK_PDN.bits())?;
        }

        self.write_register(
            Register::CrystalLoad,
            (CrystalLoadBits::RESERVED
                | match xtal_load {
                    CrystalLoad::_6 => CrystalLoadBits::CL_6,
                    CrystalLoad::_8 => CrystalLoadBits::CL_8,
                    CrystalLoad::_10 => CrystalLoadBits::CL_10,
                })
            .bits(),
        )?;

        Ok(())
    }

    fn read_device_status(&mut self) -> Result<DeviceStatusBits, Error<E>> {
        Ok(DeviceStatusBits::from_bits_truncate(
            self.read_register(Register::DeviceStatus)?,
        ))
    }

    fn set_frequency(&mut self, clk: ClockOutput, freq: u32) -> Result<(), Error<E>> {
        Ok(self.synth.set_frequency(clk, freq)?)
    }

    fn set_clock_enabled(&mut self, clk: ClockOutput, enabled: bool) -> Result<(), Error<E>> {
        Ok(self.synth.set_enabled(clk, enabled)?)
    }

    fn set_drive_strength(&mut self, clk: ClockOutput, drive: DriveStrength) -> Result<(), Error<E>> {
        Ok(self.synth.set_drive_strength(clk, drive)?)
    }

    fn apply(&mut self) -> Result<Plan, Error<E>> {
        self.synth.apply(&mut self.bus)
    }

    fn reset_pll(&mut self, pll: PLL) -> Result<(), Error<E>> {
        let bits = pll.reset_bits().bits();
        self.bus
            .write_register_masked(Register::PLLReset.addr(), bits, bits)
            .map_err(Error::CommunicationError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{FeedbackParams, FractionalMultisynth};
    use crate::testing::{FakeI2c, I2cFault};

    fn device() -> Si5351Device<FakeI2c> {
        Si5351Device::new_adafruit_module(FakeI2c::new(0x60)).unwrap()
    }

    #[test]
    fn output_divider_rounds_up_to_power_of_two() {
        assert_eq!(OutputDivider::min_divider(0), Some(OutputDivider::Div1));
        assert_eq!(OutputDivider::min_divider(1), Some(OutputDivider::Div1));
        assert_eq!(OutputDivider::min_divider(3), Some(OutputDivider::Div4));
        assert_eq!(OutputDivider::min_divider(128), Some(OutputDivider::Div128));
        assert_eq!(OutputDivider::min_divider(129), None);
        assert_eq!(OutputDivider::Div32.denominator(), 32);
    }

    #[test]
    fn clock_outputs_map_to_multisynths() {
        assert_eq!(ClockOutput::Clk5.multisynth(), Some(Multisynth::MS5));
        assert_eq!(ClockOutput::Clk6.multisynth(), None);
        assert_eq!(ClockOutput::Clk7.simple_multisynth(), Some(SimpleMultisynth::MS7));
        assert_eq!(SimpleMultisynth::MS6.base_addr(), 90);
        assert!(!Outputs::Four.contains(ClockOutput::Clk4));
        assert!(Outputs::Eight.contains(ClockOutput::Clk7));
    }

    #[test]
    fn init_waits_for_sys_init_and_powers_down() {
        let mut clock = device();
        clock.bus.write_register(0, 0b1000_0001).unwrap();
        clock.init_adafruit_module().unwrap();

        let i2c = clock.release();
        assert_eq!(i2c.regs[3], 0xff);
        for reg in 16..24 {
            assert_eq!(i2c.regs[reg], 0x80);
        }
        assert_eq!(i2c.regs[183], 0b1101_0010);
    }

    #[test]
    fn device_status_bits() {
        let mut i2c = FakeI2c::new(0x61);
        i2c.regs[0] = 0b0011_0001;
        let mut clock = Si5351Device::new(i2c, true, 27_000_000, Outputs::Eight).unwrap();
        let status = clock.read_device_status().unwrap();
        assert!(status.contains(DeviceStatusBits::LOL_A));
        assert!(status.contains(DeviceStatusBits::LOS_CLKIN));
        assert!(!status.contains(DeviceStatusBits::LOL_B));
        assert_eq!(status.revision(), 1);
    }

    #[test]
    fn transport_errors_are_passed_through() {
        let mut clock = Si5351Device::new(FakeI2c::new(0x61), false, 25_000_000, Outputs::Three).unwrap();
        assert_eq!(
            clock.read_device_status(),
            Err(Error::CommunicationError(I2cFault::Nack(0x60)))
        );
    }

    #[test]
    fn rejected_configuration() {
        assert_eq!(
            Si5351Device::new(FakeI2c::new(0x60), false, 8_000_000, Outputs::Three).err(),
            Some(Error::Rejected(Rejected::ReferenceFrequency(8_000_000)))
        );

        let mut clock = device();
        assert_eq!(
            clock.set_frequency(ClockOutput::Clk0, 1_000),
            Err(Error::Rejected(Rejected::OutputFrequency(1_000)))
        );
        assert_eq!(
            clock.set_clock_enabled(ClockOutput::Clk5, true),
            Err(Error::Rejected(Rejected::ClockOutput(ClockOutput::Clk5)))
        );
    }

    #[test]
    fn apply_programs_the_device() {
        let mut clock = device();
        clock.set_frequency(ClockOutput::Clk0, 10_000_000).unwrap();
        clock.set_clock_enabled(ClockOutput::Clk0, true).unwrap();
        clock.set_drive_strength(ClockOutput::Clk0, DriveStrength::Output2mA).unwrap();
        let plan = clock.apply().unwrap();
        assert_eq!(plan.multiplier(PLL::A), Some(rational::Fraction::from_integer(36)));
        assert_eq!(plan.multiplier(PLL::B), None);

        let msna = FeedbackMultisynth::MSNA.layout().read(&mut clock.bus).unwrap();
        assert_eq!(msna, FeedbackParams { p1: 128 * 36 - 512, p2: 0, p3: 1 });

        let i2c = clock.release();
        assert_eq!(i2c.regs[16], 0b0100_1100);
        assert_eq!(i2c.regs[17], 0x80);
        assert_eq!(i2c.regs[3], 0b1111_1110);
        assert_eq!(i2c.regs[177], 0b0010_0000);
    }

    #[test]
    fn reset_single_pll() {
        let mut clock = device();
        clock.bus.write_register(177, 0b0000_0001).unwrap();
        clock.reset_pll(PLL::B).unwrap();
        assert_eq!(clock.release().regs[177], 0b1000_0001);
    }

    #[test]
    fn error_display() {
        use std::string::ToString;
        let e: Error<I2cFault> = Error::UnsatisfiableDivider(2_289);
        assert_eq!(e.to_string(), "No divider for 2289 Hz");
        let e: Error<I2cFault> = Rejected::HighFrequencyLimit.into();
        assert_eq!(e.to_string(), "Rejected: Too many outputs above 112.5 MHz");
    }
}
