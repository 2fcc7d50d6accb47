/*
   Copyright 2018 Ilya Epifanov

   Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
   http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
   http://opensource.org/licenses/MIT>, at your option. This file may not be
   copied, modified, or distributed except according to those terms.
*/
//! Divider chain calculation and PLL sharing for all outputs at once.
//!
//! Each output runs `f_out = f_ref * M / (N * R)`, or `f_ref * M / 4` in
//! divide-by-4 mode. The device has two PLLs, so every enabled output has to
//! settle on one of at most two distinct `M` values.

use crate::codec::{FeedbackParams, FractionalMultisynth};
use crate::rational::{Fraction, RationalTriple};
use crate::register::{
    ClockControlBits, OutputDividerBits, PLLResetBits, Register, RegisterBus,
    SimpleOutputDividerBits,
};
use crate::{
    ClockOutput, DriveStrength, Error, OutputDivider, Outputs, Rejected, SimpleMultisynth, PLL,
};

/// Minimum reference (crystal or CLKIN) frequency
pub const REF_FREQ_MIN: u32 = 10_000_000;
/// Maximum reference frequency
pub const REF_FREQ_MAX: u32 = 40_000_000;

pub const OUT_FREQ_MIN: u32 = 2_289;
pub const OUT_FREQ_MAX: u32 = 200_000_000;

/// At most two distinct enabled outputs may run at or above this.
pub const HIGH_BAND_FREQ_MIN: u32 = 112_500_000;

/// Outputs at or above this bypass N and R.
pub const DIVIDE_BY_4_FREQ_MIN: u32 = 150_000_000;

pub const VCO_FREQ_MIN: u64 = 600_000_000;
pub const VCO_FREQ_MAX: u64 = 900_000_000;

pub const MS_DIVIDER_MIN: u64 = 8;
pub const MS_DIVIDER_MAX: u64 = 2048;

/// Integer multisynth divider for outputs above `VCO_FREQ_MAX / 8`.
pub const MS_DIVIDER_HIGH_BAND: u64 = 6;

/// Multisynths 6 and 7 only divide by even integers.
pub const SIMPLE_MS_DIVIDER_MIN: u64 = 6;
pub const SIMPLE_MS_DIVIDER_MAX: u64 = 254;

/// `VCO_FREQ_MIN / (254 * 128)`, rounded up
pub const SIMPLE_OUT_FREQ_MIN: u32 = 18_455;
/// `VCO_FREQ_MAX / 6`
pub const SIMPLE_OUT_FREQ_MAX: u32 = 150_000_000;

/// Largest `b` and `c` of the 20 bit fractional fields.
pub const MAX_DENOMINATOR: u32 = 1_048_575;

const MAX_OUTPUTS: usize = 8;

fn ceil_div(a: u64, b: u64) -> u64 {
    (a + b - 1) / b
}

/// Result of the divider search for a single output.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Synthesis {
    /// PLL feedback multiplier
    pub m: Fraction,
    /// Multisynth divider, zero in divide-by-4 mode
    pub n: Fraction,
    pub r: OutputDivider,
    pub divide_by_4: bool,
    /// The multisynth can run in integer mode (`MS_INT`).
    pub integer_mode: bool,
    pub rigidity: Rigidity,
}

/// How readily an output follows another output's PLL multiplier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Rigidity {
    /// Any multiplier in the VCO band, with a fractional divider if needed.
    Free,
    /// Only multipliers that leave an even integer divider (multisynths 6 and 7).
    EvenDivider,
    /// `m` follows from the output frequency alone.
    Pinned,
}

impl Synthesis {
    pub fn vco_frequency(&self, xtal_freq: u32) -> f64 {
        self.m.to_f64() * xtal_freq as f64
    }

    pub fn output_frequency(&self, xtal_freq: u32) -> f64 {
        let vco = self.vco_frequency(xtal_freq);
        if self.divide_by_4 {
            vco / 4.0
        } else {
            vco / (self.n.to_f64() * self.r.denominator() as f64)
        }
    }
}

/// The divider search ran out of candidates for this output frequency.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UnsatisfiableDivider(pub u32);

impl<E> From<UnsatisfiableDivider> for Error<E> {
    fn from(e: UnsatisfiableDivider) -> Self {
        Error::UnsatisfiableDivider(e.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Channel {
    pub enabled: bool,
    pub frequency: u32,
    pub drive: DriveStrength,
}

impl Default for Channel {
    fn default() -> Self {
        Channel {
            enabled: false,
            frequency: 10_000,
            drive: DriveStrength::Output8mA,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ChannelPlan {
    pub synthesis: Synthesis,
    pub pll: PLL,
}

/// Everything `apply` writes, computed without touching the bus.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Multipliers of PLL A and PLL B
    pub plls: [Option<Fraction>; 2],
    pub channels: [Option<ChannelPlan>; MAX_OUTPUTS],
}

impl Plan {
    pub fn channel(&self, clk: ClockOutput) -> Option<&ChannelPlan> {
        self.channels[clk.ix() as usize].as_ref()
    }

    pub fn multiplier(&self, pll: PLL) -> Option<Fraction> {
        self.plls[pll as usize]
    }

    fn enabled_mask(&self) -> u8 {
        self.channels
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_some())
            .fold(0, |mask, (ix, _)| mask | 1 << ix)
    }
}

/// Distinct multipliers in order of first appearance.
#[derive(Debug, Copy, Clone)]
struct Multipliers {
    values: [Fraction; MAX_OUTPUTS],
    len: usize,
}

impl Multipliers {
    fn collect(results: &[Option<Synthesis>]) -> Self {
        let mut set = Multipliers {
            values: [Fraction::from_integer(0); MAX_OUTPUTS],
            len: 0,
        };
        for s in results.iter().flatten() {
            if !set.as_slice().contains(&s.m) {
                set.values[set.len] = s.m;
                set.len += 1;
            }
        }
        set
    }

    fn as_slice(&self) -> &[Fraction] {
        &self.values[..self.len]
    }

    fn as_mut_slice(&mut self) -> &mut [Fraction] {
        &mut self.values[..self.len]
    }
}

/// Smallest output divider that keeps `vco / (freq * R)` at or below
/// `max_divider`.
pub fn min_output_divider(vco: u64, freq: u32, max_divider: u64) -> Option<OutputDivider> {
    OutputDivider::min_divider(ceil_div(vco, max_divider * freq as u64))
}

/// Picks the two PLL multipliers when the outputs want more than two.
///
/// Multipliers of the least flexible outputs come first, then the ones
/// shared by the most integer-mode outputs, then the larger value.
pub fn select_pll_multipliers(results: &[Option<Synthesis>]) -> [Fraction; 2] {
    let mut distinct = Multipliers::collect(results);
    let rank = |m: &Fraction| {
        let mut rigidity = Rigidity::Free;
        let mut integer = 0;
        for s in results.iter().flatten().filter(|s| s.m == *m) {
            rigidity = rigidity.max(s.rigidity);
            integer += s.integer_mode as usize;
        }
        (rigidity, integer, *m)
    };
    distinct
        .as_mut_slice()
        .sort_unstable_by(|a, b| rank(b).cmp(&rank(a)));

    let chosen = distinct.as_slice();
    match chosen.len() {
        0 => [Fraction::from_integer(0); 2],
        1 => [chosen[0]; 2],
        _ => [chosen[0], chosen[1]],
    }
}

/// Choice between an output recomputed on the first and on the second
/// chosen PLL: integer mode wins, otherwise the higher multiplier.
pub fn prefer_shared(first: Option<Synthesis>, second: Option<Synthesis>) -> Option<Synthesis> {
    match (first, second) {
        (Some(a), _) if a.integer_mode => Some(a),
        (_, Some(b)) if b.integer_mode => Some(b),
        (Some(a), Some(b)) => Some(if b.m > a.m { b } else { a }),
        (a, b) => a.or(b),
    }
}

fn pinned(synthesis: Synthesis, forced_m: Option<Fraction>) -> Option<Synthesis> {
    match forced_m {
        Some(m) if m != synthesis.m => None,
        _ => Some(synthesis),
    }
}

/// Owns the reference frequency and the output table, and turns them into
/// register values.
#[derive(Debug, Clone)]
pub struct MultiSynthConfigurator {
    xtal_freq: u32,
    outputs: Outputs,
    channels: [Channel; MAX_OUTPUTS],
}

impl MultiSynthConfigurator {
    pub fn new(xtal_freq: u32, outputs: Outputs) -> Result<Self, Rejected> {
        if !(REF_FREQ_MIN..=REF_FREQ_MAX).contains(&xtal_freq) {
            return Err(Rejected::ReferenceFrequency(xtal_freq));
        }

        Ok(MultiSynthConfigurator {
            xtal_freq,
            outputs,
            channels: [Channel::default(); MAX_OUTPUTS],
        })
    }

    pub fn xtal_freq(&self) -> u32 {
        self.xtal_freq
    }

    pub fn outputs(&self) -> Outputs {
        self.outputs
    }

    pub fn channel(&self, clk: ClockOutput) -> &Channel {
        &self.channels[clk.ix() as usize]
    }

    fn clocks(&self) -> &'static [ClockOutput] {
        &ClockOutput::ALL[..self.outputs.count()]
    }

    fn enabled(&self) -> impl Iterator<Item = (ClockOutput, Channel)> + '_ {
        self.clocks()
            .iter()
            .map(move |&clk| (clk, *self.channel(clk)))
            .filter(|(_, ch)| ch.enabled)
    }

    fn check_output(&self, clk: ClockOutput) -> Result<usize, Rejected> {
        if self.outputs.contains(clk) {
            Ok(clk.ix() as usize)
        } else {
            Err(Rejected::ClockOutput(clk))
        }
    }

    /// Only two distinct enabled frequencies may sit in the high band.
    fn check_high_band(&self, clk: ClockOutput, freq: u32) -> Result<(), Rejected> {
        if freq < HIGH_BAND_FREQ_MIN {
            return Ok(());
        }

        let mut seen = [0u32; MAX_OUTPUTS];
        let mut count = 0;
        for (other, ch) in self.enabled() {
            if other != clk && ch.frequency >= HIGH_BAND_FREQ_MIN && !seen[..count].contains(&ch.frequency) {
                seen[count] = ch.frequency;
                count += 1;
            }
        }

        if count >= 2 && !seen[..count].contains(&freq) {
            Err(Rejected::HighFrequencyLimit)
        } else {
            Ok(())
        }
    }

    pub fn set_enabled(&mut self, clk: ClockOutput, enabled: bool) -> Result<(), Rejected> {
        let ix = self.check_output(clk)?;
        if enabled {
            self.check_high_band(clk, self.channels[ix].frequency)?;
        }
        self.channels[ix].enabled = enabled;
        Ok(())
    }

    pub fn set_frequency(&mut self, clk: ClockOutput, freq: u32) -> Result<(), Rejected> {
        let ix = self.check_output(clk)?;
        let range = if clk.is_simple() {
            SIMPLE_OUT_FREQ_MIN..=SIMPLE_OUT_FREQ_MAX
        } else {
            OUT_FREQ_MIN..=OUT_FREQ_MAX
        };
        if !range.contains(&freq) {
            return Err(Rejected::OutputFrequency(freq));
        }
        if self.channels[ix].enabled {
            self.check_high_band(clk, freq)?;
        }
        self.channels[ix].frequency = freq;
        Ok(())
    }

    pub fn set_drive_strength(&mut self, clk: ClockOutput, drive: DriveStrength) -> Result<(), Rejected> {
        let ix = self.check_output(clk)?;
        self.channels[ix].drive = drive;
        Ok(())
    }

    /// Finds `M`, `N` and `R` for `freq` on `clk`, optionally with `M`
    /// fixed to another output's PLL multiplier.
    pub fn calculate(&self, clk: ClockOutput, freq: u32, forced_m: Option<Fraction>) -> Option<Synthesis> {
        if clk.is_simple() {
            self.calculate_integer(freq, forced_m)
        } else if freq >= DIVIDE_BY_4_FREQ_MIN {
            self.calculate_divide_by_4(freq, forced_m)
        } else if MS_DIVIDER_MIN * freq as u64 > VCO_FREQ_MAX {
            self.calculate_high_band(freq, forced_m)
        } else {
            self.calculate_fractional(freq, forced_m)
        }
    }

    fn calculate_divide_by_4(&self, freq: u32, forced_m: Option<Fraction>) -> Option<Synthesis> {
        let m = Fraction::new(4 * freq as u64, self.xtal_freq as u64);
        pinned(
            Synthesis {
                m,
                n: Fraction::from_integer(0),
                r: OutputDivider::Div1,
                divide_by_4: true,
                integer_mode: m.is_integer(),
                rigidity: Rigidity::Pinned,
            },
            forced_m,
        )
    }

    fn calculate_high_band(&self, freq: u32, forced_m: Option<Fraction>) -> Option<Synthesis> {
        let m = Fraction::new(MS_DIVIDER_HIGH_BAND * freq as u64, self.xtal_freq as u64);
        pinned(
            Synthesis {
                m,
                n: Fraction::from_integer(MS_DIVIDER_HIGH_BAND),
                r: OutputDivider::Div1,
                divide_by_4: false,
                integer_mode: true,
                rigidity: Rigidity::Pinned,
            },
            forced_m,
        )
    }

    fn calculate_fractional(&self, freq: u32, forced_m: Option<Fraction>) -> Option<Synthesis> {
        let xtal = self.xtal_freq as u64;
        let m_min = ceil_div(VCO_FREQ_MIN, xtal);
        let m_max = VCO_FREQ_MAX / xtal;

        let lowest_vco = match forced_m {
            Some(m) => m.scale(xtal).ceil(),
            None => m_min * xtal,
        };
        let r = min_output_divider(lowest_vco, freq, MS_DIVIDER_MAX)?;

        let with_m = |m: Fraction| {
            let n = Fraction::new(
                xtal * m.numer(),
                m.denom() * freq as u64 * r.denominator() as u64,
            );
            if !n.within(MS_DIVIDER_MIN, MS_DIVIDER_MAX) {
                return None;
            }
            Some(Synthesis {
                m,
                n,
                r,
                divide_by_4: false,
                integer_mode: n.is_integer(),
                rigidity: Rigidity::Free,
            })
        };

        if let Some(m) = forced_m {
            return with_m(m);
        }

        // highest VCO first for the best resolution
        let mut fallback = None;
        for m in (m_min..=m_max).rev() {
            if let Some(s) = with_m(Fraction::from_integer(m)) {
                if s.integer_mode {
                    return Some(s);
                }
                fallback = fallback.or(Some(s));
            }
        }

        // no integer multiplier reaches N >= 8; run the VCO at its maximum
        fallback.or_else(|| with_m(Fraction::new(VCO_FREQ_MAX, xtal)))
    }

    /// Multisynths 6 and 7: even integer divider, the PLL takes the fraction.
    fn calculate_integer(&self, freq: u32, forced_m: Option<Fraction>) -> Option<Synthesis> {
        let xtal = self.xtal_freq as u64;
        let f = freq as u64;

        let with_n = |m: Fraction, n: u64, r: OutputDivider| Synthesis {
            m,
            n: Fraction::from_integer(n),
            r,
            divide_by_4: false,
            integer_mode: true,
            rigidity: Rigidity::EvenDivider,
        };

        if let Some(m) = forced_m {
            let vco = m.scale(xtal);
            let r = min_output_divider(vco.ceil(), freq, SIMPLE_MS_DIVIDER_MAX)?;
            let n = Fraction::new(vco.numer(), vco.denom() * f * r.denominator() as u64);
            let even = n.is_integer() && n.floor() % 2 == 0;
            return if even && n.within(SIMPLE_MS_DIVIDER_MIN, SIMPLE_MS_DIVIDER_MAX) {
                Some(with_n(m, n.floor(), r))
            } else {
                None
            };
        }

        let r = min_output_divider(VCO_FREQ_MIN, freq, SIMPLE_MS_DIVIDER_MAX)?;
        let step = f * r.denominator() as u64;
        let n_min = ceil_div(VCO_FREQ_MIN, step).max(SIMPLE_MS_DIVIDER_MIN);
        let mut n = (VCO_FREQ_MAX / step).min(SIMPLE_MS_DIVIDER_MAX);
        n -= n % 2;

        let mut fallback = None;
        while n >= n_min {
            let m = Fraction::new(n * step, xtal);
            if m.is_integer() {
                return Some(with_n(m, n, r));
            }
            fallback = fallback.or(Some(with_n(m, n, r)));
            n -= 2;
        }
        fallback
    }

    /// Recomputes every output whose multiplier is not one of `chosen`.
    fn resolve_shared(
        &self,
        results: &mut [Option<Synthesis>; MAX_OUTPUTS],
        chosen: [Fraction; 2],
    ) -> Result<(), UnsatisfiableDivider> {
        for (clk, ch) in self.enabled() {
            let ix = clk.ix() as usize;
            match results[ix] {
                Some(s) if !chosen.contains(&s.m) => {}
                _ => continue,
            }

            let first = self.calculate(clk, ch.frequency, Some(chosen[0]));
            let second = self.calculate(clk, ch.frequency, Some(chosen[1]));
            let s = prefer_shared(first, second).ok_or(UnsatisfiableDivider(ch.frequency))?;
            if !s.integer_mode {
                log::warn!("{:?}: {} Hz falls back to fractional N on M = {}", clk, ch.frequency, s.m);
            }
            results[ix] = Some(s);
        }
        Ok(())
    }

    /// Runs the divider search and PLL sharing for all enabled outputs.
    pub fn plan(&self) -> Result<Plan, UnsatisfiableDivider> {
        let mut results = [None; MAX_OUTPUTS];
        for (clk, ch) in self.enabled() {
            let s = self
                .calculate(clk, ch.frequency, None)
                .ok_or(UnsatisfiableDivider(ch.frequency))?;
            log::debug!("{:?}: {} Hz -> M = {}, N = {}, R = {:?}", clk, ch.frequency, s.m, s.n, s.r);
            results[clk.ix() as usize] = Some(s);
        }

        if Multipliers::collect(&results).len > 2 {
            let chosen = select_pll_multipliers(&results);
            log::debug!("sharing PLLs on M = {} and M = {}", chosen[0], chosen[1]);
            self.resolve_shared(&mut results, chosen)?;
        }

        let distinct = Multipliers::collect(&results);
        if distinct.len > 2 {
            let ch = self.enabled().find(|(clk, _)| {
                results[clk.ix() as usize].map_or(false, |s| !distinct.as_slice()[..2].contains(&s.m))
            });
            return Err(UnsatisfiableDivider(ch.map_or(0, |(_, ch)| ch.frequency)));
        }

        let mut plan = Plan::default();
        for (slot, &m) in plan.plls.iter_mut().zip(distinct.as_slice()) {
            *slot = Some(m);
        }
        for (ix, s) in results.iter().enumerate() {
            if let Some(s) = *s {
                let pll = if plan.plls[0] == Some(s.m) { PLL::A } else { PLL::B };
                plan.channels[ix] = Some(ChannelPlan { synthesis: s, pll });
            }
        }
        Ok(plan)
    }

    /// Recomputes and writes every PLL and output, in that order.
    ///
    /// A bus error aborts the pass and leaves the device partially updated.
    pub fn apply<B: RegisterBus>(&self, bus: &mut B) -> Result<Plan, Error<B::Error>> {
        if self.enabled().next().is_none() {
            log::debug!("all outputs disabled");
            bus.write_register(Register::OutputEnable.addr(), 0xff)
                .map_err(Error::CommunicationError)?;
            return Ok(Plan::default());
        }

        let plan = self.plan()?;
        self.program(bus, &plan).map_err(Error::CommunicationError)?;
        Ok(plan)
    }

    fn program<B: RegisterBus>(&self, bus: &mut B, plan: &Plan) -> Result<(), B::Error> {
        let mut reset = PLLResetBits::empty();
        for (&pll, m) in [PLL::A, PLL::B].iter().zip(plan.plls.iter()) {
            if let Some(m) = *m {
                let params = FeedbackParams::from_triple(RationalTriple::from_fraction(m, MAX_DENOMINATOR));
                pll.multisynth().layout().write(bus, params)?;
                reset |= pll.reset_bits();
            }
        }

        for &clk in self.clocks() {
            match plan.channel(clk) {
                Some(cp) => self.write_channel(bus, clk, cp, plan)?,
                None => bus.write_register_masked(
                    clk.register().addr(),
                    ClockControlBits::CLK_PDN.bits(),
                    ClockControlBits::CLK_PDN.bits(),
                )?,
            }
        }

        bus.write_register(Register::OutputEnable.addr(), !plan.enabled_mask())?;
        bus.write_register_masked(Register::PLLReset.addr(), reset.bits(), PLLResetBits::all().bits())
    }

    fn write_channel<B: RegisterBus>(
        &self,
        bus: &mut B,
        clk: ClockOutput,
        cp: &ChannelPlan,
        plan: &Plan,
    ) -> Result<(), B::Error> {
        let s = &cp.synthesis;

        let mut control = ClockControlBits::CLK_SRC_MS | self.channel(clk).drive.control_bits();
        match clk.simple_multisynth() {
            // bit 6 of CLK6/CLK7 is the PLL A/B feedback integer mode
            Some(simple) => {
                let feedback = match simple {
                    SimpleMultisynth::MS6 => plan.multiplier(PLL::A),
                    SimpleMultisynth::MS7 => plan.multiplier(PLL::B),
                };
                control.set(ClockControlBits::FB_INT, feedback.map_or(false, |m| m.is_integer()));
            }
            None => control.set(ClockControlBits::MS_INT, s.integer_mode),
        }
        control.set(ClockControlBits::MS_SRC, cp.pll == PLL::B);
        // keep CLK_INV
        let mask = ClockControlBits::all() - ClockControlBits::CLK_INV;
        bus.write_register_masked(clk.register().addr(), control.bits(), mask.bits())?;

        match (clk.multisynth(), clk.simple_multisynth()) {
            (Some(ms), _) => {
                let params = if s.divide_by_4 {
                    FeedbackParams::divide_by_4()
                } else {
                    FeedbackParams::from_triple(RationalTriple::from_fraction(s.n, MAX_DENOMINATOR))
                };
                let layout = ms.layout();
                layout.write(bus, params)?;

                let mut divider = OutputDividerBits::from_bits_truncate(s.r.bits() << 4);
                divider.set(OutputDividerBits::DIVBY4, s.divide_by_4);
                bus.write_register_masked(layout.p1.shared, divider.bits(), OutputDividerBits::all().bits())
            }
            (None, Some(simple)) => {
                bus.write_register(simple.base_addr(), s.n.floor() as u8)?;
                let (bits, mask) = match simple {
                    SimpleMultisynth::MS6 => (s.r.bits(), SimpleOutputDividerBits::R6_DIV_MASK),
                    SimpleMultisynth::MS7 => (s.r.bits() << 4, SimpleOutputDividerBits::R7_DIV_MASK),
                };
                bus.write_register_masked(Register::Clk67OutputDivider.addr(), bits, mask.bits())
            }
            (None, None) => Ok(()),
        }
    }
}
