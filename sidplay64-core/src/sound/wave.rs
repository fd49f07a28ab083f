// This file is part of sidplay64.
// Copyright (c) 2018-2020 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::sync::Arc;

use super::dac::Dac;
use super::wavetable::WaveTables;
use crate::factory::SidModel;

// ----------------------------------------------------------------------------
// A 24 bit accumulator is the basis for waveform generation. FREQ is added to
// the accumulator each cycle. The noise waveform is taken from intermediate
// bits of a 23 bit shift register clocked by bit 19 of the accumulator; the
// shift is delayed two cycles after bit 19 rises.
//
// When the test bit is set the accumulator is held at zero, the pulse output
// is forced high, and after a model-dependent time the shift register resets
// to all ones. Combined waveforms write their zero bits back into the shift
// register when it is clocked.
// ----------------------------------------------------------------------------

/// Number of cycles after which the waveform output fades to 0 when the
/// waveform register is set to 0.
const FLOATING_OUTPUT_TTL_6581: i32 = 200_000; // ~200ms
const FLOATING_OUTPUT_TTL_8580: i32 = 5_000_000; // ~5s

/// Number of cycles after which the shift register is reset when the test bit
/// is set. Measured on warm chips; varies wildly with temperature, so only
/// the order of magnitude difference between the models is meaningful.
const SHIFT_REGISTER_RESET_6581: i32 = 200_000; // ~200ms
const SHIFT_REGISTER_RESET_8580: i32 = 5_000_000; // ~5s

const DAC_BITS: usize = 12;

pub struct WaveformGenerator {
    // Configuration
    freq: u32,
    pw: u32,
    // Control
    waveform: u32,
    test: bool,
    sync: bool,
    ring_msb_mask: u32,
    // Runtime State
    accumulator: u32,
    msb_rising: bool,
    shift_register: u32,
    shift_pipeline: u32,
    shift_register_reset: i32,
    noise_output: u32,
    no_noise: u32,
    no_noise_or_noise_output: u32,
    no_pulse: u32,
    pulse_output: u32,
    waveform_output: u32,
    osc3: u32,
    tri_saw_pipeline: u32,
    floating_output_ttl: i32,
    // Static Data
    model_wave: Arc<WaveTables>,
    dac: Vec<f32>,
    is6581: bool,
    model_shift_register_reset: i32,
}

impl WaveformGenerator {
    pub fn new(chip_model: SidModel) -> Self {
        let mut wave = WaveformGenerator {
            freq: 0,
            pw: 0,
            waveform: 0,
            test: false,
            sync: false,
            ring_msb_mask: 0,
            // Power-on value with every other bit set.
            accumulator: 0x555555,
            msb_rising: false,
            shift_register: 0x7fffff,
            shift_pipeline: 0,
            shift_register_reset: 0,
            noise_output: 0,
            no_noise: 0xfff,
            no_noise_or_noise_output: 0xfff,
            no_pulse: 0xfff,
            pulse_output: 0xfff,
            waveform_output: 0,
            osc3: 0,
            tri_saw_pipeline: 0,
            floating_output_ttl: 0,
            model_wave: WaveTables::get_instance(chip_model),
            dac: Vec::new(),
            is6581: false,
            model_shift_register_reset: 0,
        };
        wave.set_chip_model(chip_model);
        wave.reset();
        wave
    }

    pub fn set_chip_model(&mut self, chip_model: SidModel) {
        self.is6581 = chip_model == SidModel::Mos6581;
        self.model_wave = WaveTables::get_instance(chip_model);
        self.model_shift_register_reset = if self.is6581 {
            SHIFT_REGISTER_RESET_6581
        } else {
            SHIFT_REGISTER_RESET_8580
        };

        let mut dac_builder = Dac::new(DAC_BITS);
        dac_builder.kinked_dac(chip_model);
        let offset = dac_builder.get_output(if self.is6581 { 0x380 } else { 0x9c0 });
        self.dac = (0..1 << DAC_BITS)
            .map(|i| (dac_builder.get_output(i) - offset) as f32)
            .collect();
    }

    // -- Getters used for synchronization and voice-sync scheduling

    pub fn read_accumulator(&self) -> u32 {
        self.accumulator
    }

    pub fn read_freq(&self) -> u32 {
        self.freq
    }

    pub fn read_sync(&self) -> bool {
        self.sync
    }

    pub fn read_test(&self) -> bool {
        self.test
    }

    pub fn is_msb_rising(&self) -> bool {
        self.msb_rising
    }

    pub fn set_accumulator(&mut self, value: u32) {
        self.accumulator = value;
    }

    // -- Register writes

    pub fn write_freq_lo(&mut self, value: u8) {
        self.freq = (self.freq & 0xff00) | u32::from(value);
    }

    pub fn write_freq_hi(&mut self, value: u8) {
        self.freq = (u32::from(value) << 8) | (self.freq & 0x00ff);
    }

    pub fn write_pw_lo(&mut self, value: u8) {
        self.pw = (self.pw & 0xf00) | u32::from(value);
    }

    pub fn write_pw_hi(&mut self, value: u8) {
        self.pw = ((u32::from(value) & 0x0f) << 8) | (self.pw & 0x0ff);
    }

    pub fn write_control(&mut self, control: u8) {
        let waveform_prev = self.waveform;
        let test_prev = self.test;

        self.waveform = u32::from(control >> 4) & 0x0f;
        self.test = control & 0x08 != 0;
        self.sync = control & 0x02 != 0;

        // Substitution of accumulator MSB when sawtooth = 0, ring_mod = 1.
        self.ring_msb_mask = ((u32::from(!control) >> 5) & (u32::from(control) >> 2) & 0x1) << 23;

        if self.waveform != waveform_prev {
            // no_noise and no_pulse mask the noise and pulse terms out of the
            // output unless the corresponding waveform bit is selected.
            self.no_noise = if self.waveform & 0x8 != 0 { 0x000 } else { 0xfff };
            self.no_noise_or_noise_output = self.no_noise | self.noise_output;
            self.no_pulse = if self.waveform & 0x4 != 0 { 0x000 } else { 0xfff };

            if self.waveform == 0 {
                // Change to floating DAC input; the output decays from here.
                self.floating_output_ttl = if self.is6581 {
                    FLOATING_OUTPUT_TTL_6581
                } else {
                    FLOATING_OUTPUT_TTL_8580
                };
            }
        }

        if self.test != test_prev {
            if self.test {
                // Reset accumulator.
                self.accumulator = 0;
                // Flush shift pipeline.
                self.shift_pipeline = 0;
                // Set reset time for shift register.
                self.shift_register_reset = self.model_shift_register_reset;
                self.set_noise_output();
            } else {
                // When the test bit falls, the second phase of the shift is
                // completed by enabling SRAM write.
                if do_pre_writeback(waveform_prev, self.waveform, self.is6581) {
                    self.shift_register &= self.noise_writeback();
                }
                // bit0 = (bit22 | test) ^ bit17 = 1 ^ bit17 = ~bit17
                let bit0 = (!self.shift_register << 17) & (1 << 22);
                self.clock_shift_register(bit0);
            }
        }
    }

    pub fn clock(&mut self) {
        if self.test {
            if self.shift_register_reset != 0 {
                self.shift_register_reset -= 1;
                if self.shift_register_reset == 0 {
                    self.reset_shift_register();
                    self.set_noise_output();
                }
            }
            // The test bit sets pulse high.
            self.pulse_output = 0xfff;
        } else {
            let accumulator_old = self.accumulator;
            self.accumulator = (self.accumulator + self.freq) & 0xffffff;

            let accumulator_bits_set = !accumulator_old & self.accumulator;
            self.msb_rising = accumulator_bits_set & 0x800000 != 0;

            // Shift noise register once for each time accumulator bit 19 is
            // set high; the shift is delayed 2 cycles.
            if accumulator_bits_set & 0x080000 != 0 {
                self.shift_pipeline = 2;
            } else if self.shift_pipeline != 0 {
                self.shift_pipeline -= 1;
                if self.shift_pipeline == 0 {
                    // bit0 = (bit22 | test) ^ bit17
                    let bit0 =
                        ((self.shift_register << 22) ^ (self.shift_register << 17)) & (1 << 22);
                    self.clock_shift_register(bit0);
                }
            }
        }
    }

    /// 12-bit waveform output routed through the model DAC.
    pub fn output(&mut self, ring_modulator_accumulator: u32) -> f32 {
        if self.waveform != 0 {
            let ix =
                ((self.accumulator ^ (!ring_modulator_accumulator & self.ring_msb_mask)) >> 12)
                    as usize;

            // The bit masks no_pulse and no_noise yield branch-free
            // calculation of the output value.
            self.waveform_output = u32::from(self.model_wave.wave[(self.waveform & 0x7) as usize][ix])
                & (self.no_pulse | self.pulse_output)
                & self.no_noise_or_noise_output;

            // Triangle/sawtooth output is delayed half cycle on 8580, which
            // appears as a one cycle delay on OSC3.
            if self.waveform & 3 != 0 && !self.is6581 {
                self.osc3 = self.tri_saw_pipeline
                    & (self.no_pulse | self.pulse_output)
                    & self.no_noise_or_noise_output;
                self.tri_saw_pipeline =
                    u32::from(self.model_wave.wave[(self.waveform & 0x7) as usize][ix]);
            } else {
                self.osc3 = self.waveform_output;
            }

            // On the 6581 the top bit of the accumulator may be driven low by
            // combined waveforms when the sawtooth is selected.
            if self.waveform & 2 != 0 && self.waveform & 0xd != 0 && self.is6581 {
                self.accumulator &= (self.waveform_output << 12) | 0x7fffff;
            }

            self.write_shift_register();
        } else {
            // Age the floating DAC input.
            if self.floating_output_ttl != 0 {
                self.floating_output_ttl -= 1;
                if self.floating_output_ttl == 0 {
                    self.waveform_output = 0;
                }
            }
        }

        // The pulse level compare result is delayed one cycle.
        self.pulse_output = if (self.accumulator >> 12) >= self.pw {
            0xfff
        } else {
            0x000
        };

        self.dac[self.waveform_output as usize]
    }

    pub fn read_osc(&self) -> u8 {
        (self.osc3 >> 4) as u8
    }

    pub fn reset(&mut self) {
        // The accumulator is not changed on reset.
        self.freq = 0;
        self.pw = 0;
        self.msb_rising = false;
        self.waveform = 0;
        self.osc3 = 0;
        self.test = false;
        self.sync = false;
        self.ring_msb_mask = 0;
        self.no_noise = 0xfff;
        self.no_pulse = 0xfff;
        self.pulse_output = 0xfff;
        self.reset_shift_register();
        // When reset is released the shift register is clocked once.
        let bit0 = (!self.shift_register << 17) & (1 << 22);
        self.clock_shift_register(bit0);
        self.shift_pipeline = 0;
        self.waveform_output = 0;
        self.tri_saw_pipeline = 0x555;
        self.floating_output_ttl = 0;
    }

    fn clock_shift_register(&mut self, bit0: u32) {
        self.shift_register = (self.shift_register >> 1) | bit0;
        self.set_noise_output();
    }

    fn reset_shift_register(&mut self) {
        self.shift_register = 0x7fffff;
        self.shift_register_reset = 0;
    }

    fn noise_writeback(&self) -> u32 {
        !((1 << 2)
            | (1 << 4)
            | (1 << 8)
            | (1 << 11)
            | (1 << 13)
            | (1 << 17)
            | (1 << 20)
            | (1 << 22))
            | ((self.waveform_output & (1 << 11)) >> 9) // Bit 11 -> bit 20
            | ((self.waveform_output & (1 << 10)) >> 6) // Bit 10 -> bit 18
            | ((self.waveform_output & (1 << 9)) >> 1) // Bit  9 -> bit 14
            | ((self.waveform_output & (1 << 8)) << 3) // Bit  8 -> bit 11
            | ((self.waveform_output & (1 << 7)) << 6) // Bit  7 -> bit  9
            | ((self.waveform_output & (1 << 6)) << 11) // Bit  6 -> bit  5
            | ((self.waveform_output & (1 << 5)) << 15) // Bit  5 -> bit  2
            | ((self.waveform_output & (1 << 4)) << 18) // Bit  4 -> bit  0
    }

    fn write_shift_register(&mut self) {
        if self.waveform > 0x8 && !self.test && self.shift_pipeline != 1 {
            // Write changes to the shift register output caused by combined
            // waveforms back into the shift register when it is clocked.
            // A bit once set to zero cannot be changed, hence the and'ing.
            self.shift_register &= self.noise_writeback();
            self.noise_output &= self.waveform_output;
            self.no_noise_or_noise_output = self.no_noise | self.noise_output;
        }
    }

    fn set_noise_output(&mut self) {
        self.noise_output = ((self.shift_register & (1 << 2)) << 9)
            | ((self.shift_register & (1 << 4)) << 6)
            | ((self.shift_register & (1 << 8)) << 1)
            | ((self.shift_register & (1 << 11)) >> 3)
            | ((self.shift_register & (1 << 13)) >> 6)
            | ((self.shift_register & (1 << 17)) >> 11)
            | ((self.shift_register & (1 << 20)) >> 15)
            | ((self.shift_register & (1 << 22)) >> 18);
        self.no_noise_or_noise_output = self.no_noise | self.noise_output;
    }
}

/// Combined waveform values may overwrite shift register bits already during
/// the first phase of the shift when the test bit falls.
fn do_pre_writeback(waveform_prev: u32, waveform: u32, is6581: bool) -> bool {
    // No writeback without combined waveforms.
    if waveform_prev <= 0x8 {
        return false;
    }
    if waveform == 8 {
        return false;
    }
    if is6581
        && ((waveform_prev & 0x3 == 0x1 && waveform & 0x3 == 0x2)
            || (waveform_prev & 0x3 == 0x2 && waveform & 0x3 == 0x1))
    {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_wave() -> WaveformGenerator {
        let mut wave = WaveformGenerator::new(SidModel::Mos6581);
        wave.reset();
        wave
    }

    #[test]
    fn clock_shift_register() {
        let mut wave = setup_wave();
        wave.shift_register = 0x35555e;
        wave.clock_shift_register(0);
        assert_eq!(2528, wave.noise_output);
    }

    #[test]
    fn noise_output() {
        let mut wave = setup_wave();
        wave.shift_register = 0x35555f;
        wave.set_noise_output();
        assert_eq!(3616, wave.noise_output);
    }

    #[test]
    fn write_shift_register() {
        let mut wave = setup_wave();
        wave.waveform_output = 0x5a7;
        wave.write_shift_register();
        assert_eq!(0xfe0, wave.noise_output);
    }

    #[test]
    fn set_test_bit() {
        let mut wave = setup_wave();
        wave.shift_register = 0x35555e;
        wave.write_control(0x08); // set test bit
        wave.write_control(0x00); // unset test bit
        assert_eq!(2544, wave.noise_output);
    }

    #[test]
    fn noise_write_back() {
        let mut wave = setup_wave();

        wave.write_control(0x88);
        wave.clock();
        wave.output(0);
        wave.write_control(0x90);
        wave.clock();
        wave.output(0);

        let mut osc_values = Vec::new();
        for _ in 0..5 {
            wave.write_control(0x88);
            wave.clock();
            wave.output(0);
            wave.write_control(0x80);
            wave.clock();
            wave.output(0);
            osc_values.push(wave.read_osc());
        }
        assert_eq!(vec![0xfc, 0x6c, 0xd8, 0xb1, 0xd8], osc_values);
    }

    #[test]
    fn test_bit_forces_pulse_high() {
        let mut wave = setup_wave();
        wave.write_pw_hi(0x0f);
        wave.write_pw_lo(0xff);
        wave.write_control(0x48); // pulse + test
        wave.clock();
        wave.output(0);
        assert_eq!(0xfff, wave.pulse_output);
    }

    #[test]
    fn accumulator_stays_24_bit() {
        let mut wave = setup_wave();
        wave.write_freq_lo(0xff);
        wave.write_freq_hi(0xff);
        wave.write_control(0x10);
        for _ in 0..1000 {
            wave.clock();
            wave.output(0);
            assert_eq!(wave.accumulator & 0xffffff, wave.accumulator);
            assert!(wave.waveform_output <= 0xfff);
        }
    }

    #[test]
    fn floating_output_decays() {
        let mut wave = setup_wave();
        wave.write_freq_lo(0x00);
        wave.write_freq_hi(0x10);
        wave.write_control(0x20); // sawtooth
        for _ in 0..100 {
            wave.clock();
            wave.output(0);
        }
        assert!(wave.waveform_output != 0);
        wave.write_control(0x00); // float
        for _ in 0..FLOATING_OUTPUT_TTL_6581 {
            wave.clock();
            wave.output(0);
        }
        assert_eq!(0, wave.waveform_output);
    }
}
