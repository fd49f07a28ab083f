// This file is part of sidplay64.
// Copyright (c) 2018-2020 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use log::{log_enabled, trace, Level};

use super::external_filter::ExternalFilter;
use super::filter::SidFilter;
use super::filter6581::Filter6581;
use super::filter8580::Filter8580;
use super::resampler::{Resampler, TwoPassSincResampler, ZeroOrderResampler};
use super::voice::Voice;
use crate::factory::SidModel;

/// Bus value stays alive for some time after each operation; the values
/// differ wildly between chip models.
const BUS_TTL_6581: i32 = 0x01d00;
const BUS_TTL_8580: i32 = 0xa2000;

#[derive(Clone, Copy, PartialEq)]
pub enum SamplingMethod {
    /// Zero order hold, fast.
    Decimate,
    /// Two-pass windowed sinc.
    Resample,
}

pub struct Sid {
    // Functional Units
    voices: [Voice; 3],
    filter6581: Filter6581,
    filter8580: Filter8580,
    external_filter: ExternalFilter,
    resampler: Resampler,
    // Runtime State
    model: SidModel,
    bus_value: u8,
    bus_value_ttl: i32,
    model_ttl: i32,
    next_voice_sync: u32,
    muted: [bool; 3],
    pot_x: u8,
    pot_y: u8,
}

impl Sid {
    pub fn new(chip_model: SidModel) -> Self {
        let mut sid = Sid {
            voices: [
                Voice::new(chip_model),
                Voice::new(chip_model),
                Voice::new(chip_model),
            ],
            filter6581: Filter6581::new(),
            filter8580: Filter8580::new(),
            external_filter: ExternalFilter::new(),
            resampler: Resampler::ZeroOrder(ZeroOrderResampler::new(985_248.0, 44_100.0)),
            model: chip_model,
            bus_value: 0,
            bus_value_ttl: 0,
            model_ttl: BUS_TTL_8580,
            next_voice_sync: 0,
            muted: [false; 3],
            pot_x: 0,
            pot_y: 0,
        };
        sid.set_chip_model(chip_model);
        sid.reset();
        sid
    }

    pub fn set_chip_model(&mut self, chip_model: SidModel) {
        self.model = chip_model;
        self.model_ttl = match chip_model {
            SidModel::Mos6581 => BUS_TTL_6581,
            SidModel::Mos8580 => BUS_TTL_8580,
        };
        for voice in self.voices.iter_mut() {
            voice.set_chip_model(chip_model);
        }
    }

    pub fn chip_model(&self) -> SidModel {
        self.model
    }

    pub fn set_filter_6581_curve(&mut self, curve: f64) {
        self.filter6581.set_filter_curve(curve);
    }

    pub fn set_filter_8580_curve(&mut self, curve: f64) {
        self.filter8580.set_filter_curve(curve);
    }

    pub fn set_vc_clamp(&mut self, enabled: bool) {
        self.filter6581.set_vc_clamp(enabled);
    }

    pub fn enable_filter(&mut self, enable: bool) {
        self.filter6581.enable(enable);
        self.filter8580.enable(enable);
    }

    pub fn set_sampling_parameters(
        &mut self,
        clock_frequency: f64,
        method: SamplingMethod,
        sampling_frequency: f64,
    ) {
        self.external_filter.set_clock_frequency(clock_frequency);
        self.resampler = match method {
            SamplingMethod::Decimate => {
                Resampler::ZeroOrder(ZeroOrderResampler::new(clock_frequency, sampling_frequency))
            }
            SamplingMethod::Resample => {
                let highest_accurate_frequency = if sampling_frequency > 44_000.0 {
                    20_000.0
                } else {
                    sampling_frequency * 0.45
                };
                Resampler::TwoPassSinc(TwoPassSincResampler::new(
                    clock_frequency,
                    sampling_frequency,
                    highest_accurate_frequency,
                ))
            }
        };
    }

    /// External audio input for the 8580 digi boost hack.
    pub fn input(&mut self, value: i32) {
        self.filter6581.input(value);
        self.filter8580.input(value);
    }

    pub fn set_pot_x(&mut self, value: u8) {
        self.pot_x = value;
    }

    pub fn set_pot_y(&mut self, value: u8) {
        self.pot_y = value;
    }

    pub fn mute(&mut self, voice: usize, enable: bool) {
        if voice < 3 {
            self.muted[voice] = enable;
        }
    }

    pub fn reset(&mut self) {
        for voice in self.voices.iter_mut() {
            voice.reset();
        }
        self.filter6581.reset();
        self.filter8580.reset();
        self.external_filter.reset();
        self.resampler.reset();
        self.bus_value = 0;
        self.bus_value_ttl = 0;
        self.voice_sync(false);
    }

    fn age_bus_value(&mut self, n: u32) {
        if self.bus_value_ttl != 0 {
            self.bus_value_ttl -= n as i32;
            if self.bus_value_ttl <= 0 {
                self.bus_value = 0;
                self.bus_value_ttl = 0;
            }
        }
    }

    fn output(&mut self) -> i32 {
        let ring = [
            self.voices[2].wave.read_accumulator(),
            self.voices[0].wave.read_accumulator(),
            self.voices[1].wave.read_accumulator(),
        ];
        let v1 = self.voices[0].output(ring[0]);
        let v2 = self.voices[1].output(ring[1]);
        let v3 = self.voices[2].output(ring[2]);
        let filter_out = match self.model {
            SidModel::Mos6581 => self.filter6581.clock(v1, v2, v3),
            SidModel::Mos8580 => self.filter8580.clock(v1, v2, v3),
        };
        self.external_filter.clock(filter_out)
    }

    /// Synchronize the three waveform generators. A sync source that is
    /// itself synced on the same cycle its MSB rises does not sync its
    /// destination.
    fn synchronize(&mut self) {
        for i in 0..3 {
            let dest = (i + 1) % 3;
            let source = (i + 2) % 3;
            let msb_rising = self.voices[i].wave.is_msb_rising();
            let own_sync = self.voices[i].wave.read_sync();
            let dest_sync = self.voices[dest].wave.read_sync();
            let source_msb_rising = self.voices[source].wave.is_msb_rising();
            if msb_rising && dest_sync && !(own_sync && source_msb_rising) {
                self.voices[dest].wave.set_accumulator(0);
            }
        }
    }

    /// Calculate the time to the next voice synchronization boundary: only
    /// that many cycles may be clocked before sync must be re-evaluated.
    fn voice_sync(&mut self, sync: bool) {
        if sync {
            self.synchronize();
        }

        self.next_voice_sync = u32::MAX;
        for i in 0..3 {
            let freq = self.voices[i].wave.read_freq();
            if self.voices[i].wave.read_test()
                || freq == 0
                || !self.voices[(i + 1) % 3].wave.read_sync()
            {
                continue;
            }
            let accumulator = self.voices[i].wave.read_accumulator();
            let this_voice_sync = ((0x7fffff - accumulator) & 0xffffff) / freq + 1;
            if this_voice_sync < self.next_voice_sync {
                self.next_voice_sync = this_voice_sync;
            }
        }
    }

    pub fn read(&mut self, offset: u8) -> u8 {
        match offset {
            0x19 => {
                // X value of paddle
                self.bus_value = self.pot_x;
                self.bus_value_ttl = self.model_ttl;
            }
            0x1a => {
                // Y value of paddle
                self.bus_value = self.pot_y;
                self.bus_value_ttl = self.model_ttl;
            }
            0x1b => {
                // Voice #3 waveform output
                self.bus_value = self.voices[2].wave.read_osc();
                self.bus_value_ttl = self.model_ttl;
            }
            0x1c => {
                // Voice #3 ADSR output
                self.bus_value = self.voices[2].envelope.read_env();
                self.bus_value_ttl = self.model_ttl;
            }
            _ => {
                // Reading a write-only register makes the bus discharge
                // faster; emulate by halving the residual TTL.
                self.bus_value_ttl /= 2;
            }
        }
        self.bus_value
    }

    pub fn write(&mut self, offset: u8, value: u8) {
        if log_enabled!(Level::Trace) {
            trace!(target: "sid::reg", "Write 0x{:02x} = 0x{:02x}", offset, value);
        }
        self.bus_value = value;
        self.bus_value_ttl = self.model_ttl;

        match offset {
            0x00 => self.voices[0].wave.write_freq_lo(value),
            0x01 => self.voices[0].wave.write_freq_hi(value),
            0x02 => self.voices[0].wave.write_pw_lo(value),
            0x03 => self.voices[0].wave.write_pw_hi(value),
            0x04 => {
                let value = if self.muted[0] { 0 } else { value };
                self.voices[0].write_control(value);
            }
            0x05 => self.voices[0].envelope.write_attack_decay(value),
            0x06 => self.voices[0].envelope.write_sustain_release(value),
            0x07 => self.voices[1].wave.write_freq_lo(value),
            0x08 => self.voices[1].wave.write_freq_hi(value),
            0x09 => self.voices[1].wave.write_pw_lo(value),
            0x0a => self.voices[1].wave.write_pw_hi(value),
            0x0b => {
                let value = if self.muted[1] { 0 } else { value };
                self.voices[1].write_control(value);
            }
            0x0c => self.voices[1].envelope.write_attack_decay(value),
            0x0d => self.voices[1].envelope.write_sustain_release(value),
            0x0e => self.voices[2].wave.write_freq_lo(value),
            0x0f => self.voices[2].wave.write_freq_hi(value),
            0x10 => self.voices[2].wave.write_pw_lo(value),
            0x11 => self.voices[2].wave.write_pw_hi(value),
            0x12 => {
                let value = if self.muted[2] { 0 } else { value };
                self.voices[2].write_control(value);
            }
            0x13 => self.voices[2].envelope.write_attack_decay(value),
            0x14 => self.voices[2].envelope.write_sustain_release(value),
            0x15 => {
                self.filter6581.write_fc_lo(value);
                self.filter8580.write_fc_lo(value);
            }
            0x16 => {
                self.filter6581.write_fc_hi(value);
                self.filter8580.write_fc_hi(value);
            }
            0x17 => {
                self.filter6581.write_res_filt(value);
                self.filter8580.write_res_filt(value);
            }
            0x18 => {
                self.filter6581.write_mode_vol(value);
                self.filter8580.write_mode_vol(value);
            }
            _ => {}
        }

        // Update voice sync just in case.
        self.voice_sync(false);
    }

    /// Clock the chip for `cycles`, writing any produced samples into
    /// `buffer`. Returns the number of samples written.
    pub fn clock(&mut self, mut cycles: u32, buffer: &mut [i16]) -> usize {
        self.age_bus_value(cycles);
        let mut s = 0;

        while cycles != 0 {
            let delta_t = self.next_voice_sync.min(cycles);
            if delta_t > 0 {
                for _ in 0..delta_t {
                    // Clock waveform generators.
                    self.voices[0].wave.clock();
                    self.voices[1].wave.clock();
                    self.voices[2].wave.clock();

                    // Clock envelope generators.
                    self.voices[0].envelope.clock();
                    self.voices[1].envelope.clock();
                    self.voices[2].envelope.clock();

                    let output = self.output();
                    if self.resampler.input(output) {
                        buffer[s] = self.resampler.get_output();
                        s += 1;
                    }
                }
                cycles -= delta_t;
                self.next_voice_sync -= delta_t;
            }

            if self.next_voice_sync == 0 {
                self.voice_sync(true);
            }
        }

        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_sid() -> Sid {
        let mut sid = Sid::new(SidModel::Mos6581);
        sid.set_sampling_parameters(985_248.0, SamplingMethod::Decimate, 44_100.0);
        sid.reset();
        sid
    }

    #[test]
    fn bus_value_decays_after_write() {
        let mut sid = setup_sid();
        let mut buffer = [0i16; 8192];
        sid.write(0x00, 0x5a);
        assert_eq!(0x5a, sid.read(0x00));
        // Reading a write-only register halves the remaining TTL.
        assert!(sid.bus_value_ttl < BUS_TTL_6581);
        sid.clock(BUS_TTL_6581 as u32, &mut buffer);
        assert_eq!(0x00, sid.read(0x00));
    }

    #[test]
    fn env3_readback_rises_during_attack() {
        let mut sid = setup_sid();
        let mut buffer = [0i16; 8192];
        sid.write(0x13, 0x00); // attack/decay voice 3
        sid.write(0x14, 0xf0); // sustain/release voice 3
        sid.write(0x12, 0x21); // sawtooth + gate
        sid.clock(4000, &mut buffer);
        assert!(sid.read(0x1c) > 0);
    }

    #[test]
    fn osc3_readback_tracks_sawtooth() {
        let mut sid = setup_sid();
        let mut buffer = [0i16; 8192];
        sid.write(0x0e, 0x00);
        sid.write(0x0f, 0x10); // voice 3 frequency
        sid.write(0x12, 0x20); // sawtooth, no gate
        let first = sid.read(0x1b);
        sid.clock(1000, &mut buffer);
        let second = sid.read(0x1b);
        assert_ne!(first, second);
    }

    #[test]
    fn muted_voice_sees_zero_control() {
        let mut sid = setup_sid();
        let mut buffer = [0i16; 8192];
        sid.mute(2, true);
        sid.write(0x0e, 0x00);
        sid.write(0x0f, 0x10);
        sid.write(0x12, 0x21); // gate + sawtooth, gated away by mute
        sid.clock(10_000, &mut buffer);
        assert_eq!(0, sid.read(0x1c));
    }

    #[test]
    fn produces_expected_sample_count() {
        let mut sid = setup_sid();
        let mut buffer = [0i16; 8192];
        let samples = sid.clock(985_248 / 10, &mut buffer);
        let expected = 4410;
        assert!((samples as i32 - expected).abs() < 3);
    }

    #[test]
    fn voice_sync_window_is_recomputed_on_write() {
        let mut sid = setup_sid();
        sid.write(0x00, 0x00);
        sid.write(0x01, 0x10); // voice 1 freq = 0x1000
        sid.write(0x0b, 0x02); // voice 2 syncs to voice 1
        // Cycles until the voice 1 accumulator MSB rises from its power-on
        // value, stepping 0x1000 at a time.
        let accumulator = sid.voices[0].wave.read_accumulator();
        let expected = ((0x7fffff - accumulator) & 0xffffff) / 0x1000 + 1;
        assert_eq!(expected, sid.next_voice_sync);
    }
}
