// This file is part of sidplay64.
// Copyright (c) 2018-2020 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

// Register file and routing state shared by the two filter models. The models
// differ only in how the two-integrator loop and the output stage are
// realized; cutoff/resonance/mode/volume decoding and the voice routing
// bookkeeping are identical.

pub trait SidFilter {
    /// Clock the filter loop with the three voice outputs, returning the
    /// mixed audio output.
    fn clock(&mut self, voice1: i32, voice2: i32, voice3: i32) -> i32;
    /// Apply an external input sample (digi boost).
    fn input(&mut self, sample: i32);
    fn write_fc_lo(&mut self, value: u8);
    fn write_fc_hi(&mut self, value: u8);
    fn write_res_filt(&mut self, value: u8);
    fn write_mode_vol(&mut self, value: u8);
    /// Tune the filter curve without rebuilding the model tables.
    fn set_filter_curve(&mut self, curve: f64);
    fn enable(&mut self, enable: bool);
    fn reset(&mut self);
}

pub struct FilterState {
    /// Cutoff frequency register, 11 bits.
    pub fc: u16,
    /// Voice routing bits of RES/FILT.
    pub filt: u8,
    /// Resonance setting.
    pub res: u8,
    pub filt1: bool,
    pub filt2: bool,
    pub filt3: bool,
    pub filt_e: bool,
    pub voice3_off: bool,
    pub lp: bool,
    pub bp: bool,
    pub hp: bool,
    pub vol: u8,
    pub enabled: bool,
}

impl FilterState {
    pub fn new() -> Self {
        FilterState {
            fc: 0,
            filt: 0,
            res: 0,
            filt1: false,
            filt2: false,
            filt3: false,
            filt_e: false,
            voice3_off: false,
            lp: false,
            bp: false,
            hp: false,
            vol: 0,
            enabled: true,
        }
    }

    pub fn write_fc_lo(&mut self, value: u8) {
        self.fc = (self.fc & 0x7f8) | (u16::from(value) & 0x007);
    }

    pub fn write_fc_hi(&mut self, value: u8) {
        self.fc = ((u16::from(value) << 3) & 0x7f8) | (self.fc & 0x007);
    }

    pub fn write_res_filt(&mut self, value: u8) {
        self.res = (value >> 4) & 0x0f;
        self.filt = value & 0x0f;
        self.update_routing();
    }

    pub fn write_mode_vol(&mut self, value: u8) {
        self.voice3_off = value & 0x80 != 0;
        self.lp = value & 0x10 != 0;
        self.bp = value & 0x20 != 0;
        self.hp = value & 0x40 != 0;
        self.vol = value & 0x0f;
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.update_routing();
    }

    fn update_routing(&mut self) {
        let filt = if self.enabled { self.filt } else { 0 };
        self.filt1 = filt & 0x01 != 0;
        self.filt2 = filt & 0x02 != 0;
        self.filt3 = filt & 0x04 != 0;
        self.filt_e = filt & 0x08 != 0;
    }

    /// Number of inputs into the filter summer, on top of the resonance and
    /// lowpass feedback paths.
    pub fn input_count(&self) -> usize {
        let mut ni = 0;
        if self.filt1 {
            ni += 1;
        }
        if self.filt2 {
            ni += 1;
        }
        if self.filt3 {
            ni += 1;
        }
        if self.filt_e {
            ni += 1;
        }
        ni
    }

    /// Number of inputs into the audio mixer.
    pub fn output_count(&self) -> usize {
        let mut no = 0;
        if !self.filt1 {
            no += 1;
        }
        if !self.filt2 {
            no += 1;
        }
        if !self.filt3 && !self.voice3_off {
            no += 1;
        }
        if !self.filt_e {
            no += 1;
        }
        if self.lp {
            no += 1;
        }
        if self.bp {
            no += 1;
        }
        if self.hp {
            no += 1;
        }
        no
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cutoff_register_packing() {
        let mut state = FilterState::new();
        state.write_fc_hi(0xff);
        state.write_fc_lo(0xff);
        assert_eq!(0x7ff, state.fc);
        state.write_fc_lo(0x00);
        assert_eq!(0x7f8, state.fc);
    }

    #[test]
    fn routing_counts() {
        let mut state = FilterState::new();
        state.write_res_filt(0x07);
        state.write_mode_vol(0x1f);
        assert_eq!(3, state.input_count());
        // Ext bypasses, lowpass selected.
        assert_eq!(2, state.output_count());
        state.write_mode_vol(0x9f);
        // voice3off only matters when voice 3 bypasses the filter.
        assert_eq!(2, state.output_count());
        state.write_res_filt(0x03);
        assert_eq!(2, state.input_count());
        assert_eq!(2, state.output_count());
    }

    #[test]
    fn disable_routes_everything_around() {
        let mut state = FilterState::new();
        state.write_res_filt(0xff);
        state.set_enabled(false);
        assert_eq!(0, state.input_count());
        state.set_enabled(true);
        assert_eq!(4, state.input_count());
    }
}
