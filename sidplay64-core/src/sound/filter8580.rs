// This file is part of sidplay64.
// Copyright (c) 2018-2020 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::sync::Arc;

use super::filter::{FilterState, SidFilter};
use super::model8580::{FilterModelConfig8580, Integrator8580};

/// W/L ratio of frequency DAC bit 0, other bits are proportional. When no
/// bits are selected a resistance with half the W/L ratio is connected.
const DAC_WL0: f64 = 0.00615;

// The 8580 filter: same two-integrator topology as the 6581 but with a
// linear parallel-conductance cutoff DAC and a plain resistor ladder for the
// resonance, so there is a dedicated resonance gain table instead of the
// inverted volume ladder.

pub struct Filter8580 {
    config: Arc<FilterModelConfig8580>,
    state: FilterState,
    hp_integrator: Integrator8580,
    bp_integrator: Integrator8580,
    voice_scale_s14: i32,
    voice_dc: i32,
    summer_idx: usize,
    mixer_idx: usize,
    cp: f64,
    ve: i32,
    vhp: i32,
    vbp: i32,
    vlp: i32,
}

impl Filter8580 {
    pub fn new() -> Self {
        let config = FilterModelConfig8580::get_instance();
        let hp_integrator = FilterModelConfig8580::build_integrator(&config);
        let bp_integrator = FilterModelConfig8580::build_integrator(&config);
        let voice_scale_s14 = config.voice_scale_s14();
        let voice_dc = config.voice_dc();
        let mut filter = Filter8580 {
            config,
            state: FilterState::new(),
            hp_integrator,
            bp_integrator,
            voice_scale_s14,
            voice_dc,
            summer_idx: 0,
            mixer_idx: 0,
            cp: 0.0,
            ve: 0,
            vhp: 0,
            vbp: 0,
            vlp: 0,
        };
        filter.set_filter_curve(0.5);
        filter.update_center_frequency();
        filter.update_mixing();
        filter.input(0);
        filter
    }

    fn update_center_frequency(&mut self) {
        let mut wl;
        let mut dac_wl = DAC_WL0;
        if self.state.fc != 0 {
            wl = 0.0;
            for i in 0..11 {
                if self.state.fc & (1 << i) != 0 {
                    wl += dac_wl;
                }
                dac_wl *= 2.0;
            }
        } else {
            wl = dac_wl / 2.0;
        }
        self.hp_integrator.set_fc(wl);
        self.bp_integrator.set_fc(wl);
    }

    fn update_mixing(&mut self) {
        self.summer_idx = self.state.input_count();
        self.mixer_idx = self.state.output_count();
    }
}

impl SidFilter for Filter8580 {
    fn clock(&mut self, voice1: i32, voice2: i32, voice3: i32) -> i32 {
        let voice1 = (voice1 * self.voice_scale_s14 >> 18) + self.voice_dc;
        let voice2 = (voice2 * self.voice_scale_s14 >> 18) + self.voice_dc;
        let voice3 = if self.state.filt3 || !self.state.voice3_off {
            (voice3 * self.voice_scale_s14 >> 18) + self.voice_dc
        } else {
            0
        };

        let mut vi = 0;
        let mut vo = 0;
        if self.state.filt1 {
            vi += voice1;
        } else {
            vo += voice1;
        }
        if self.state.filt2 {
            vi += voice2;
        } else {
            vo += voice2;
        }
        if self.state.filt3 {
            vi += voice3;
        } else if !self.state.voice3_off {
            vo += voice3;
        }
        if self.state.filt_e {
            vi += self.ve;
        } else {
            vo += self.ve;
        }

        let resonance = &self.config.gain_res[self.state.res as usize];
        let summer = &self.config.summer[self.summer_idx];
        let vbp_idx = self.vbp.max(0).min(0xffff) as usize;
        let summer_in = (i32::from(resonance[vbp_idx]) + self.vlp + vi)
            .max(0)
            .min(summer.len() as i32 - 1) as usize;
        self.vhp = i32::from(summer[summer_in]);
        self.vbp = self.hp_integrator.solve(self.vhp);
        self.vlp = self.bp_integrator.solve(self.vbp);

        if self.state.lp {
            vo += self.vlp;
        }
        if self.state.bp {
            vo += self.vbp;
        }
        if self.state.hp {
            vo += self.vhp;
        }

        let mixer = &self.config.mixer[self.mixer_idx];
        let mixer_in = vo.max(0).min(mixer.len() as i32 - 1) as usize;
        let gain = &self.config.gain_vol[self.state.vol as usize];
        i32::from(gain[mixer[mixer_in] as usize]) - (1 << 15)
    }

    fn input(&mut self, sample: i32) {
        self.ve = (sample * self.voice_scale_s14 * 3 >> 10) + i32::from(self.config.mixer[0][0]);
    }

    fn write_fc_lo(&mut self, value: u8) {
        self.state.write_fc_lo(value);
        self.update_center_frequency();
    }

    fn write_fc_hi(&mut self, value: u8) {
        self.state.write_fc_hi(value);
        self.update_center_frequency();
    }

    fn write_res_filt(&mut self, value: u8) {
        self.state.write_res_filt(value);
        self.update_mixing();
    }

    fn write_mode_vol(&mut self, value: u8) {
        self.state.write_mode_vol(value);
        self.update_mixing();
    }

    fn set_filter_curve(&mut self, curve: f64) {
        // Adjust cp to fit in 1.2 <= cp <= 1.8.
        self.cp = 1.8 - curve * 3.0 / 5.0;
        self.hp_integrator.set_v(self.cp);
        self.bp_integrator.set_v(self.cp);
    }

    fn enable(&mut self, enable: bool) {
        self.state.set_enabled(enable);
        self.update_mixing();
    }

    fn reset(&mut self) {
        self.state = FilterState::new();
        self.ve = 0;
        self.vhp = 0;
        self.vbp = 0;
        self.vlp = 0;
        self.hp_integrator.reset();
        self.bp_integrator.reset();
        self.set_filter_curve(0.5);
        self.update_center_frequency();
        self.update_mixing();
        self.input(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_output_with_volume() {
        let mut filter = Filter8580::new();
        filter.reset();
        filter.write_mode_vol(0x0f);
        let silence = filter.clock(0, 0, 0);
        let driven = filter.clock(1 << 18, 1 << 18, 1 << 18);
        assert_ne!(silence, driven);
    }

    #[test]
    fn output_is_16_bit() {
        let mut filter = Filter8580::new();
        filter.reset();
        filter.write_mode_vol(0x1f);
        filter.write_res_filt(0x17);
        filter.write_fc_hi(0x80);
        for i in 0..2000i32 {
            let out = filter.clock((i << 8) - 250_000, 250_000 - (i << 8), (i << 7) - 125_000);
            assert!(out >= -(1 << 15) && out < (1 << 15));
        }
    }
}
