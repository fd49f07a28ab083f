// This file is part of sidplay64.
// Copyright (c) 2018-2020 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::sync::{Arc, OnceLock};

use super::dac::Dac;
use super::opamp::OpAmp;
use super::spline::{Point, Spline};
use crate::factory::SidModel;

// Parameters for the 6581 filter model: a two-integrator loop built from
// non-linear NMOS op-amps, with the cutoff set by a "VCR" transistor operating
// mostly in subthreshold and a "snake" transistor in triode mode. All table
// building is done in doubles, all runtime lookups are integer.

/// The SID 6581 op-amp voltage transfer function, measured on CAP1B/CAP1A on
/// a chip marked MOS 6581R4AR 0687 14. All measured chips have op-amps with
/// output voltages (and thus input voltages) within the range 0.81V - 10.31V.
pub const OPAMP_VOLTAGE_6581: [(f64, f64); 33] = [
    (0.81, 10.31), // Approximate start of actual range
    (2.40, 10.31),
    (2.60, 10.30),
    (2.70, 10.29),
    (2.80, 10.26),
    (2.90, 10.17),
    (3.00, 10.04),
    (3.10, 9.83),
    (3.20, 9.58),
    (3.30, 9.32),
    (3.50, 8.69),
    (3.70, 8.00),
    (4.00, 6.89),
    (4.40, 5.21),
    (4.54, 4.54), // Working point (vi = vo)
    (4.60, 4.19),
    (4.80, 3.00),
    (4.90, 2.30), // Change of curvature
    (4.95, 2.03),
    (5.00, 1.88),
    (5.05, 1.77),
    (5.10, 1.69),
    (5.20, 1.58),
    (5.40, 1.44),
    (5.60, 1.33),
    (5.80, 1.26),
    (6.00, 1.21),
    (6.40, 1.12),
    (7.00, 1.02),
    (7.50, 0.97),
    (8.50, 0.89),
    (10.00, 0.81),
    (10.31, 0.81), // Approximate end of actual range
];

/// Capacitor value.
const C: f64 = 470e-12;
/// Transistor parameters.
const VDD: f64 = 12.18;
/// Threshold voltage.
const VTH: f64 = 1.31;
/// Thermal voltage: Ut = kT/q ~ 26mV.
const UT: f64 = 26.0e-3;
/// Gate coupling coefficient: K = Cox/(Cox+Cdep).
const K: f64 = 1.0;
/// Transconductance coefficient u*Cox.
const UCOX: f64 = 20e-6;
/// W/L ratio of the VCR gate.
const WL_VCR: f64 = 9.0 / 1.0;
/// W/L ratio of the "snake".
const WL_SNAKE: f64 = 1.0 / 115.0;
pub const KVDDT_6581: f64 = K * (VDD - VTH);

/// Cutoff DAC parameters.
const DAC_ZERO: f64 = 6.65;
const DAC_SCALE: f64 = 2.63;
const DAC_BITS: usize = 11;

const VMIN: f64 = 0.81;
const VMAX: f64 = 10.87; // kVddt, which exceeds the measured 10.31
const DENORM: f64 = VMAX - VMIN;
const NORM: f64 = 1.0 / DENORM;

/// Fixed point scaling for 16 bit op-amp output.
const N16: f64 = NORM * ((1u32 << 16) - 1) as f64;

pub struct FilterModelConfig6581 {
    /// Reverse op-amp transfer function, from capacitor voltage to op-amp
    /// input voltage.
    pub opamp_rev: Vec<u16>,
    /// Summer tables for 2..=6 inputs.
    pub summer: [Vec<u16>; 5],
    /// Mixer tables for 0..=7 inputs.
    pub mixer: [Vec<u16>; 8],
    /// Gain tables for the 16 volume / resonance settings.
    pub gain: [Vec<u16>; 16],
    /// VCR gate voltage table.
    pub vcr_kvg: Vec<u16>,
    /// VCR EKV-model current terms.
    pub vcr_n_ids_term: Vec<u16>,
    dac: Dac,
}

impl FilterModelConfig6581 {
    pub fn get_instance() -> Arc<FilterModelConfig6581> {
        static INSTANCE: OnceLock<Arc<FilterModelConfig6581>> = OnceLock::new();
        INSTANCE
            .get_or_init(|| Arc::new(FilterModelConfig6581::build()))
            .clone()
    }

    fn build() -> FilterModelConfig6581 {
        let mut dac = Dac::new(DAC_BITS);
        dac.kinked_dac(SidModel::Mos6581);

        // Convert op-amp voltage transfer to 16 bit values and invert it: map
        // capacitor voltage to op-amp input voltage.
        let scaled: Vec<Point> = OPAMP_VOLTAGE_6581
            .iter()
            .map(|&(x, y)| Point {
                x: N16 * (x - y + DENORM) / 2.0,
                y: N16 * (x - VMIN),
            })
            .collect();
        let spline = Spline::new(&scaled);
        let mut opamp_rev = vec![0u16; 1 << 16];
        for (x, entry) in opamp_rev.iter_mut().enumerate() {
            let (value, _) = spline.evaluate(x as f64);
            *entry = if value > 0.0 { (value + 0.5) as u16 } else { 0 };
        }

        let mut opamp = OpAmp::new(&OPAMP_VOLTAGE_6581, KVDDT_6581);

        // The filter summer operates at n ~ 1, and has 5 fundamentally
        // different input configurations (2 - 6 input "resistors").
        //
        // All "on" transistors are modeled as one; modeling them separately
        // would be extremely costly.
        let summer = build_tables::<5>(&mut opamp, |i| {
            let idiv = 2 + i;
            (idiv, idiv << 16, idiv as f64)
        });

        // The audio mixer operates at n ~ 8/6, and has 8 fundamentally
        // different input configurations (0 - 7 input "resistors").
        let mixer = build_tables::<8>(&mut opamp, |i| {
            let idiv = if i == 0 { 1 } else { i };
            let size = if i == 0 { 1 } else { i << 16 };
            (idiv, size, i as f64 * 8.0 / 6.0)
        });

        // 4 bit "resistor" ladders in the bandpass resonance gain and the
        // audio output gain necessitate 16 gain tables. From die photographs
        // it follows that gain ~ vol/8 and 1/Q ~ ~res/8.
        let gain = build_tables::<16>(&mut opamp, |n8| (1, 1 << 16, n8 as f64 / 8.0));

        let nkvddt = N16 * KVDDT_6581;
        let nvmin = N16 * VMIN;

        let mut vcr_kvg = vec![0u16; 1 << 16];
        for (i, entry) in vcr_kvg.iter_mut().enumerate() {
            // The table index is right-shifted 16 times in order to fit in 16
            // bits; the argument to sqrt is thus multiplied by (1 << 16).
            //
            // Vg always takes part in a subtraction, so k*Vg - t is stored:
            //   k*Vg - Vx = (k*Vg - t) - (Vx - t)
            let vg = nkvddt - ((i as f64) * 65536.0).sqrt();
            *entry = (K * vg - nvmin + 0.5) as u16;
        }

        //  EKV model:
        //
        //  Ids = Is*(if - ir)
        //  Is = 2*u*Cox*Ut^2/k*W/L
        //  if = ln^2(1 + e^((k*(Vg - Vt) - Vs)/(2*Ut))
        //  ir = ln^2(1 + e^((k*(Vg - Vt) - Vd)/(2*Ut))
        let kvt = K * VTH;
        let is = 2.0 * UCOX * UT * UT / K * WL_VCR;
        // Normalized current factor for 1 cycle at 1MHz.
        let n15 = NORM * ((1u32 << 15) - 1) as f64;
        let n_is = n15 * 1.0e-6 / C * is;
        let mut vcr_n_ids_term = vec![0u16; 1 << 16];
        for (kvg_vx, entry) in vcr_n_ids_term.iter_mut().enumerate() {
            let log_term = (1.0 + ((kvg_vx as f64 / N16 - kvt) / (2.0 * UT)).exp()).ln();
            *entry = (n_is * log_term * log_term + 0.5) as u16;
        }

        FilterModelConfig6581 {
            opamp_rev,
            summer,
            mixer,
            gain,
            vcr_kvg,
            vcr_n_ids_term,
            dac,
        }
    }

    /// The digital range of one voice is 20 bits; create a scaling term for
    /// multiplication which fits in 11 bits.
    pub fn voice_scale_s14(&self) -> i32 {
        let voice_voltage_range = 1.5;
        ((NORM * ((1u32 << 14) - 1) as f64) * voice_voltage_range) as i32
    }

    /// The "zero" output level of the voices.
    pub fn voice_dc(&self) -> i32 {
        let voice_dc_voltage = 5.0;
        (N16 * (voice_dc_voltage - VMIN)) as i32
    }

    fn dac_zero(adjustment: f64) -> f64 {
        DAC_ZERO - (adjustment - 0.5) * 2.0
    }

    /// Construct an 11 bit cutoff frequency DAC output voltage table. The
    /// `adjustment` knob shifts the DAC zero point without rebuilding the
    /// model tables.
    pub fn get_dac(&self, adjustment: f64) -> Vec<u16> {
        let dac_zero = FilterModelConfig6581::dac_zero(adjustment);
        let dac_size = 1usize << DAC_BITS;
        let mut f0_dac = vec![0u16; dac_size];
        for (i, entry) in f0_dac.iter_mut().enumerate() {
            let fcd = self.dac.get_output(i as u32);
            *entry = (N16 * (dac_zero + fcd * DAC_SCALE / dac_size as f64 - VMIN) + 0.5) as u16;
        }
        f0_dac
    }

    pub fn build_integrator(config: &Arc<FilterModelConfig6581>) -> Integrator6581 {
        // Vdd - Vth, normalized so that translated values can be subtracted:
        // k*Vddt - x = (k*Vddt - t) - (x - t)
        let nkvddt = (N16 * (KVDDT_6581 - VMIN) + 0.5) as u16;
        // Normalized snake current factor, 1 cycle at 1MHz. Fits in 5 bits.
        let n_snake =
            (DENORM * (1 << 13) as f64 * (UCOX / (2.0 * K) * WL_SNAKE * 1.0e-6 / C) + 0.5) as u16;
        Integrator6581 {
            config: config.clone(),
            nkvddt,
            n_snake,
            vddt_vw_2: 0,
            vx: 0,
            vc: 0,
            clamp: false,
        }
    }
}

fn build_tables<const COUNT: usize>(
    opamp: &mut OpAmp,
    params: impl Fn(usize) -> (usize, usize, f64),
) -> [Vec<u16>; COUNT] {
    let mut tables: [Vec<u16>; COUNT] = std::array::from_fn(|_| Vec::new());
    for (i, table) in tables.iter_mut().enumerate() {
        let (idiv, size, n) = params(i);
        opamp.reset();
        table.resize(size, 0);
        for (vi, entry) in table.iter_mut().enumerate() {
            let vin = VMIN + vi as f64 / N16 / idiv as f64; /* vmin .. vmax */
            *entry = ((opamp.solve(n, vin) - VMIN) * N16 + 0.5) as u16;
        }
    }
    tables
}

/// Capacitor voltage bounds keeping the op-amp lookup in range; the clamp is
/// normally off and the index wraps like the upstream model.
const VC_MIN: i32 = -(1 << 30);
const VC_MAX: i32 = (1 << 30) - 1;

pub struct Integrator6581 {
    config: Arc<FilterModelConfig6581>,
    nkvddt: u16,
    n_snake: u16,
    vddt_vw_2: u32,
    vx: i32,
    vc: i32,
    clamp: bool,
}

impl Integrator6581 {
    pub fn set_vw(&mut self, vw: u16) {
        let dv = u32::from(self.nkvddt) - u32::from(vw);
        self.vddt_vw_2 = (dv * dv) >> 1;
    }

    pub fn set_clamp(&mut self, enabled: bool) {
        self.clamp = enabled;
    }

    pub fn reset(&mut self) {
        self.vx = 0;
        self.vc = 0;
    }

    pub fn solve(&mut self, vi: i32) -> i32 {
        // "Snake" voltages for triode mode calculation.
        let vgst = (u32::from(self.nkvddt)).wrapping_sub(self.vx as u32);
        let vgdt = (u32::from(self.nkvddt)).wrapping_sub(vi as u32);

        let vgst_2 = vgst.wrapping_mul(vgst);
        let vgdt_2 = vgdt.wrapping_mul(vgdt);

        // "Snake" current, scaled by (1/m)*2^13*m*2^16*m*2^16*2^-15 = m*2^30
        let n_i_snake = i32::from(self.n_snake) * ((vgst_2.wrapping_sub(vgdt_2) as i32) >> 15);

        // VCR gate voltage.       // Scaled by m*2^16
        // Vg = Vddt - sqrt(((Vddt - Vw)^2 + Vgdt^2)/2)
        let kvg = i32::from(self.config.vcr_kvg[((self.vddt_vw_2 + (vgdt_2 >> 1)) >> 16) as usize]);

        // VCR voltages for EKV model table lookup.
        let vgs = (kvg - self.vx).max(0).min(0xffff) as usize;
        let vgd = (kvg - vi).max(0).min(0xffff) as usize;

        // VCR current, scaled by m*2^15*2^15 = m*2^30
        let n_i_vcr = (i32::from(self.config.vcr_n_ids_term[vgs])
            - i32::from(self.config.vcr_n_ids_term[vgd]))
            << 15;

        // Change in capacitor charge.
        self.vc += n_i_snake + n_i_vcr;
        if self.clamp {
            self.vc = self.vc.max(VC_MIN).min(VC_MAX);
        }

        // vx = g(vc)
        let tmp = ((self.vc >> 15) + (1 << 15)) as usize;
        self.vx = i32::from(self.config.opamp_rev[tmp & 0xffff]);

        // Return vo.
        self.vx - (self.vc >> 14)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cutoff_dac_shifts_with_curve() {
        let config = FilterModelConfig6581::get_instance();
        let mid = config.get_dac(0.5);
        let low = config.get_dac(0.0);
        let high = config.get_dac(1.0);
        // Moving the curve knob shifts the DAC zero point monotonically.
        assert!(low[0] > mid[0]);
        assert!(high[0] < mid[0]);
    }

    #[test]
    fn clamped_integrator_survives_pathological_drive() {
        let config = FilterModelConfig6581::get_instance();
        let mut integrator = FilterModelConfig6581::build_integrator(&config);
        integrator.set_clamp(true);
        let f0_dac = config.get_dac(0.5);
        integrator.set_vw(f0_dac[2047]);
        // A constant input makes a lone integrator ramp; the clamp keeps the
        // capacitor state inside the op-amp lookup domain.
        for _ in 0..100_000 {
            let vo = integrator.solve(0x8000);
            assert!(vo >= -(1 << 17) && vo <= 1 << 17);
        }
    }
}
