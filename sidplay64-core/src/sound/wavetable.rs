// This file is part of sidplay64.
// Copyright (c) 2018-2020 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use crate::factory::SidModel;

// Combined waveform tables.
//
// When more than one waveform is selected the output is the AND of the
// individual outputs, but weaker bits pull stronger neighbors along with
// them. This is modeled in the analog domain: each output bit becomes a
// weighted average of the digital bits around it, with distance-based weights
// and an extra pull from the pulse line, and a bias threshold decides whether
// the resulting voltage still reads as one. The parameter sets below were
// fitted against samples taken from real chips of either model.

/// bias, pulse strength, top bit leakage, bit distance, saw/tri mix.
struct CombinedWaveformConfig {
    bias: f32,
    pulsestrength: f32,
    topbit: f32,
    distance: f32,
    stmix: f32,
}

// Parameter sets for waveforms 3 (ST), 5 (PT), 6 (PS) and 7 (PST).
const CONFIG_6581: [CombinedWaveformConfig; 4] = [
    CombinedWaveformConfig {
        bias: 0.880_815,
        pulsestrength: 0.0,
        topbit: 0.0,
        distance: 0.327_961_4,
        stmix: 0.599_954_5,
    },
    CombinedWaveformConfig {
        bias: 0.892_461_8,
        pulsestrength: 2.014_781,
        topbit: 1.003_332,
        distance: 0.029_923_22,
        stmix: 0.0,
    },
    CombinedWaveformConfig {
        bias: 0.864_650_1,
        pulsestrength: 1.712_586,
        topbit: 1.137_704,
        distance: 0.028_454_23,
        stmix: 0.0,
    },
    CombinedWaveformConfig {
        bias: 0.952_783_4,
        pulsestrength: 1.794_777,
        topbit: 0.0,
        distance: 0.098_062_72,
        stmix: 0.775_248_2,
    },
];

const CONFIG_8580: [CombinedWaveformConfig; 4] = [
    CombinedWaveformConfig {
        bias: 0.947_225_7,
        pulsestrength: 0.0,
        topbit: 0.925_284_8,
        distance: 1.724_302,
        stmix: 0.721_175_7,
    },
    CombinedWaveformConfig {
        bias: 0.939_698_9,
        pulsestrength: 2.349_344,
        topbit: 0.981_287_2,
        distance: 0.802_995_3,
        stmix: 0.0,
    },
    CombinedWaveformConfig {
        bias: 0.943_367_7,
        pulsestrength: 2.189_367,
        topbit: 0.958_261_8,
        distance: 0.773_619_1,
        stmix: 0.0,
    },
    CombinedWaveformConfig {
        bias: 0.971_284,
        pulsestrength: 1.570_67,
        topbit: 0.899_052_6,
        distance: 1.339_344,
        stmix: 0.548_602_4,
    },
];

pub struct WaveTables {
    /// One 4096-entry table per waveform selection 0..=7. Selections 8..=15
    /// reuse entry `waveform & 7` with the noise mask applied at output time.
    pub wave: [[u16; 4096]; 8],
}

fn calculate_combined_waveform(config: &CombinedWaveformConfig, waveform: u8, idx: u32) -> u16 {
    let mut o = [0f32; 12];

    // Saw.
    for (i, bit) in o.iter_mut().enumerate() {
        *bit = if idx & (1 << i) != 0 { 1.0 } else { 0.0 };
    }

    if waveform & 2 == 0 {
        // If saw is not selected the bits are XORed by the triangle MSB.
        let top = idx & 0x800 != 0;
        for i in (1..12).rev() {
            o[i] = if top { 1.0 - o[i - 1] } else { o[i - 1] };
        }
        o[0] = 0.0;
    } else if waveform & 3 == 3 {
        // If both saw and triangle are selected the bits are interconnected
        // and the weak bottom bits draw the upper bits down.
        for i in (1..12).rev() {
            o[i] = o[i - 1] * (1.0 - config.stmix) + o[i] * config.stmix;
        }
        o[0] *= config.stmix;
    }

    // The leftmost saw bit is weakened by the top-bit leakage.
    if waveform & 2 != 0 {
        o[11] *= config.topbit;
    }

    if waveform == 3 || waveform > 4 {
        let mut distancetable = [0f32; 12 * 2 + 1];
        distancetable[12] = 1.0;
        for i in 1..=12 {
            let weight = 1.0 / (1.0 + (i * i) as f32 * config.distance);
            distancetable[12 - i] = weight;
            distancetable[12 + i] = weight;
        }

        let mut tmp = [0f32; 12];
        for (i, out) in tmp.iter_mut().enumerate() {
            let mut avg = 0.0;
            let mut n = 0.0;
            for (j, bit) in o.iter().enumerate() {
                let weight = distancetable[i + 12 - j];
                avg += bit * weight;
                n += weight;
            }
            // Pulse control bit pulls from beyond the top.
            if waveform > 4 {
                let weight = distancetable[i];
                avg += config.pulsestrength * weight;
                n += weight;
            }
            *out = (o[i] + avg / n) * 0.5;
        }
        o = tmp;
    }

    let mut value = 0u16;
    for (i, bit) in o.iter().enumerate() {
        if *bit > config.bias {
            value |= 1 << i;
        }
    }
    // The lowest four output bits have no combined-waveform drive left.
    value & 0xff0
}

fn build_table(model: SidModel) -> WaveTables {
    let config = match model {
        SidModel::Mos6581 => &CONFIG_6581,
        SidModel::Mos8580 => &CONFIG_8580,
    };
    let mut wave = [[0u16; 4096]; 8];
    for idx in 0..4096u32 {
        let tri = if idx & 0x800 == 0 {
            (idx << 1) & 0xfff
        } else {
            ((idx ^ 0xfff) << 1) & 0xfff
        };
        wave[0][idx as usize] = 0xfff;
        wave[1][idx as usize] = tri as u16;
        wave[2][idx as usize] = idx as u16;
        wave[3][idx as usize] = calculate_combined_waveform(&config[0], 3, idx);
        wave[4][idx as usize] = 0xfff;
        wave[5][idx as usize] = calculate_combined_waveform(&config[1], 5, idx);
        wave[6][idx as usize] = calculate_combined_waveform(&config[2], 6, idx);
        wave[7][idx as usize] = calculate_combined_waveform(&config[3], 7, idx);
    }
    WaveTables { wave }
}

impl WaveTables {
    pub fn get_instance(model: SidModel) -> Arc<WaveTables> {
        static CACHE: OnceLock<Mutex<HashMap<SidModel, Arc<WaveTables>>>> = OnceLock::new();
        let cache = CACHE.get_or_init(|| Mutex::new(HashMap::new()));
        let mut guard = cache.lock().unwrap();
        guard
            .entry(model)
            .or_insert_with(|| Arc::new(build_table(model)))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_waveforms_are_exact() {
        let tables = WaveTables::get_instance(SidModel::Mos6581);
        assert_eq!(0x000, tables.wave[2][0x000]);
        assert_eq!(0x123, tables.wave[2][0x123]);
        // Triangle folds at the accumulator MSB.
        assert_eq!(0x000, tables.wave[1][0x000]);
        assert_eq!(0xffe, tables.wave[1][0x7ff]);
        assert_eq!(0xffe, tables.wave[1][0x800]);
        assert_eq!(0x000, tables.wave[1][0xfff]);
    }

    #[test]
    fn combined_waveforms_ground_low_bits() {
        for model in [SidModel::Mos6581, SidModel::Mos8580] {
            let tables = WaveTables::get_instance(model);
            for waveform in [3usize, 5, 6, 7] {
                for idx in 0..4096 {
                    assert_eq!(0, tables.wave[waveform][idx] & 0x00f);
                }
            }
        }
    }

    #[test]
    fn combined_waveforms_differ_per_model() {
        let mos6581 = WaveTables::get_instance(SidModel::Mos6581);
        let mos8580 = WaveTables::get_instance(SidModel::Mos8580);
        let differs = (0..4096).any(|i| mos6581.wave[3][i] != mos8580.wave[3][i]);
        assert!(differs);
    }

    #[test]
    fn cache_returns_same_instance() {
        let a = WaveTables::get_instance(SidModel::Mos8580);
        let b = WaveTables::get_instance(SidModel::Mos8580);
        assert!(Arc::ptr_eq(&a, &b));
    }
}
