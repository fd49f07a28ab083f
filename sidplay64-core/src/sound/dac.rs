// This file is part of sidplay64.
// Copyright (c) 2018-2020 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use crate::factory::SidModel;

// Estimate DAC nonlinearity. The SID DACs are built up as R-2R ladder networks
// with bit switches, and the 6581 is both missing the terminating 2R resistor
// and has a wrong resistor ratio of 2R/R ~ 2.2. The 8580 DACs, on the other
// hand, are practically perfect.

const R_INFINITY: f64 = 1e6;

pub struct Dac {
    dac: Vec<f64>,
}

impl Dac {
    pub fn new(bits: usize) -> Self {
        Dac {
            dac: vec![0.0; bits],
        }
    }

    pub fn get_output(&self, input: u32) -> f64 {
        let mut value = 0.0;
        for (i, bit) in self.dac.iter().enumerate() {
            if input & (1 << i) != 0 {
                value += bit;
            }
        }
        value
    }

    /// Compute the voltage contribution of each bit in the ladder, by repeated
    /// parallel substitution towards the "tail" and source transformation back
    /// towards the output.
    pub fn kinked_dac(&mut self, chip_model: SidModel) {
        let _2r_div_r = match chip_model {
            SidModel::Mos6581 => 2.20,
            SidModel::Mos8580 => 2.00,
        };
        let term = chip_model == SidModel::Mos8580;
        let bits = self.dac.len();

        for set_bit in 0..bits {
            let mut vn = 1.0;
            let r = 1.0;
            let _2r = _2r_div_r * r;
            let mut rn = if term { _2r } else { R_INFINITY };

            for _bit in 0..set_bit {
                rn = if rn == R_INFINITY {
                    r + _2r
                } else {
                    r + _2r * rn / (_2r + rn)
                };
            }

            if rn == R_INFINITY {
                rn = _2r;
            } else {
                rn = _2r * rn / (_2r + rn);
                vn = vn * rn / _2r;
            }

            for _bit in set_bit + 1..bits {
                rn += r;
                let i = vn / rn;
                rn = _2r * rn / (_2r + rn);
                vn = rn * i;
            }

            self.dac[set_bit] = vn;
        }

        // Normalize to integerish behavior.
        let divisor = (1u64 << bits) as f64;
        let vsum = self.dac.iter().sum::<f64>() / divisor;
        for bit in self.dac.iter_mut() {
            *bit /= vsum;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_dac(chip_model: SidModel) -> Vec<f64> {
        let mut builder = Dac::new(8);
        builder.kinked_dac(chip_model);
        (0..256).map(|i| builder.get_output(i)).collect()
    }

    fn is_monotonic(dac: &[f64]) -> bool {
        dac.windows(2).all(|pair| pair[1] > pair[0])
    }

    #[test]
    fn dac_6581_is_nonlinear() {
        assert!(!is_monotonic(&build_dac(SidModel::Mos6581)));
    }

    #[test]
    fn dac_8580_is_linear() {
        assert!(is_monotonic(&build_dac(SidModel::Mos8580)));
    }
}
