// This file is part of sidplay64.
// Copyright (c) 2018-2020 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

// The audio output stage in a Commodore 64 consists of two STC networks, a
// low-pass filter with 3 dB frequency 16kHz followed by a DC-blocker acting
// as a high-pass filter with a cutoff dependent on the attached audio
// equipment impedance; 1kOhm is assumed, giving 3 dB attenuation at 16Hz.
// Both are single-pole IIRs in fixed point.

pub struct ExternalFilter {
    /// Lowpass filter voltage.
    vlp: i32,
    /// Highpass filter voltage.
    vhp: i32,
    w0lp_1_s7: i32,
    w0hp_1_s17: i32,
}

impl ExternalFilter {
    pub fn new() -> Self {
        let mut filter = ExternalFilter {
            vlp: 0,
            vhp: 0,
            w0lp_1_s7: 0,
            w0hp_1_s17: 0,
        };
        filter.set_clock_frequency(985_248.0);
        filter.reset();
        filter
    }

    pub fn set_clock_frequency(&mut self, frequency: f64) {
        // Low-pass:  R = 10kOhm, C = 1000pF; w0l = 1/RC = 100000
        // High-pass: R =  1kOhm, C =   10uF; w0h = 1/RC = 100
        self.w0lp_1_s7 = (100_000.0 / frequency * (1 << 7) as f64 + 0.5) as i32;
        self.w0hp_1_s17 = (100.0 / frequency * (1 << 17) as f64 + 0.5) as i32;
    }

    pub fn clock(&mut self, vi: i32) -> i32 {
        let dvlp = self.w0lp_1_s7 * ((vi << 11) - self.vlp) >> 7;
        let dvhp = self.w0hp_1_s17 * (self.vlp - self.vhp) >> 17;
        self.vlp += dvlp;
        self.vhp += dvhp;
        (self.vlp - self.vhp) >> 11
    }

    pub fn reset(&mut self) {
        self.vlp = 0;
        self.vhp = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_stays_silent() {
        let mut filter = ExternalFilter::new();
        for _ in 0..100_000 {
            assert_eq!(0, filter.clock(0));
        }
    }

    #[test]
    fn step_charges_then_blocks_dc() {
        let mut filter = ExternalFilter::new();
        let mut peak = 0;
        let mut last = 0;
        for _ in 0..2_000_000 {
            last = filter.clock(10_000);
            peak = peak.max(last);
        }
        // The lowpass charges to the input level, then the DC blocker pulls
        // the output back toward zero.
        assert!(peak > 9_000);
        assert!(last < peak / 8);
    }
}
