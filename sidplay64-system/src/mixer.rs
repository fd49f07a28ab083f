// This file is part of sidplay64.
// Copyright (c) 2018-2020 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use sidplay64_core::util::Shared;

use super::config::VOLUME_MAX;
use super::sid_device::SidDevice;

// Owns no chips, just the mixing state: consumes the per-chip sample
// buffers, boxcar-averages them for fast forward, applies the channel
// volumes plus triangular dither, and writes interleaved PCM to the caller's
// buffer. Stereo routing: one chip feeds both channels; with two chips they
// split left/right; a third chip plays center.

pub struct Mixer {
    stereo: bool,
    volume: [i32; 2],
    fast_forward_factor: usize,
    // Dither state
    rand_seed: u32,
    old_random: i32,
    // Per-call output state
    sample_index: usize,
    sample_count: usize,
}

impl Mixer {
    pub fn new() -> Self {
        Mixer {
            stereo: false,
            volume: [VOLUME_MAX, VOLUME_MAX],
            fast_forward_factor: 1,
            rand_seed: 0x1c0de64,
            old_random: 0,
            sample_index: 0,
            sample_count: 0,
        }
    }

    pub fn set_stereo(&mut self, stereo: bool) {
        self.stereo = stereo;
    }

    pub fn set_volume(&mut self, left: i32, right: i32) {
        self.volume = [left.min(VOLUME_MAX).max(0), right.min(VOLUME_MAX).max(0)];
    }

    /// Fast forward factor 1..=32; out of range values are rejected.
    pub fn set_fast_forward(&mut self, factor: usize) -> bool {
        if !(1..=32).contains(&factor) {
            return false;
        }
        self.fast_forward_factor = factor;
        true
    }

    pub fn begin(&mut self, count: usize) {
        self.sample_index = 0;
        self.sample_count = count;
    }

    pub fn not_finished(&self) -> bool {
        self.sample_index < self.sample_count
    }

    pub fn samples_generated(&self) -> usize {
        self.sample_index
    }

    pub fn clock_chips(&self, chips: &[Shared<SidDevice>]) {
        for chip in chips {
            chip.borrow_mut().sync();
        }
    }

    pub fn reset_bufs(&self, chips: &[Shared<SidDevice>]) {
        for chip in chips {
            chip.borrow_mut().set_pos(0);
        }
    }

    /// Two-sample triangular probability distribution dither.
    fn triangular_dithering(&mut self) -> i32 {
        self.rand_seed = self.rand_seed.wrapping_mul(214_013).wrapping_add(2_531_011);
        let value = ((self.rand_seed >> 16) & (VOLUME_MAX as u32 - 1)) as i32;
        let dither = value - self.old_random;
        self.old_random = value;
        dither
    }

    fn mix_mono(&self, samples: &[i32]) -> i32 {
        samples.iter().sum::<i32>() / samples.len() as i32
    }

    fn mix_stereo(&self, channel: usize, samples: &[i32]) -> i32 {
        match samples.len() {
            1 => samples[0],
            2 => samples[channel],
            _ => (samples[0] + samples[1 + channel]) / 2,
        }
    }

    /// Drain the chip buffers into the output buffer; leftovers move to the
    /// front of each chip buffer for the next round.
    pub fn do_mix(&mut self, chips: &[Shared<SidDevice>], buffer: &mut [i16]) {
        // NB: all chips run the same clock, so their buffer positions match
        // the first chip's.
        let sample_count = chips
            .iter()
            .map(|chip| chip.borrow().pos())
            .min()
            .unwrap_or(0);
        let factor = self.fast_forward_factor;

        let mut i = 0;
        while i < sample_count {
            if self.sample_index >= self.sample_count {
                break;
            }
            // Are there enough samples to generate the next output?
            if i + factor > sample_count {
                break;
            }

            // Crude boxcar low-pass to reduce aliasing during fast forward.
            let mut samples = [0i32; 3];
            for (k, chip) in chips.iter().enumerate().take(3) {
                let chip = chip.borrow();
                let sum: i32 = chip.buffer()[i..i + factor]
                    .iter()
                    .map(|&sample| i32::from(sample))
                    .sum();
                samples[k] = sum / factor as i32;
            }
            i += factor;

            let dither = self.triangular_dithering();
            let channels = if self.stereo { 2 } else { 1 };
            let chip_count = chips.len().min(3);
            for channel in 0..channels {
                if self.sample_index >= buffer.len() || self.sample_index >= self.sample_count {
                    break;
                }
                let value = if self.stereo {
                    self.mix_stereo(channel, &samples[..chip_count])
                } else {
                    self.mix_mono(&samples[..chip_count])
                };
                let mixed = (value * self.volume[channel] + dither) / VOLUME_MAX;
                buffer[self.sample_index] = mixed.max(-32768).min(32767) as i16;
                self.sample_index += 1;
            }
        }

        // Move the unhandled samples to the start of the chip buffers.
        for chip in chips {
            let mut chip = chip.borrow_mut();
            let remaining = chip.pos() - i;
            chip.shift_front(i, remaining);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_forward_range() {
        let mut mixer = Mixer::new();
        assert!(mixer.set_fast_forward(1));
        assert!(mixer.set_fast_forward(32));
        assert!(!mixer.set_fast_forward(0));
        assert!(!mixer.set_fast_forward(33));
    }

    #[test]
    fn dither_is_zero_mean_bounded() {
        let mut mixer = Mixer::new();
        let mut sum = 0i64;
        for _ in 0..10_000 {
            let dither = mixer.triangular_dithering();
            assert!(dither.abs() < VOLUME_MAX);
            sum += i64::from(dither);
        }
        assert!(sum.abs() < 100_000);
    }

    #[test]
    fn stereo_routing() {
        let mixer = Mixer::new();
        assert_eq!(5, mixer.mix_stereo(0, &[5]));
        assert_eq!(5, mixer.mix_stereo(1, &[5]));
        assert_eq!(1, mixer.mix_stereo(0, &[1, 2]));
        assert_eq!(2, mixer.mix_stereo(1, &[1, 2]));
        assert_eq!(5, mixer.mix_stereo(0, &[4, 6, 8]));
        assert_eq!(6, mixer.mix_stereo(1, &[4, 6, 8]));
    }
}
