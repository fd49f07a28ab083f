// This file is part of sidplay64.
// Copyright (c) 2018-2020 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

// Sample rate conversion from the ~1MHz chip clock down to the host rate.
//
// Decimation is a cheap zero-order hold with linear interpolation between the
// two nearest chip samples. Resampling is the real thing: a Kaiser-windowed
// sinc FIR designed for 16-bit (96 dB) stopband attenuation, evaluated as a
// polyphase bank with linear interpolation between adjacent phase tables, and
// run as two chained stages through an intermediate rate chosen to minimize
// the total filter order (Laurent Ganier's formula). FIR tables are cached
// per parameter set since retuning is frequent but the parameter space tiny.

const RING_SIZE: usize = 2048;

const BITS: i32 = 16;

fn clip(value: i32) -> i16 {
    if value > i32::from(i16::MAX) {
        i16::MAX
    } else if value < i32::from(i16::MIN) {
        i16::MIN
    } else {
        value as i16
    }
}

/// Compute the 0th order modified Bessel function of the first kind, used to
/// build the Kaiser window.
fn i0(x: f64) -> f64 {
    // Maximum error acceptable is 1e-6, or ~96 dB.
    const I0E: f64 = 1e-6;
    let mut sum = 1.0;
    let mut u = 1.0;
    let mut n = 1.0;
    let halfx = x / 2.0;
    loop {
        let temp = halfx / n;
        u *= temp * temp;
        sum += u;
        n += 1.0;
        if u < I0E * sum {
            break;
        }
    }
    sum
}

fn convolve(sample: &[i16], fir: &[i16]) -> i32 {
    let mut out = 0i32;
    for (a, b) in sample.iter().zip(fir.iter()) {
        out += i32::from(*a) * i32::from(*b);
    }
    (out + (1 << 14)) >> 15
}

struct FirTable {
    data: Vec<Vec<i16>>,
}

fn fir_cache() -> &'static Mutex<HashMap<(i32, i32, u64), Arc<FirTable>>> {
    static CACHE: OnceLock<Mutex<HashMap<(i32, i32, u64), Arc<FirTable>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

pub struct SincResampler {
    fir_table: Arc<FirTable>,
    fir_n: i32,
    fir_res: i32,
    cycles_per_sample: i32,
    sample: Vec<i16>,
    sample_index: usize,
    sample_offset: i32,
    output_value: i32,
}

impl SincResampler {
    pub fn new(
        clock_frequency: f64,
        sampling_frequency: f64,
        highest_accurate_frequency: f64,
    ) -> Self {
        let cycles_per_sample = (clock_frequency / sampling_frequency * 1024.0) as i32;

        // 16 bits -> -96dB stopband attenuation.
        let a = -20.0 * (1.0 / f64::from(1 << BITS)).log10();
        // A fraction of the bandwidth is allocated to the transition band,
        // which we double because the filter transitions halfway at nyquist.
        let dw = (1.0 - 2.0 * highest_accurate_frequency / sampling_frequency)
            * std::f64::consts::PI
            * 2.0;

        // Kaiser window parameters, see the kaiserord function in the MATLAB
        // Signal Processing Toolbox.
        let beta = 0.1102 * (a - 8.7);
        let i0beta = i0(beta);
        let cycles_per_sample_d = clock_frequency / sampling_frequency;

        // The filter order is the number of zero crossings and must be even
        // (sinc is symmetric about x = 0); the filter length must be odd.
        let mut n = ((a - 7.95) / (2.285 * dw) + 0.5) as i32;
        n += n & 1;
        let mut fir_n = (f64::from(n) * cycles_per_sample_d) as i32 + 1;
        fir_n |= 1;
        assert!(fir_n < RING_SIZE as i32);

        // Interpolated lookup error is bounded by 1.234/L^2.
        let fir_res = ((1.234 * f64::from(1 << BITS)).sqrt() / cycles_per_sample_d).ceil() as i32;

        let key = (fir_n, fir_res, cycles_per_sample_d.to_bits());
        let fir_table = {
            let mut cache = fir_cache().lock().unwrap();
            cache
                .entry(key)
                .or_insert_with(|| {
                    Arc::new(SincResampler::build_fir(
                        fir_n,
                        fir_res,
                        cycles_per_sample_d,
                        beta,
                        i0beta,
                    ))
                })
                .clone()
        };

        SincResampler {
            fir_table,
            fir_n,
            fir_res,
            cycles_per_sample,
            sample: vec![0; RING_SIZE * 2],
            sample_index: 0,
            sample_offset: 0,
            output_value: 0,
        }
    }

    fn build_fir(
        fir_n: i32,
        fir_res: i32,
        cycles_per_sample: f64,
        beta: f64,
        i0beta: f64,
    ) -> FirTable {
        // The cutoff frequency is midway through the transition band, in
        // effect the same as nyquist.
        let wc = std::f64::consts::PI;
        let scale = 32768.0 * wc / cycles_per_sample / std::f64::consts::PI;

        let mut data = Vec::with_capacity(fir_res as usize);
        for i in 0..fir_res {
            let j_phase = f64::from(i) / f64::from(fir_res) + f64::from(fir_n / 2);
            let mut row = Vec::with_capacity(fir_n as usize);
            for j in 0..fir_n {
                let x = f64::from(j) - j_phase;

                let xt = x / f64::from(fir_n / 2);
                let kaiser_xt = if xt.abs() < 1.0 {
                    i0(beta * (1.0 - xt * xt).sqrt()) / i0beta
                } else {
                    0.0
                };

                let wt = wc * x / cycles_per_sample;
                let sinc_wt = if wt.abs() >= 1e-8 { wt.sin() / wt } else { 1.0 };

                row.push((scale * sinc_wt * kaiser_xt) as i16);
            }
            data.push(row);
        }
        FirTable { data }
    }

    fn fir(&self, subcycle: i32) -> i32 {
        // Find the first of the nearest fir tables close to the phase.
        let mut fir_table_first = (subcycle * self.fir_res) >> 10;
        let fir_table_offset = (subcycle * self.fir_res) & 0x3ff;

        // Find firN most recent samples, plus one extra in case the FIR wraps.
        let mut sample_start = self.sample_index + RING_SIZE - self.fir_n as usize - 1;

        let v1 = convolve(
            &self.sample[sample_start..sample_start + self.fir_n as usize],
            &self.fir_table.data[fir_table_first as usize],
        );

        // Use the next FIR table, wrapping back to the first FIR table using
        // the previous sample.
        fir_table_first += 1;
        if fir_table_first == self.fir_res {
            fir_table_first = 0;
            sample_start += 1;
        }
        let v2 = convolve(
            &self.sample[sample_start..sample_start + self.fir_n as usize],
            &self.fir_table.data[fir_table_first as usize],
        );

        // Linear interpolation between the sinc tables.
        v1 + ((fir_table_offset * (v2 - v1)) >> 10)
    }

    pub fn input(&mut self, input: i32) -> bool {
        let mut ready = false;

        // Clip the input as it may overflow the 16 bit range.
        let value = clip(input);
        self.sample[self.sample_index] = value;
        self.sample[self.sample_index + RING_SIZE] = value;
        self.sample_index = (self.sample_index + 1) & (RING_SIZE - 1);

        if self.sample_offset < 1024 {
            self.output_value = self.fir(self.sample_offset);
            ready = true;
            self.sample_offset += self.cycles_per_sample;
        }
        self.sample_offset -= 1024;

        ready
    }

    pub fn output(&self) -> i32 {
        self.output_value
    }

    pub fn reset(&mut self) {
        for sample in self.sample.iter_mut() {
            *sample = 0;
        }
        self.sample_index = 0;
        self.sample_offset = 0;
        self.output_value = 0;
    }
}

/// Zero order hold with linear interpolation between the two chip samples
/// nearest to each output instant.
pub struct ZeroOrderResampler {
    cached_sample: i32,
    sample_offset: i32,
    cycles_per_sample: i32,
    output_value: i32,
}

impl ZeroOrderResampler {
    pub fn new(clock_frequency: f64, sampling_frequency: f64) -> Self {
        ZeroOrderResampler {
            cached_sample: 0,
            sample_offset: 0,
            cycles_per_sample: (clock_frequency / sampling_frequency * 1024.0) as i32,
            output_value: 0,
        }
    }

    pub fn input(&mut self, sample: i32) -> bool {
        let mut ready = false;
        if self.sample_offset < 1024 {
            self.output_value =
                self.cached_sample + (self.sample_offset * (sample - self.cached_sample) >> 10);
            ready = true;
            self.sample_offset += self.cycles_per_sample;
        }
        self.sample_offset -= 1024;
        self.cached_sample = sample;
        ready
    }

    pub fn output(&self) -> i32 {
        self.output_value
    }

    pub fn reset(&mut self) {
        self.cached_sample = 0;
        self.sample_offset = 0;
        self.output_value = 0;
    }
}

/// Compose a more efficient SINC from chaining two other SINCs through an
/// intermediate frequency.
pub struct TwoPassSincResampler {
    s1: SincResampler,
    s2: SincResampler,
}

impl TwoPassSincResampler {
    pub fn new(
        clock_frequency: f64,
        sampling_frequency: f64,
        highest_accurate_frequency: f64,
    ) -> Self {
        // Calculation according to Laurent Ganier. It evaluates to about
        // 120 kHz here, which is well above the audible range.
        let intermediate = 2.0 * highest_accurate_frequency
            + (2.0 * highest_accurate_frequency * clock_frequency
                * (sampling_frequency - 2.0 * highest_accurate_frequency)
                / sampling_frequency)
                .sqrt();
        TwoPassSincResampler {
            s1: SincResampler::new(clock_frequency, intermediate, highest_accurate_frequency),
            s2: SincResampler::new(intermediate, sampling_frequency, highest_accurate_frequency),
        }
    }

    pub fn input(&mut self, sample: i32) -> bool {
        self.s1.input(sample) && self.s2.input(self.s1.output())
    }

    pub fn output(&self) -> i32 {
        self.s2.output()
    }

    pub fn reset(&mut self) {
        self.s1.reset();
        self.s2.reset();
    }
}

pub enum Resampler {
    ZeroOrder(ZeroOrderResampler),
    TwoPassSinc(TwoPassSincResampler),
}

impl Resampler {
    pub fn input(&mut self, sample: i32) -> bool {
        match self {
            Resampler::ZeroOrder(resampler) => resampler.input(sample),
            Resampler::TwoPassSinc(resampler) => resampler.input(sample),
        }
    }

    pub fn get_output(&self) -> i16 {
        match self {
            Resampler::ZeroOrder(resampler) => clip(resampler.output()),
            Resampler::TwoPassSinc(resampler) => clip(resampler.output()),
        }
    }

    pub fn reset(&mut self) {
        match self {
            Resampler::ZeroOrder(resampler) => resampler.reset(),
            Resampler::TwoPassSinc(resampler) => resampler.reset(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_in_silence_out() {
        let mut resampler = TwoPassSincResampler::new(985_248.0, 48_000.0, 20_000.0);
        let mut produced = 0;
        for _ in 0..100_000 {
            if resampler.input(0) {
                assert_eq!(0, resampler.output());
                produced += 1;
            }
        }
        // 100k cycles at ~985kHz should produce ~4870 output samples.
        assert!(produced > 4500 && produced < 5200);
    }

    #[test]
    fn dc_passes_through() {
        let mut resampler = TwoPassSincResampler::new(985_248.0, 48_000.0, 20_000.0);
        let mut last = 0;
        for _ in 0..200_000 {
            if resampler.input(8000) {
                last = resampler.output();
            }
        }
        assert!((last - 8000).abs() < 800, "dc level off: {}", last);
    }

    #[test]
    fn fir_tables_are_cached() {
        let a = SincResampler::new(985_248.0, 48_000.0, 20_000.0);
        let b = SincResampler::new(985_248.0, 48_000.0, 20_000.0);
        assert!(Arc::ptr_eq(&a.fir_table, &b.fir_table));
    }

    #[test]
    fn zero_order_tracks_input() {
        let mut resampler = ZeroOrderResampler::new(985_248.0, 44_100.0);
        let mut outputs = Vec::new();
        for i in 0..10_000 {
            if resampler.input(i) {
                outputs.push(resampler.output());
            }
        }
        assert!(!outputs.is_empty());
        assert!(outputs.windows(2).all(|pair| pair[1] >= pair[0]));
    }
}
