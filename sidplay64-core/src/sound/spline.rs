// This file is part of sidplay64.
// Copyright (c) 2018-2020 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::cell::Cell;

// Our measured curves (op-amp voltage transfer, cutoff characteristics) are
// given as sparse interpolation points. Interpolation is monotonic cubic:
// interval slopes use the harmonic mean of the neighboring chords, clamped to
// zero where the chords change sign, so the interpolant never overshoots the
// data. Outside the knot range the boundary cubic is extrapolated.

#[derive(Clone, Copy)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

struct Param {
    x1: f64,
    x2: f64,
    a: f64,
    b: f64,
    c: f64,
    d: f64,
}

pub struct Spline {
    params: Vec<Param>,
    // Last evaluated interval; lookups are usually monotonic.
    cache: Cell<usize>,
}

fn cubic_coefficients(
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
    k1: f64,
    k2: f64,
) -> (f64, f64, f64, f64) {
    let dx = x2 - x1;
    let dy = y2 - y1;

    let a = ((k1 + k2) - 2.0 * dy / dx) / (dx * dx);
    let b = ((k2 - k1) / dx - 3.0 * (x1 + x2) * a) / 2.0;
    let c = k1 - (3.0 * x1 * a + 2.0 * b) * x1;
    let d = y1 - ((x1 * a + b) * x1 + c) * x1;
    (a, b, c, d)
}

impl Spline {
    pub fn new(input: &[Point]) -> Self {
        assert!(input.len() > 2);
        let count = input.len() - 1;

        // Chord slope of each interval.
        let chord: Vec<f64> = (0..count)
            .map(|i| (input[i + 1].y - input[i].y) / (input[i + 1].x - input[i].x))
            .collect();

        // Knot slopes: one-sided at the ends, harmonic mean inside.
        let mut slope = vec![0.0; input.len()];
        slope[0] = chord[0];
        slope[count] = chord[count - 1];
        for i in 1..count {
            slope[i] = if chord[i - 1] * chord[i] <= 0.0 {
                0.0
            } else {
                2.0 * chord[i - 1] * chord[i] / (chord[i - 1] + chord[i])
            };
        }

        let mut params = Vec::with_capacity(count);
        for i in 0..count {
            let p1 = input[i];
            let p2 = input[i + 1];
            let (a, b, c, d) = cubic_coefficients(p1.x, p1.y, p2.x, p2.y, slope[i], slope[i + 1]);
            params.push(Param {
                x1: p1.x,
                x2: p2.x,
                a,
                b,
                c,
                d,
            });
        }
        Spline {
            params,
            cache: Cell::new(0),
        }
    }

    /// Evaluate the spline at x, returning the value and its derivative.
    pub fn evaluate(&self, x: f64) -> (f64, f64) {
        let cached = self.cache.get();
        let seg = if self.params[cached].x1 <= x && x < self.params[cached].x2 {
            cached
        } else {
            let mut lo = 0;
            let mut hi = self.params.len();
            while hi - lo > 1 {
                let mid = (lo + hi) / 2;
                if self.params[mid].x1 <= x {
                    lo = mid;
                } else {
                    hi = mid;
                }
            }
            self.cache.set(lo);
            lo
        };
        let p = &self.params[seg];
        let y = ((p.a * x + p.b) * x + p.c) * x + p.d;
        let yd = (3.0 * p.a * x + 2.0 * p.b) * x + p.c;
        (y, yd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sound::model6581::OPAMP_VOLTAGE_6581;

    fn opamp_spline() -> Spline {
        let points: Vec<Point> = OPAMP_VOLTAGE_6581
            .iter()
            .map(|&(x, y)| Point { x, y })
            .collect();
        Spline::new(&points)
    }

    #[test]
    fn passes_through_knots() {
        let spline = opamp_spline();
        for &(x, y) in OPAMP_VOLTAGE_6581.iter() {
            let (value, _) = spline.evaluate(x);
            assert!((value - y).abs() < 1e-6, "at {}: {} != {}", x, value, y);
        }
    }

    #[test]
    fn opamp_transfer_is_decreasing() {
        let spline = opamp_spline();
        let mut previous = f64::MAX;
        let mut x = 0.0;
        while x < 12.0 {
            let (value, _) = spline.evaluate(x);
            assert!(value <= previous, "not decreasing at {}", x);
            previous = value;
            x += 0.01;
        }
    }

    #[test]
    fn extrapolates_outside_bounds() {
        let points = [
            Point { x: 10.0, y: 15.0 },
            Point { x: 15.0, y: 20.0 },
            Point { x: 20.0, y: 30.0 },
            Point { x: 25.0, y: 40.0 },
            Point { x: 30.0, y: 45.0 },
        ];
        let spline = Spline::new(&points);
        let (low, _) = spline.evaluate(5.0);
        assert!((low - 6.66667).abs() < 1e-4);
        let (high, _) = spline.evaluate(40.0);
        assert!((high - 75.0).abs() < 1e-4);
    }
}
