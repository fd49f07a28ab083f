// This file is part of sidplay64.
// Copyright (c) 2018-2020 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use super::envelope::EnvelopeGenerator;
use super::wave::WaveformGenerator;
use crate::factory::SidModel;

/// One of the three identical audio generators in a SID: a waveform generator
/// amplitude-modulated by an envelope generator.
pub struct Voice {
    pub wave: WaveformGenerator,
    pub envelope: EnvelopeGenerator,
}

impl Voice {
    pub fn new(chip_model: SidModel) -> Self {
        Voice {
            wave: WaveformGenerator::new(chip_model),
            envelope: EnvelopeGenerator::new(chip_model),
        }
    }

    pub fn set_chip_model(&mut self, chip_model: SidModel) {
        self.wave.set_chip_model(chip_model);
        self.envelope.set_chip_model(chip_model);
    }

    pub fn write_control(&mut self, value: u8) {
        self.wave.write_control(value);
        self.envelope.write_control(value);
    }

    /// Amplitude modulated waveform output, in the 20 bit range expected by
    /// the filter.
    pub fn output(&mut self, ring_modulator_accumulator: u32) -> i32 {
        (self.wave.output(ring_modulator_accumulator) * self.envelope.output()) as i32
    }

    pub fn reset(&mut self) {
        self.wave.reset();
        self.envelope.reset();
    }
}
