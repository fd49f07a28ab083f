// This file is part of sidplay64.
// Copyright (c) 2018-2020 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use sidplay64_core::factory::{CiaModel, SidModel, SystemModel};

pub const DEFAULT_SAMPLING_FREQ: u32 = 44_100;
/// Delays above this bound are replaced with a random value.
pub const MAX_POWER_ON_DELAY: u16 = 0x1fff;
pub const VOLUME_MAX: i32 = 1024;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum C64Model {
    Pal,
    Ntsc,
    OldNtsc,
    Drean,
    PalM,
}

impl C64Model {
    pub fn system_model(self) -> SystemModel {
        match self {
            C64Model::Pal => SystemModel::c64_pal(),
            C64Model::Ntsc => SystemModel::c64_ntsc(),
            C64Model::OldNtsc => SystemModel::c64_old_ntsc(),
            C64Model::Drean => SystemModel::c64_drean(),
            C64Model::PalM => SystemModel::c64_pal_m(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Playback {
    Mono,
    Stereo,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SamplingMethod {
    /// Zero order hold, cheap.
    Interpolate,
    /// Polyphase windowed-sinc resampling.
    ResampleInterpolate,
}

#[derive(Clone)]
pub struct Config {
    pub default_c64_model: C64Model,
    pub force_c64_model: bool,
    pub default_sid_model: SidModel,
    pub force_sid_model: bool,
    pub digi_boost: bool,
    pub cia_model: CiaModel,
    pub playback: Playback,
    pub frequency: u32,
    /// 0 disables the extra chip unless the tune asks for one.
    pub second_sid_address: u16,
    pub third_sid_address: u16,
    pub left_volume: i32,
    pub right_volume: i32,
    pub power_on_delay: u16,
    pub sampling_method: SamplingMethod,
    pub fast_sampling: bool,
    pub filter_enabled: bool,
    pub filter6581_curve: f64,
    pub filter8580_curve: f64,
    /// Clamp the 6581 integrator state; the reference model leaves the
    /// wrap-around in place.
    pub filter6581_clamp: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            default_c64_model: C64Model::Pal,
            force_c64_model: false,
            default_sid_model: SidModel::Mos6581,
            force_sid_model: false,
            digi_boost: false,
            cia_model: CiaModel::Mos6526,
            playback: Playback::Mono,
            frequency: DEFAULT_SAMPLING_FREQ,
            second_sid_address: 0,
            third_sid_address: 0,
            left_volume: VOLUME_MAX,
            right_volume: VOLUME_MAX,
            power_on_delay: MAX_POWER_ON_DELAY + 1,
            sampling_method: SamplingMethod::ResampleInterpolate,
            fast_sampling: false,
            filter_enabled: true,
            filter6581_curve: 0.5,
            filter8580_curve: 0.5,
            filter6581_clamp: false,
        }
    }
}
