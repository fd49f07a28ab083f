// This file is part of sidplay64.
// Copyright (c) 2018-2020 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

mod c64;
mod config;
mod driver;
mod mixer;
mod player;
mod reloc65;
mod sid_device;

pub use crate::c64::C64;
pub use crate::config::{
    C64Model, Config, Playback, SamplingMethod, DEFAULT_SAMPLING_FREQ, MAX_POWER_ON_DELAY,
    VOLUME_MAX,
};
pub use crate::driver::{Driver, DriverError};
pub use crate::mixer::Mixer;
pub use crate::player::{Player, PlayerInfo};
pub use crate::reloc65::{build_o65, reloc65, RelocError};
pub use crate::sid_device::SidDevice;
