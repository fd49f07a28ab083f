// This file is part of sidplay64.
// Copyright (c) 2018-2020 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use log::info;
use sidplay64_core::factory::SidModel;
use sidplay64_core::sound::{SamplingMethod as CoreSampling, Sid};
use sidplay64_loader::{Clock, Compatibility, SidModel as TuneSidModel, SidTune, Speed};

use super::c64::C64;
use super::config::{C64Model, Config, Playback, SamplingMethod, MAX_POWER_ON_DELAY};
use super::driver::Driver;
use super::mixer::Mixer;

// Speed strings
const TXT_PAL_VBI: &str = "50 Hz VBI (PAL)";
const TXT_PAL_CIA: &str = "CIA (PAL)";
const TXT_NTSC_VBI: &str = "60 Hz VBI (NTSC)";
const TXT_NTSC_CIA: &str = "CIA (NTSC)";

// Error strings
const ERR_NA: &str = "NA";
const ERR_UNSUPPORTED_FREQ: &str = "SIDPLAYER ERROR: Unsupported sampling frequency.";
const ERR_UNSUPPORTED_SID_ADDR: &str = "SIDPLAYER ERROR: Unsupported SID address.";
const ERR_UNSUPPORTED_SIZE: &str = "SIDPLAYER ERROR: Size of music data exceeds C64 memory.";
const ERR_INVALID_PERCENTAGE: &str = "SIDPLAYER ERROR: Percentage value out of range.";
const ERR_BASIC_ROM: &str = "SIDPLAYER ERROR: Basic ROM is required for this tune.";
const ERR_CPU_JAM: &str = "Illegal instruction executed";

/// Cycles the machine advances between mixing rounds.
const OUTPUT_STEP: u32 = 5000;

const KERNAL_SIZE: usize = 0x2000;
const BASIC_SIZE: usize = 0x2000;
const CHARGEN_SIZE: usize = 0x1000;

#[derive(Clone, Copy, PartialEq)]
enum State {
    Stopped,
    Playing,
    Stopping,
}

pub struct PlayerInfo {
    pub channels: u32,
    pub driver_addr: u16,
    pub driver_length: u16,
    pub power_on_delay: u16,
    pub speed_string: &'static str,
}

/// The tune player engine: owns the C64, drives it in chunks and fills the
/// caller's PCM buffer.
pub struct Player {
    // Configuration
    config: Config,
    kernal: Option<Vec<u8>>,
    basic: Option<Vec<u8>>,
    chargen: Option<Vec<u8>>,
    // Runtime State
    tune: Option<SidTune>,
    c64: Option<C64>,
    mixer: Mixer,
    state: State,
    error: String,
    // Installed driver facts
    driver_addr: u16,
    driver_length: u16,
    power_on_delay: u16,
    speed_string: &'static str,
    rand_seed: u32,
}

impl Player {
    pub fn new() -> Self {
        Player {
            config: Config::default(),
            kernal: None,
            basic: None,
            chargen: None,
            tune: None,
            c64: None,
            mixer: Mixer::new(),
            state: State::Stopped,
            error: ERR_NA.to_string(),
            driver_addr: 0,
            driver_length: 0,
            power_on_delay: 0,
            speed_string: TXT_PAL_VBI,
            rand_seed: 0x2a5c64,
        }
    }

    pub fn error(&self) -> &str {
        &self.error
    }

    pub fn info(&self) -> PlayerInfo {
        PlayerInfo {
            channels: if self.config.playback == Playback::Stereo {
                2
            } else {
                1
            },
            driver_addr: self.driver_addr,
            driver_length: self.driver_length,
            power_on_delay: self.power_on_delay,
            speed_string: self.speed_string,
        }
    }

    pub fn tune(&self) -> Option<&SidTune> {
        self.tune.as_ref()
    }

    pub fn machine(&self) -> Option<&C64> {
        self.c64.as_ref()
    }

    /// Elapsed virtual time, derived from the machine clock.
    pub fn time_ms(&self) -> u32 {
        match &self.c64 {
            Some(c64) => {
                (c64.cycles() * 1000 / u64::from(c64.model().cpu_freq)) as u32
            }
            None => 0,
        }
    }

    /// Install replacement firmware images; pass `None` to run without.
    /// Without a BASIC image, BASIC tunes refuse to play; PSID tunes read
    /// the power-on RAM pattern where ROM would be.
    pub fn set_roms(
        &mut self,
        kernal: Option<&[u8]>,
        basic: Option<&[u8]>,
        chargen: Option<&[u8]>,
    ) {
        self.kernal = kernal.filter(|data| data.len() == KERNAL_SIZE).map(<[u8]>::to_vec);
        self.basic = basic.filter(|data| data.len() == BASIC_SIZE).map(<[u8]>::to_vec);
        self.chargen = chargen
            .filter(|data| data.len() == CHARGEN_SIZE)
            .map(<[u8]>::to_vec);
    }

    pub fn config(&mut self, config: Config) -> Result<(), String> {
        if config.frequency < 8000 {
            self.error = ERR_UNSUPPORTED_FREQ.to_string();
            return Err(self.error.clone());
        }
        for address in [config.second_sid_address, config.third_sid_address] {
            if address != 0 && !valid_sid_address(address) {
                self.error = ERR_UNSUPPORTED_SID_ADDR.to_string();
                return Err(self.error.clone());
            }
        }

        self.mixer
            .set_stereo(config.playback == Playback::Stereo);
        self.mixer
            .set_volume(config.left_volume, config.right_volume);
        self.config = config;

        if self.tune.is_some() {
            if let Err(message) = self.initialise() {
                self.error = message.clone();
                return Err(message);
            }
        }
        Ok(())
    }

    pub fn fast_forward(&mut self, percent: usize) -> bool {
        if !self.mixer.set_fast_forward(percent / 100) {
            self.error = ERR_INVALID_PERCENTAGE.to_string();
            return false;
        }
        true
    }

    /// Load a tune; the engine is configured for it but not started.
    pub fn load(&mut self, tune: SidTune) -> Result<(), String> {
        self.tune = Some(tune);
        if let Err(message) = self.initialise() {
            self.tune = None;
            self.c64 = None;
            self.error = message.clone();
            return Err(message);
        }
        Ok(())
    }

    pub fn select_song(&mut self, song: u16) -> Result<u16, String> {
        let selected = match self.tune.as_mut() {
            Some(tune) => tune.select_song(song),
            None => return Ok(0),
        };
        self.initialise().map_err(|message| {
            self.error = message.clone();
            message
        })?;
        Ok(selected)
    }

    pub fn mute(&mut self, chip: usize, voice: usize, enable: bool) {
        if let Some(c64) = &self.c64 {
            if let Some(sid) = c64.sids().get(chip) {
                sid.borrow_mut().sid_mut().mute(voice, enable);
            }
        }
    }

    pub fn stop(&mut self) {
        if self.tune.is_some() && self.state == State::Playing {
            self.state = State::Stopping;
        }
    }

    /// Fill `buffer` with interleaved 16-bit samples. An empty buffer runs
    /// the machine dry for roughly the same wall-clock interval, which the
    /// song-length probing paths use. Returns the number of samples written.
    pub fn play(&mut self, buffer: &mut [i16]) -> usize {
        if self.tune.is_none() || self.c64.is_none() {
            return 0;
        }
        if self.state == State::Stopped {
            self.state = State::Playing;
        }

        let mut written = 0;
        if self.state == State::Playing {
            if !buffer.is_empty() {
                self.mixer.begin(buffer.len());
                while self.state == State::Playing && self.mixer.not_finished() {
                    self.run(OUTPUT_STEP);
                    let c64 = self.c64.as_ref().unwrap();
                    self.mixer.clock_chips(c64.sids());
                    self.mixer.do_mix(c64.sids(), buffer);
                }
                written = self.mixer.samples_generated();
            } else {
                let mut size = self.c64.as_ref().unwrap().model().cpu_freq
                    / self.config.frequency;
                while self.state == State::Playing && size > 0 {
                    self.run(OUTPUT_STEP);
                    let c64 = self.c64.as_ref().unwrap();
                    self.mixer.clock_chips(c64.sids());
                    self.mixer.reset_bufs(c64.sids());
                    size -= 1;
                }
            }
        }

        if self.state == State::Stopping {
            let _ = self.initialise();
            self.state = State::Stopped;
        }

        written
    }

    fn run(&mut self, cycles: u32) {
        let c64 = self.c64.as_mut().unwrap();
        c64.run(cycles);
        if c64.is_cpu_jam() {
            self.error = ERR_CPU_JAM.to_string();
            self.state = State::Stopping;
        }
    }

    /// Configure, reset and arm the machine for the loaded tune.
    fn initialise(&mut self) -> Result<(), String> {
        self.state = State::Stopped;

        // Copy the tune facts needed below so the tune borrow does not pin
        // the whole player.
        let (load_start, data_len, clock_speed, compatibility, mus_player, current_song);
        let (tune_second, tune_third, tune_models, song_speed);
        {
            let tune = self.tune.as_ref().unwrap();
            let tune_info = tune.info();
            load_start = tune_info.load_addr;
            data_len = tune.c64_data().len();
            clock_speed = tune_info.clock_speed;
            compatibility = tune_info.compatibility;
            mus_player = tune_info.mus_player;
            current_song = tune_info.current_song;
            tune_second = tune_info.sid_chip_base(1);
            tune_third = tune_info.sid_chip_base(2);
            tune_models = tune_info.sid_models;
            song_speed = tune_info.song_speed(current_song);
        }

        if usize::from(load_start) + data_len > 0x10000 {
            return Err(ERR_UNSUPPORTED_SIZE.to_string());
        }
        let load_end = load_start + (data_len as u16 - 1);

        if compatibility == Compatibility::Basic && self.basic.is_none() {
            return Err(ERR_BASIC_ROM.to_string());
        }

        // Machine model: the tune's clock wins unless forced.
        let (model, pal) = resolve_c64_model(
            clock_speed,
            self.config.default_c64_model,
            self.config.force_c64_model,
        );
        self.speed_string = speed_string(pal, song_speed);

        // SID chips: the base chip plus whatever the tune or config adds.
        let mut bases = vec![0xd400u16];
        let second = if tune_second != 0 {
            tune_second
        } else {
            self.config.second_sid_address
        };
        if second != 0 {
            bases.push(second);
        }
        let third = if tune_third != 0 {
            tune_third
        } else {
            self.config.third_sid_address
        };
        if third != 0 && bases.len() == 2 {
            bases.push(third);
        }

        let system_model = model.system_model();
        let base_model = resolve_sid_model(
            tune_models[0],
            self.config.default_sid_model,
            self.config.force_sid_model,
        );
        let mut chips = Vec::new();
        for (index, base) in bases.iter().enumerate() {
            let chip_model = if index == 0 {
                base_model
            } else {
                // An unspecified extra chip follows the first one.
                resolve_sid_model(tune_models[index], base_model, self.config.force_sid_model)
            };
            let mut sid = Sid::new(chip_model);
            sid.set_filter_6581_curve(self.config.filter6581_curve);
            sid.set_filter_8580_curve(self.config.filter8580_curve);
            sid.set_vc_clamp(self.config.filter6581_clamp);
            sid.enable_filter(self.config.filter_enabled);
            sid.set_sampling_parameters(
                f64::from(system_model.cpu_freq),
                match self.config.sampling_method {
                    SamplingMethod::Interpolate => CoreSampling::Decimate,
                    SamplingMethod::ResampleInterpolate => CoreSampling::Resample,
                },
                f64::from(self.config.frequency),
            );
            if self.config.digi_boost && chip_model == SidModel::Mos8580 {
                sid.input(-0x9500);
            }
            chips.push((*base, sid));
        }

        // Resolve the power-on delay; values above the limit go random.
        let mut power_on_delay = self.config.power_on_delay;
        if power_on_delay > MAX_POWER_ON_DELAY {
            self.rand_seed = self
                .rand_seed
                .wrapping_mul(214_013)
                .wrapping_add(2_531_011);
            power_on_delay = ((self.rand_seed >> 3) & u32::from(MAX_POWER_ON_DELAY)) as u16;
        }
        self.power_on_delay = power_on_delay;

        let mut driver = Driver::build(self.tune.as_ref().unwrap(), load_start, load_end)
            .map_err(|e| e.message().to_string())?;
        self.driver_addr = driver.driver_addr();
        self.driver_length = driver.driver_length();

        let mut c64 = C64::new(system_model, self.config.cia_model, chips);
        c64.reset();

        // With firmware present the hardware vectors live in ROM, so the
        // firmware copy gets its reset vector pointed at the driver.
        let kernal = self.kernal.clone().map(|mut image| {
            let cold = driver.cold_entry();
            image[0x1ffc] = cold as u8;
            image[0x1ffd] = (cold >> 8) as u8;
            image
        });
        c64.set_roms(kernal, self.basic.clone(), self.chargen.clone());

        {
            let tune = self.tune.as_ref().unwrap();
            let ram = c64.ram_handle();
            let mut ram_writer =
                move |address: u16, value: u8| ram.borrow_mut().write(address, value);
            driver.install(
                tune,
                power_on_delay,
                system_model.cycles_per_frame(),
                pal,
                &mut ram_writer,
            );
            tune.place_in_c64_mem(&mut ram_writer);
            if mus_player {
                // Minimal Sidplayer entry points: init and play both return.
                ram_writer(0xec60, 0x60);
                ram_writer(0xec80, 0x60);
            }
        }

        c64.reset_cpu();
        self.c64 = Some(c64);

        info!(
            target: "player",
            "Tune armed: driver at 0x{:04x}, song {}",
            self.driver_addr,
            current_song
        );
        Ok(())
    }
}

fn valid_sid_address(address: u16) -> bool {
    if address & 0x1 != 0 {
        return false;
    }
    matches!(address, 0xd420..=0xd7fe | 0xde00..=0xdffe)
}

fn resolve_c64_model(clock: Clock, default_model: C64Model, forced: bool) -> (C64Model, bool) {
    let effective = if forced || clock == Clock::Unknown || clock == Clock::Any {
        default_model
    } else {
        match clock {
            Clock::Ntsc => C64Model::Ntsc,
            _ => C64Model::Pal,
        }
    };
    let pal = matches!(effective, C64Model::Pal | C64Model::Drean);
    (effective, pal)
}

fn resolve_sid_model(
    tune_model: TuneSidModel,
    default_model: SidModel,
    forced: bool,
) -> SidModel {
    if forced || tune_model == TuneSidModel::Unknown || tune_model == TuneSidModel::Any {
        default_model
    } else {
        match tune_model {
            TuneSidModel::Mos8580 => SidModel::Mos8580,
            _ => SidModel::Mos6581,
        }
    }
}

fn speed_string(pal: bool, speed: Speed) -> &'static str {
    match (pal, speed) {
        (true, Speed::Cia) => TXT_PAL_CIA,
        (true, Speed::Vbi) => TXT_PAL_VBI,
        (false, Speed::Cia) => TXT_NTSC_CIA,
        (false, Speed::Vbi) => TXT_NTSC_VBI,
    }
}
