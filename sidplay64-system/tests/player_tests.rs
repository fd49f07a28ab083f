// This file is part of sidplay64.
// Copyright (c) 2018-2020 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use sidplay64_loader::SidTune;
use sidplay64_system::{Config, Player, SamplingMethod};

/// Build a small PSID image around the given init/play routines.
fn build_psid(init_code: &[u8], play_code: &[u8]) -> Vec<u8> {
    let mut image = vec![0u8; 0x7c];
    image[0..4].copy_from_slice(b"PSID");
    image[5] = 0x02; // version
    image[7] = 0x7c; // data offset
    image[8] = 0x10;
    image[9] = 0x00; // load address 0x1000
    image[10] = 0x10;
    image[11] = 0x00; // init address 0x1000
    image[12] = 0x10;
    image[13] = 0x40; // play address 0x1040
    image[15] = 0x01; // songs
    image[17] = 0x01; // start song
    image[22..26].copy_from_slice(b"test");

    let mut payload = vec![0x60u8; 0x80];
    payload[..init_code.len()].copy_from_slice(init_code);
    payload[0x40..0x40 + play_code.len()].copy_from_slice(play_code);
    image.extend_from_slice(&payload);
    image
}

/// Init gates a sawtooth on voice 1 at full volume; play bumps a RAM cell.
fn test_tune() -> SidTune {
    let init = [
        0xa9, 0x0f, 0x8d, 0x18, 0xd4, // LDA #$0F; STA $D418
        0xa9, 0x00, 0x8d, 0x05, 0xd4, // LDA #$00; STA $D405
        0xa9, 0xf0, 0x8d, 0x06, 0xd4, // LDA #$F0; STA $D406
        0xa9, 0x00, 0x8d, 0x00, 0xd4, // LDA #$00; STA $D400
        0xa9, 0x10, 0x8d, 0x01, 0xd4, // LDA #$10; STA $D401
        0xa9, 0x21, 0x8d, 0x04, 0xd4, // LDA #$21; STA $D404
        0xa9, 0x00, 0x8d, 0xe0, 0x03, // LDA #$00; STA $03E0
        0x60, // RTS
    ];
    let play = [
        0xee, 0xe0, 0x03, // INC $03E0
        0x60, // RTS
    ];
    SidTune::load(&build_psid(&init, &play), None).unwrap()
}

fn test_config() -> Config {
    Config {
        power_on_delay: 0x0100,
        sampling_method: SamplingMethod::Interpolate,
        ..Config::default()
    }
}

#[test]
fn play_fills_the_requested_buffer() {
    let mut player = Player::new();
    player.config(test_config()).unwrap();
    player.load(test_tune()).unwrap();

    let mut buffer = vec![0i16; 4410];
    let written = player.play(&mut buffer);
    assert_eq!(buffer.len(), written);

    // By the second tenth of a second the gated voice is audible.
    let written = player.play(&mut buffer);
    assert_eq!(buffer.len(), written);
    assert!(buffer.iter().any(|&sample| sample != 0));
}

#[test]
fn play_routine_runs_at_frame_rate() {
    let mut player = Player::new();
    player.config(test_config()).unwrap();
    player.load(test_tune()).unwrap();

    let mut buffer = vec![0i16; 44100];
    player.play(&mut buffer);
    // One emulated second of PAL video: the interrupt handler bumped the
    // counter about 50 times.
    let count = player.machine().unwrap().read_ram(0x03e0);
    assert!(count >= 40, "play ran {} times", count);
    assert!(count <= 60, "play ran {} times", count);
}

#[test]
fn tune_payload_round_trips_into_memory() {
    let mut player = Player::new();
    player.config(test_config()).unwrap();
    let tune = test_tune();
    let expected: Vec<u8> = tune.c64_data().to_vec();
    let load_addr = tune.info().load_addr;
    player.load(tune).unwrap();

    let machine = player.machine().unwrap();
    for (offset, byte) in expected.iter().enumerate() {
        assert_eq!(
            *byte,
            machine.read_ram(load_addr + offset as u16),
            "mismatch at offset {}",
            offset
        );
    }
}

#[test]
fn unsupported_frequency_is_rejected() {
    let mut player = Player::new();
    let config = Config {
        frequency: 4000,
        ..Config::default()
    };
    let err = player.config(config).unwrap_err();
    assert_eq!("SIDPLAYER ERROR: Unsupported sampling frequency.", err);
    assert_eq!("SIDPLAYER ERROR: Unsupported sampling frequency.", player.error());
}

#[test]
fn unsupported_sid_address_is_rejected() {
    let mut player = Player::new();
    let config = Config {
        second_sid_address: 0xd421,
        ..Config::default()
    };
    let err = player.config(config).unwrap_err();
    assert_eq!("SIDPLAYER ERROR: Unsupported SID address.", err);
}

#[test]
fn halt_instruction_surfaces_runtime_error() {
    let init = [0x02u8]; // HLT
    let play = [0x60u8];
    let tune = SidTune::load(&build_psid(&init, &play), None).unwrap();

    let mut player = Player::new();
    player.config(test_config()).unwrap();
    player.load(tune).unwrap();

    let mut buffer = vec![0i16; 4410];
    let written = player.play(&mut buffer);
    assert!(written <= buffer.len());
    assert_eq!("Illegal instruction executed", player.error());

    // The engine re-arms and accepts further calls.
    let _ = player.play(&mut buffer);
}

#[test]
fn stop_requests_halt_and_rearms() {
    let mut player = Player::new();
    player.config(test_config()).unwrap();
    player.load(test_tune()).unwrap();

    let mut buffer = vec![0i16; 4410];
    player.play(&mut buffer);
    let before = player.time_ms();
    assert!(before > 0);
    player.stop();
    player.play(&mut buffer);
    // A stop re-initialises the machine, rewinding virtual time.
    assert!(player.time_ms() <= before);
}

#[test]
fn silent_play_advances_time_without_output() {
    let mut player = Player::new();
    player.config(test_config()).unwrap();
    player.load(test_tune()).unwrap();

    let mut empty: [i16; 0] = [];
    let written = player.play(&mut empty);
    assert_eq!(0, written);
    assert!(player.time_ms() > 0);
}

#[test]
fn second_sid_from_tune_is_mapped() {
    // PSID v3 with a second chip at $D420.
    let init = [
        0xa9, 0x0f, 0x8d, 0x38, 0xd4, // LDA #$0F; STA $D438 (second chip volume)
        0x60,
    ];
    let play = [0x60u8];
    let mut image = build_psid(&init, &play);
    image[5] = 0x03; // version 3
    image[122] = 0x42; // second SID at $D420
    let tune = SidTune::load(&image, None).unwrap();
    assert_eq!(0xd420, tune.info().sid_chip_base(1));

    let mut player = Player::new();
    player.config(test_config()).unwrap();
    player.load(tune).unwrap();
    assert_eq!(2, player.machine().unwrap().sids().len());

    let mut buffer = vec![0i16; 4410];
    let written = player.play(&mut buffer);
    assert_eq!(buffer.len(), written);
}

#[test]
fn driver_stays_clear_of_the_tune() {
    let mut player = Player::new();
    player.config(test_config()).unwrap();
    player.load(test_tune()).unwrap();
    let info = player.info();
    assert!(info.driver_length > 0);
    let driver_page = info.driver_addr >> 8;
    // The tune occupies pages 0x10.. ; the driver must not.
    assert_ne!(0x10, driver_page);
    assert!(driver_page >= 4);
}
