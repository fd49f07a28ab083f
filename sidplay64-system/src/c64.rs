// This file is part of sidplay64.
// Copyright (c) 2018-2020 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use log::info;
use sidplay64_core::cpu::Cpu6510;
use sidplay64_core::factory::{Chip, CiaModel, Cpu, Mmu, SystemModel};
use sidplay64_core::io::{cia, Cia};
use sidplay64_core::mem::{Memory, Mmio, Pla};
use sidplay64_core::sched::{Event, EventRef, EventScheduler, Phase};
use sidplay64_core::sound::Sid;
use sidplay64_core::util::{new_shared, IoPort, IrqLine, Pin, Ram, Rom, Shared};
use sidplay64_core::video::Vic;

use super::sid_device::SidDevice;

// Design:
//   The machine itself. All components hang off the event scheduler: VIC and
//   the CIAs tick on Phi1, the CPU on Phi2, each as a self-rescheduling
//   per-cycle event, so interrupt edges land with hardware latency. SID
//   chips are not event driven; they sync lazily on register access and in
//   bulk from the player loop.

pub struct C64 {
    // Configuration
    model: SystemModel,
    // Runtime State
    scheduler: Shared<EventScheduler>,
    // Chipset
    cpu: Shared<Cpu6510>,
    cia_1: Shared<Cia>,
    cia_2: Shared<Cia>,
    vic: Shared<Vic>,
    sids: Vec<Shared<SidDevice>>,
    // Memory
    mem: Shared<Memory>,
    ram: Shared<Ram>,
    color_ram: Shared<Ram>,
    // Events
    events: Vec<EventRef>,
}

impl C64 {
    pub fn new(model: SystemModel, cia_model: CiaModel, sid_chips: Vec<(u16, Sid)>) -> C64 {
        info!(target: "c64", "Initializing system");
        let scheduler = new_shared(EventScheduler::new());

        // I/O lines
        let ba_line = new_shared(Pin::new_high());
        let cpu_io_port = new_shared(IoPort::new(0x00, 0xff));
        let cia_1_flag_pin = new_shared(Pin::new_low());
        let cia_1_port_a = new_shared(IoPort::new(0x00, 0xff));
        let cia_1_port_b = new_shared(IoPort::new(0x00, 0xff));
        let cia_2_flag_pin = new_shared(Pin::new_low());
        let cia_2_port_a = new_shared(IoPort::new(0x00, 0xff));
        let cia_2_port_b = new_shared(IoPort::new(0x00, 0xff));
        let irq_line = new_shared(IrqLine::new("irq"));
        let nmi_line = new_shared(IrqLine::new("nmi"));

        // Memory
        let ram = new_shared(Ram::new(0x10000));
        let color_ram = new_shared(Ram::new(0x0400));

        // Chipset
        let mut sids: Vec<Shared<SidDevice>> = Vec::new();
        let mut sid_bases: Vec<(u16, Shared<dyn Chip>)> = Vec::new();
        for (base, sid) in sid_chips {
            let device = new_shared(SidDevice::new(sid, scheduler.clone()));
            sid_bases.push((base, device.clone() as Shared<dyn Chip>));
            sids.push(device);
        }
        let tod_period = model.cpu_freq / model.power_freq;
        let cia_1 = new_shared(Cia::new(
            cia::Mode::Cia1,
            cia_model,
            cia_1_port_a,
            cia_1_port_b,
            cia_1_flag_pin,
            irq_line.clone(),
        ));
        cia_1.borrow_mut().set_tod_period(tod_period);
        let cia_2 = new_shared(Cia::new(
            cia::Mode::Cia2,
            cia_model,
            cia_2_port_a,
            cia_2_port_b,
            cia_2_flag_pin,
            nmi_line.clone(),
        ));
        cia_2.borrow_mut().set_tod_period(tod_period);
        let vic = new_shared(Vic::new(model, ba_line.clone(), irq_line.clone()));

        // Memory controller and processor
        let mmu = new_shared(Pla::new());
        let mmio = Mmio::new(
            cia_1.clone(),
            cia_2.clone(),
            color_ram.clone(),
            sid_bases,
            vic.clone(),
        );
        let mem = new_shared(Memory::new(
            mmu.clone(),
            mmio,
            ram.clone(),
            None,
            None,
            None,
        ));
        let cpu = new_shared(Cpu6510::new(
            mem.clone(),
            cpu_io_port.clone(),
            ba_line,
            irq_line,
            nmi_line,
        ));

        // The processor port drives the PLA bank selection.
        let mmu_clone = mmu.clone();
        cpu_io_port
            .borrow_mut()
            .set_observer(Box::new(move |cpu_port| {
                mmu_clone.borrow_mut().switch_banks(cpu_port & 0x07);
            }));

        // Per-cycle events: VIC and CIAs on Phi1, CPU on Phi2.
        let vic_event = recurring_event("vic", &scheduler, Phase::Phi1, vic.clone());
        let cia_1_event = recurring_event("cia1", &scheduler, Phase::Phi1, cia_1.clone());
        let cia_2_event = recurring_event("cia2", &scheduler, Phase::Phi1, cia_2.clone());
        let cpu_event = {
            let event = Event::new("cpu");
            let event_clone = event.clone();
            let scheduler_clone = scheduler.clone();
            let cpu_clone = cpu.clone();
            event.set_callback(Box::new(move || {
                cpu_clone.borrow_mut().clock();
                scheduler_clone
                    .borrow_mut()
                    .schedule(&event_clone, 1, Phase::Phi2);
            }));
            event
        };

        C64 {
            model,
            scheduler,
            cpu,
            cia_1,
            cia_2,
            vic,
            sids,
            mem,
            ram,
            color_ram,
            events: vec![vic_event, cia_1_event, cia_2_event, cpu_event],
        }
    }

    pub fn model(&self) -> SystemModel {
        self.model
    }

    pub fn scheduler(&self) -> Shared<EventScheduler> {
        self.scheduler.clone()
    }

    pub fn sids(&self) -> &[Shared<SidDevice>] {
        &self.sids
    }

    pub fn cycles(&self) -> u64 {
        self.scheduler.borrow().cycles()
    }

    pub fn set_roms(
        &mut self,
        kernal: Option<Vec<u8>>,
        basic: Option<Vec<u8>>,
        chargen: Option<Vec<u8>>,
    ) {
        let kernal = kernal.map(|data| new_shared(Rom::new_with_data(&data, 0xe000)));
        let basic = basic.map(|data| new_shared(Rom::new_with_data(&data, 0xa000)));
        let chargen = chargen.map(|data| new_shared(Rom::new_with_data(&data, 0xd000)));
        self.mem.borrow_mut().set_roms(kernal, basic, chargen);
    }

    pub fn has_basic_rom(&self) -> bool {
        self.mem.borrow().has_basic()
    }

    /// Reset the machine: power-on RAM pattern, chip resets, and the event
    /// spine rescheduled from a fresh clock.
    pub fn reset(&mut self) {
        info!(target: "c64", "Resetting system");
        self.ram.borrow_mut().reset();
        self.color_ram.borrow_mut().fill(0x00);

        {
            let mut scheduler = self.scheduler.borrow_mut();
            scheduler.reset();
            for event in &self.events {
                scheduler.cancel(event);
            }
        }
        self.cia_1.borrow_mut().reset();
        self.cia_2.borrow_mut().reset();
        self.vic.borrow_mut().reset();
        for sid in &self.sids {
            sid.borrow_mut().reset();
        }
        self.cpu.borrow_mut().reset();

        let mut scheduler = self.scheduler.borrow_mut();
        // Phi1 units first so chip state settles before the CPU cycle.
        scheduler.schedule(&self.events[0], 0, Phase::Phi1);
        scheduler.schedule(&self.events[1], 0, Phase::Phi1);
        scheduler.schedule(&self.events[2], 0, Phase::Phi1);
        scheduler.schedule(&self.events[3], 0, Phase::Phi2);
    }

    /// Restart the CPU through the reset vector, leaving memory alone.
    pub fn reset_cpu(&mut self) {
        self.cpu.borrow_mut().reset();
    }

    pub fn is_cpu_jam(&self) -> bool {
        self.cpu.borrow().is_cpu_jam()
    }

    pub fn cpu_pc(&self) -> u16 {
        self.cpu.borrow().get_pc()
    }

    /// Run the machine for the given number of cycles.
    pub fn run(&mut self, cycles: u32) {
        let target = self.scheduler.borrow().cycles() + u64::from(cycles);
        EventScheduler::run_until(&self.scheduler, target);
    }

    pub fn ram_handle(&self) -> Shared<Ram> {
        self.ram.clone()
    }

    pub fn write_ram(&mut self, address: u16, value: u8) {
        self.ram.borrow_mut().write(address, value);
    }

    pub fn read_ram(&self, address: u16) -> u8 {
        self.ram.borrow().read(address)
    }

    pub fn load_ram(&mut self, data: &[u8], offset: u16) {
        self.ram.borrow_mut().load(data, offset);
    }
}

fn recurring_event<C: Chip + 'static>(
    name: &'static str,
    scheduler: &Shared<EventScheduler>,
    phase: Phase,
    chip: Shared<C>,
) -> EventRef {
    let event = Event::new(name);
    let event_clone = event.clone();
    let scheduler_clone = scheduler.clone();
    event.set_callback(Box::new(move || {
        chip.borrow_mut().clock();
        scheduler_clone.borrow_mut().schedule(&event_clone, 1, phase);
    }));
    event
}

#[cfg(test)]
mod tests {
    use super::*;
    use sidplay64_core::factory::SidModel;
    use sidplay64_core::sound::SamplingMethod;

    fn setup_c64() -> C64 {
        let model = SystemModel::c64_pal();
        let mut sid = Sid::new(SidModel::Mos6581);
        sid.set_sampling_parameters(
            f64::from(model.cpu_freq),
            SamplingMethod::Decimate,
            44_100.0,
        );
        let mut c64 = C64::new(model, CiaModel::Mos6526, vec![(0xd400, sid)]);
        c64.reset();
        c64
    }

    #[test]
    fn runs_code_from_reset_vector() {
        let mut c64 = setup_c64();
        // INC $0400 in an endless loop.
        let code = [0xee, 0x00, 0x04, 0x4c, 0x00, 0x10];
        c64.load_ram(&code, 0x1000);
        c64.write_ram(0xfffc, 0x00);
        c64.write_ram(0xfffd, 0x10);
        c64.reset_cpu();
        c64.run(1000);
        assert!(c64.read_ram(0x0400) > 0);
    }

    #[test]
    fn cpu_writes_reach_the_sid() {
        let mut c64 = setup_c64();
        // LDA #$0F; STA $D418; STA $0400; loop
        let code = [
            0xa9, 0x0f, 0x8d, 0x18, 0xd4, 0x8d, 0x00, 0x04, 0x4c, 0x08, 0x10,
        ];
        c64.load_ram(&code, 0x1000);
        c64.write_ram(0xfffc, 0x00);
        c64.write_ram(0xfffd, 0x10);
        c64.reset_cpu();
        c64.run(1000);
        assert_eq!(0x0f, c64.read_ram(0x0400));
    }

    #[test]
    fn cia_timer_interrupt_reaches_cpu() {
        let mut c64 = setup_c64();
        // IRQ handler: INC $0400; read $DC0D to ack; RTI
        let handler = [0xee, 0x00, 0x04, 0xad, 0x0d, 0xdc, 0x40];
        c64.load_ram(&handler, 0x2000);
        // Main: CLI, set up CIA1 timer A, endless loop.
        let code = [
            0xa9, 0x10, 0x8d, 0x04, 0xdc, // LDA #$10; STA $DC04
            0xa9, 0x00, 0x8d, 0x05, 0xdc, // LDA #$00; STA $DC05
            0xa9, 0x81, 0x8d, 0x0d, 0xdc, // LDA #$81; STA $DC0D
            0xa9, 0x11, 0x8d, 0x0e, 0xdc, // LDA #$11; STA $DC0E
            0x58, // CLI
            0x4c, 0x14, 0x10, // JMP self
        ];
        c64.load_ram(&code, 0x1000);
        c64.write_ram(0xfffc, 0x00);
        c64.write_ram(0xfffd, 0x10);
        c64.write_ram(0xfffe, 0x00);
        c64.write_ram(0xffff, 0x20);
        c64.reset_cpu();
        c64.run(5000);
        assert!(c64.read_ram(0x0400) > 0);
    }

    #[test]
    fn machine_time_advances() {
        let mut c64 = setup_c64();
        c64.run(1234);
        assert_eq!(1234, c64.cycles());
    }

    #[test]
    fn sid_produces_samples_while_running() {
        let mut c64 = setup_c64();
        let code = [
            0xa9, 0x0f, 0x8d, 0x18, 0xd4, // LDA #$0F; STA $D418 (volume)
            0xa9, 0x00, 0x8d, 0x05, 0xd4, // attack/decay
            0xa9, 0xf0, 0x8d, 0x06, 0xd4, // sustain/release
            0xa9, 0x00, 0x8d, 0x00, 0xd4, // freq lo
            0xa9, 0x10, 0x8d, 0x01, 0xd4, // freq hi
            0xa9, 0x21, 0x8d, 0x04, 0xd4, // sawtooth + gate
            0x4c, 0x1e, 0x10, // JMP self
        ];
        c64.load_ram(&code, 0x1000);
        c64.write_ram(0xfffc, 0x00);
        c64.write_ram(0xfffd, 0x10);
        c64.reset_cpu();
        c64.run(50_000);
        for sid in c64.sids() {
            sid.borrow_mut().sync();
        }
        let sid = c64.sids()[0].borrow();
        assert!(sid.pos() > 2000);
        assert!(sid.buffer()[..sid.pos()].iter().any(|&s| s != 0));
    }
}
