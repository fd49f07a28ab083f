// This file is part of sidplay64.
// Copyright (c) 2018-2020 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::cell::RefCell;
use std::rc::Rc;

use crate::util::Shared;

// Design:
//   All time-sensitive units express themselves as self-rescheduling events on a
//   single virtual clock with two phases per cycle. The queue is kept sorted by
//   (fire time, insertion order) so events landing on the same half-cycle run in
//   FIFO order. Callbacks are detached from their event while they run, which
//   lets a callback reschedule or cancel its own event without touching the
//   queue mid-dispatch.

/// Clock phase within one system cycle. The VIC owns Phi1, the CPU owns Phi2.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Phase {
    Phi1 = 0,
    Phi2 = 1,
}

pub type EventRef = Rc<Event>;

pub struct Event {
    #[allow(unused)]
    name: &'static str,
    callback: RefCell<Option<Box<dyn FnMut()>>>,
}

impl Event {
    pub fn new(name: &'static str) -> EventRef {
        Rc::new(Event {
            name,
            callback: RefCell::new(None),
        })
    }

    pub fn new_with(name: &'static str, callback: Box<dyn FnMut()>) -> EventRef {
        Rc::new(Event {
            name,
            callback: RefCell::new(Some(callback)),
        })
    }

    pub fn set_callback(&self, callback: Box<dyn FnMut()>) {
        self.callback.replace(Some(callback));
    }

    fn dispatch(event: &EventRef) {
        let taken = event.callback.borrow_mut().take();
        if let Some(mut callback) = taken {
            callback();
            let slot = &mut *event.callback.borrow_mut();
            if slot.is_none() {
                *slot = Some(callback);
            }
        }
    }
}

struct Entry {
    fire_at: u64,
    seq: u64,
    event: EventRef,
}

pub struct EventScheduler {
    // Runtime State
    clock: u64,
    seq: u64,
    queue: Vec<Entry>,
}

impl EventScheduler {
    pub fn new() -> Self {
        Self {
            clock: 0,
            seq: 0,
            queue: Vec::new(),
        }
    }

    /// Current time in full cycles.
    pub fn cycles(&self) -> u64 {
        self.clock >> 1
    }

    pub fn phase(&self) -> Phase {
        if self.clock & 1 == 0 {
            Phase::Phi1
        } else {
            Phase::Phi2
        }
    }

    /// Insert an event at `cycles() + delay` on the given phase. Events on the
    /// same half-cycle dispatch in insertion order. Scheduling into the past is
    /// a programming error.
    pub fn schedule(&mut self, event: &EventRef, delay: u64, phase: Phase) {
        let fire_at = ((self.cycles() + delay) << 1) | phase as u64;
        assert!(
            fire_at >= self.clock,
            "event scheduled in the past at {}",
            fire_at
        );
        let seq = self.seq;
        self.seq += 1;
        let pos = self
            .queue
            .partition_point(|entry| (entry.fire_at, entry.seq) <= (fire_at, seq));
        self.queue.insert(
            pos,
            Entry {
                fire_at,
                seq,
                event: event.clone(),
            },
        );
    }

    /// Remove the event from the queue if present; a no-op otherwise.
    pub fn cancel(&mut self, event: &EventRef) {
        self.queue
            .retain(|entry| !Rc::ptr_eq(&entry.event, event));
    }

    pub fn is_pending(&self, event: &EventRef) -> bool {
        self.queue
            .iter()
            .any(|entry| Rc::ptr_eq(&entry.event, event))
    }

    pub fn reset(&mut self) {
        self.clock = 0;
        self.seq = 0;
        self.queue.clear();
    }

    fn pop_due(&mut self) -> Option<EventRef> {
        if self
            .queue
            .first()
            .map_or(false, |entry| entry.fire_at <= self.clock)
        {
            Some(self.queue.remove(0).event)
        } else {
            None
        }
    }

    /// Dispatch all events due on the current half-cycle, then advance to the
    /// next one.
    pub fn step_half(scheduler: &Shared<EventScheduler>) {
        loop {
            let next = scheduler.borrow_mut().pop_due();
            match next {
                Some(event) => Event::dispatch(&event),
                None => break,
            }
        }
        scheduler.borrow_mut().clock += 1;
    }

    /// Run one full system cycle: Phi1 events, then Phi2 events.
    pub fn step_cycle(scheduler: &Shared<EventScheduler>) {
        EventScheduler::step_half(scheduler);
        EventScheduler::step_half(scheduler);
    }

    /// Dispatch events until the clock reaches `target` full cycles.
    pub fn run_until(scheduler: &Shared<EventScheduler>, target: u64) {
        while scheduler.borrow().cycles() < target {
            EventScheduler::step_half(scheduler);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::{new_shared, new_shared_cell};

    #[test]
    fn phase_ordering() {
        let scheduler = new_shared(EventScheduler::new());
        let trace = new_shared(Vec::new());
        let trace1 = trace.clone();
        let phi2 = Event::new_with("phi2", Box::new(move || trace1.borrow_mut().push("phi2")));
        let trace2 = trace.clone();
        let phi1 = Event::new_with("phi1", Box::new(move || trace2.borrow_mut().push("phi1")));
        scheduler.borrow_mut().schedule(&phi2, 1, Phase::Phi2);
        scheduler.borrow_mut().schedule(&phi1, 1, Phase::Phi1);
        EventScheduler::run_until(&scheduler, 2);
        assert_eq!(vec!["phi1", "phi2"], *trace.borrow());
    }

    #[test]
    fn fifo_on_same_half_cycle() {
        let scheduler = new_shared(EventScheduler::new());
        let trace = new_shared(Vec::new());
        let trace1 = trace.clone();
        let first = Event::new_with("first", Box::new(move || trace1.borrow_mut().push(1)));
        let trace2 = trace.clone();
        let second = Event::new_with("second", Box::new(move || trace2.borrow_mut().push(2)));
        scheduler.borrow_mut().schedule(&first, 3, Phase::Phi1);
        scheduler.borrow_mut().schedule(&second, 3, Phase::Phi1);
        EventScheduler::run_until(&scheduler, 4);
        assert_eq!(vec![1, 2], *trace.borrow());
    }

    #[test]
    fn cancel_is_idempotent() {
        let scheduler = new_shared(EventScheduler::new());
        let fired = new_shared_cell(false);
        let fired_clone = fired.clone();
        let event = Event::new_with("once", Box::new(move || fired_clone.set(true)));
        scheduler.borrow_mut().schedule(&event, 2, Phase::Phi1);
        scheduler.borrow_mut().cancel(&event);
        scheduler.borrow_mut().cancel(&event);
        assert!(!scheduler.borrow().is_pending(&event));
        EventScheduler::run_until(&scheduler, 4);
        assert!(!fired.get());
    }

    #[test]
    fn reschedule_preserves_dispatch_order() {
        let scheduler = new_shared(EventScheduler::new());
        let trace = new_shared(Vec::new());
        let trace1 = trace.clone();
        let a = Event::new_with("a", Box::new(move || trace1.borrow_mut().push("a")));
        let trace2 = trace.clone();
        let b = Event::new_with("b", Box::new(move || trace2.borrow_mut().push("b")));
        scheduler.borrow_mut().schedule(&a, 5, Phase::Phi2);
        scheduler.borrow_mut().schedule(&b, 6, Phase::Phi2);
        // Cancelling and rescheduling with the same delay leaves the future
        // dispatch order unchanged.
        scheduler.borrow_mut().cancel(&a);
        scheduler.borrow_mut().schedule(&a, 5, Phase::Phi2);
        EventScheduler::run_until(&scheduler, 7);
        assert_eq!(vec!["a", "b"], *trace.borrow());
    }

    #[test]
    fn event_reschedules_itself() {
        let scheduler = new_shared(EventScheduler::new());
        let count = new_shared_cell(0u32);
        let event = Event::new("tick");
        let scheduler_clone = scheduler.clone();
        let count_clone = count.clone();
        let self_ref = event.clone();
        event.set_callback(Box::new(move || {
            count_clone.set(count_clone.get() + 1);
            if count_clone.get() < 3 {
                scheduler_clone
                    .borrow_mut()
                    .schedule(&self_ref, 1, Phase::Phi1);
            }
        }));
        scheduler.borrow_mut().schedule(&event, 1, Phase::Phi1);
        EventScheduler::run_until(&scheduler, 10);
        assert_eq!(3, count.get());
    }

    #[test]
    #[should_panic]
    fn schedule_in_the_past_traps() {
        let scheduler = new_shared(EventScheduler::new());
        EventScheduler::run_until(&scheduler, 2);
        let event = Event::new_with("late", Box::new(|| {}));
        // Current phase is Phi1 of cycle 2; cycle 1 is in the past.
        let cycles = scheduler.borrow().cycles();
        assert_eq!(2, cycles);
        scheduler.borrow_mut().schedule(&event, 0, Phase::Phi1);
        // Re-entering the current half-cycle is legal, going below is not.
        let mut s = scheduler.borrow_mut();
        s.clock += 1;
        s.schedule(&event, 0, Phase::Phi1);
    }
}
