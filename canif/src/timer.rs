//! Timers of a dispatcher
//!
//! Timers live in a fixed array of slots allocated when the dispatcher is created. Three
//! singly-linked lists thread through the slots:
//! * the active list in creation order, traversed on every tick,
//! * the list of timers created during the current tick, appended to the active list at
//!   the end of the tick,
//! * the free list of reclaimed slots.
//!
//! A killed timer stays in the active list until the next traversal reclaims its slot.
//! Each reclamation bumps the slot generation, which invalidates outstanding handles.
//!
//! The clock is a wrapping millisecond counter. A timer is due if `now - due >= 0` in
//! wrapping arithmetic, which keeps the comparison valid across the counter overflow as long
//! as no span exceeds `i32::MAX` ms.

use embassy_time::Duration;

use crate::context::Callback;
use crate::dispatcher::EventSourceIndex;

/// Reference to a timer of a dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerHandle {
    index: u16,
    generation: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerError {
    /// All timer slots of the dispatcher are in use
    NoTimerSlotLeft,
    /// The time span is zero, negative or too long for the given kind of timer
    InvalidTime,
}

pub(crate) fn millis(span: Duration) -> Result<i32, TimerError> {
    i32::try_from(span.as_millis()).map_err(|_| TimerError::InvalidTime)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Periodic(i32),
    SingleShot,
    SingleShotAutoKill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Suspended,
    Killed,
}

struct Timer<A> {
    mode: Mode,
    phase: Phase,
    due: i32,
    callback: Callback<A>,
    owner: EventSourceIndex,
    user_data: usize,
}

pub(crate) struct Slot<A> {
    generation: u16,
    next: Option<u16>,
    timer: Option<Timer<A>>,
}

impl<A> Slot<A> {
    pub(crate) const fn vacant() -> Self {
        Self {
            generation: 0,
            next: None,
            timer: None,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct List {
    head: Option<u16>,
    tail: Option<u16>,
}

pub(crate) struct Schedule {
    now: i32,
    tick: i32,
    active: List,
    created: List,
    free: Option<u16>,
    unused: u16,
}

/// A timer whose callback is due
pub(crate) struct Elapsed<A> {
    pub handle: TimerHandle,
    pub callback: Callback<A>,
    pub owner: EventSourceIndex,
    pub user_data: usize,
}

pub(crate) struct TimerSet<'a, A> {
    slots: &'a mut [Slot<A>],
    schedule: Schedule,
}

impl<'a, A> TimerSet<'a, A> {
    pub(crate) fn new(slots: &'a mut [Slot<A>], tick: i32) -> Self {
        assert!(tick > 0);
        assert!(slots.len() <= usize::from(u16::MAX));
        Self {
            slots,
            schedule: Schedule {
                now: 0,
                tick,
                active: List::default(),
                created: List::default(),
                free: None,
                unused: 0,
            },
        }
    }

    pub(crate) fn view(&mut self) -> Timers<'_, A> {
        Timers {
            slots: &mut *self.slots,
            schedule: &mut self.schedule,
        }
    }

    pub(crate) fn now(&self) -> i32 {
        self.schedule.now
    }

    pub(crate) fn tick(&self) -> i32 {
        self.schedule.tick
    }
}

/// Mutable access to a timer set, handed to callbacks
pub(crate) struct Timers<'s, A> {
    slots: &'s mut [Slot<A>],
    schedule: &'s mut Schedule,
}

impl<A> Timers<'_, A> {
    fn reborrow(&mut self) -> Timers<'_, A> {
        Timers {
            slots: &mut *self.slots,
            schedule: &mut *self.schedule,
        }
    }

    pub(crate) fn now(&self) -> i32 {
        self.schedule.now
    }

    fn insert(&mut self, timer: Timer<A>) -> Result<TimerHandle, TimerError> {
        let index = match self.schedule.free {
            Some(index) => {
                self.schedule.free = self.slots[usize::from(index)].next;
                index
            }
            None if usize::from(self.schedule.unused) < self.slots.len() => {
                let index = self.schedule.unused;
                self.schedule.unused += 1;
                index
            }
            None => return Err(TimerError::NoTimerSlotLeft),
        };

        let slot = &mut self.slots[usize::from(index)];
        slot.timer = Some(timer);
        slot.next = None;
        let handle = TimerHandle {
            index,
            generation: slot.generation,
        };

        let created = &mut self.schedule.created;
        match created.tail {
            Some(tail) => self.slots[usize::from(tail)].next = Some(index),
            None => created.head = Some(index),
        }
        created.tail = Some(index);
        Ok(handle)
    }

    pub(crate) fn create_periodic(
        &mut self,
        period: i32,
        shift: i32,
        callback: Callback<A>,
        owner: EventSourceIndex,
        user_data: usize,
    ) -> Result<TimerHandle, TimerError> {
        if period <= 0 || shift < 0 {
            return Err(TimerError::InvalidTime);
        }
        let period = period.max(self.schedule.tick);
        let due = self.schedule.now.wrapping_add(period).wrapping_add(shift);
        self.insert(Timer {
            mode: Mode::Periodic(period),
            phase: Phase::Running,
            due,
            callback,
            owner,
            user_data,
        })
    }

    pub(crate) fn create_single_shot(
        &mut self,
        delay: i32,
        kill_at_due_time: bool,
        callback: Callback<A>,
        owner: EventSourceIndex,
        user_data: usize,
    ) -> Result<TimerHandle, TimerError> {
        if delay < 0 || (delay == 0 && kill_at_due_time) {
            return Err(TimerError::InvalidTime);
        }
        let (mode, phase) = match (kill_at_due_time, delay) {
            (true, _) => (Mode::SingleShotAutoKill, Phase::Running),
            (false, 0) => (Mode::SingleShot, Phase::Suspended),
            (false, _) => (Mode::SingleShot, Phase::Running),
        };
        self.insert(Timer {
            mode,
            phase,
            due: self.schedule.now.wrapping_add(delay),
            callback,
            owner,
            user_data,
        })
    }

    fn timer_mut(&mut self, handle: TimerHandle) -> &mut Timer<A> {
        let slot = &mut self.slots[usize::from(handle.index)];
        assert!(
            slot.generation == handle.generation,
            "timer handle used after the timer was reclaimed"
        );
        unwrap!(slot.timer.as_mut())
    }

    pub(crate) fn kill(&mut self, handle: TimerHandle) {
        self.timer_mut(handle).phase = Phase::Killed;
    }

    pub(crate) fn suspend(&mut self, handle: TimerHandle) {
        let timer = self.timer_mut(handle);
        match (timer.mode, timer.phase) {
            (_, Phase::Killed) => panic!("suspending a killed timer"),
            (Mode::SingleShot, _) => timer.phase = Phase::Suspended,
            (Mode::SingleShotAutoKill, _) => timer.phase = Phase::Killed,
            (Mode::Periodic(_), _) => panic!("suspending a periodic timer"),
        }
    }

    pub(crate) fn retrigger(&mut self, handle: TimerHandle, delay: i32) -> Result<(), TimerError> {
        if delay <= 0 {
            return Err(TimerError::InvalidTime);
        }
        let due = self.schedule.now.wrapping_add(delay);
        let timer = self.timer_mut(handle);
        assert!(
            !matches!(timer.mode, Mode::Periodic(_)) && timer.phase != Phase::Killed,
            "only living single-shot timers can be retriggered"
        );
        timer.due = due;
        timer.phase = Phase::Running;
        Ok(())
    }

    pub(crate) fn swap_callback(&mut self, handle: TimerHandle, callback: Callback<A>) -> Callback<A> {
        core::mem::replace(&mut self.timer_mut(handle).callback, callback)
    }

    pub(crate) fn is_running(&mut self, handle: TimerHandle) -> bool {
        self.timer_mut(handle).phase == Phase::Running
    }

    fn reclaim(&mut self, index: u16) {
        let slot = &mut self.slots[usize::from(index)];
        slot.timer = None;
        slot.generation = slot.generation.wrapping_add(1);
        slot.next = self.schedule.free;
        self.schedule.free = Some(index);
    }

    /// Runs one tick: fires due timers in creation order, reclaims killed timers,
    /// activates the timers created meanwhile and advances the clock.
    pub(crate) fn advance(&mut self, mut fire: impl FnMut(Timers<'_, A>, Elapsed<A>)) {
        let now = self.schedule.now;
        let mut prev: Option<u16> = None;
        let mut cursor = self.schedule.active.head;

        while let Some(index) = cursor {
            let slot = &self.slots[usize::from(index)];
            cursor = slot.next;
            let generation = slot.generation;
            let timer = unwrap!(slot.timer.as_ref());

            match timer.phase {
                Phase::Killed => {
                    match prev {
                        Some(prev) => self.slots[usize::from(prev)].next = cursor,
                        None => self.schedule.active.head = cursor,
                    }
                    if cursor.is_none() {
                        self.schedule.active.tail = prev;
                    }
                    self.reclaim(index);
                    continue;
                }
                Phase::Running if now.wrapping_sub(timer.due) >= 0 => {
                    let elapsed = Elapsed {
                        handle: TimerHandle { index, generation },
                        callback: timer.callback,
                        owner: timer.owner,
                        user_data: timer.user_data,
                    };
                    fire(self.reborrow(), elapsed);

                    let timer = unwrap!(self.slots[usize::from(index)].timer.as_mut());
                    match (timer.mode, timer.phase) {
                        (Mode::Periodic(period), Phase::Running) => {
                            timer.due = timer.due.wrapping_add(period)
                        }
                        (Mode::SingleShot, Phase::Running)
                            if now.wrapping_sub(timer.due) >= 0 =>
                        {
                            timer.phase = Phase::Suspended
                        }
                        (Mode::SingleShotAutoKill, _) => timer.phase = Phase::Killed,
                        _ => {}
                    }
                }
                _ => {}
            }
            prev = Some(index);
        }

        let created = core::mem::take(&mut self.schedule.created);
        if let Some(head) = created.head {
            match self.schedule.active.tail {
                Some(tail) => self.slots[usize::from(tail)].next = Some(head),
                None => self.schedule.active.head = Some(head),
            }
            self.schedule.active.tail = created.tail;
        }

        self.schedule.now = now.wrapping_add(self.schedule.tick);
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::context::Context;
    use std::boxed::Box;
    use std::vec::Vec;

    const OWNER: EventSourceIndex = EventSourceIndex::Internal(0);

    fn on_elapse(_: &mut Context<'_, ()>) {}

    fn new_set(capacity: usize, tick: i32) -> TimerSet<'static, ()> {
        let slots: Vec<Slot<()>> = (0..capacity).map(|_| Slot::vacant()).collect();
        TimerSet::new(Box::leak(slots.into_boxed_slice()), tick)
    }

    /// Runs ticks until the clock reaches `end` and collects (now, handle) of all elapses
    fn run(
        set: &mut TimerSet<'_, ()>,
        end: i32,
        mut on_fire: impl FnMut(&mut Timers<'_, ()>, TimerHandle),
    ) -> Vec<(i32, TimerHandle)> {
        let mut fired = Vec::new();
        while set.now() <= end {
            let now = set.now();
            set.view().advance(|mut timers, elapsed| {
                fired.push((now, elapsed.handle));
                on_fire(&mut timers, elapsed.handle);
            });
        }
        fired
    }

    #[test]
    fn test_periodic_monotonic() {
        for period in [1, 2, 7, 10, 25] {
            let mut set = new_set(1, 1);
            let start = 3;
            run(&mut set, start - 1, |_, _| {});

            let handle = set
                .view()
                .create_periodic(period, 0, on_elapse, OWNER, 0)
                .unwrap();
            let fired = run(&mut set, 200, |_, _| {});

            let expected: Vec<_> = (1..)
                .map(|k| start + k * period)
                .take_while(|&t| t <= 200)
                .map(|t| (t, handle))
                .collect();
            assert_eq!(fired, expected, "period {period}");
        }
    }

    #[test]
    fn test_periodic_shift_and_clamp() {
        let mut set = new_set(2, 10);
        let shifted = set.view().create_periodic(100, 30, on_elapse, OWNER, 0).unwrap();
        let clamped = set.view().create_periodic(3, 0, on_elapse, OWNER, 0).unwrap();
        let fired = run(&mut set, 250, |_, _| {});

        let shifted_times: Vec<_> = fired.iter().filter(|f| f.1 == shifted).map(|f| f.0).collect();
        assert_eq!(shifted_times, [130, 230]);
        let clamped_count = fired.iter().filter(|f| f.1 == clamped).count();
        assert_eq!(clamped_count, 25);
    }

    #[test]
    fn test_single_shot_retrigger_overwrites() {
        let mut set = new_set(1, 1);
        let handle = set.view().create_single_shot(50, false, on_elapse, OWNER, 0).unwrap();
        run(&mut set, 19, |_, _| {});

        // Retrigger at tick 20 with a delay shorter and then longer than the remainder
        set.view().retrigger(handle, 5).unwrap();
        set.view().retrigger(handle, 40).unwrap();
        let fired = run(&mut set, 100, |_, _| {});
        assert_eq!(fired, [(60, handle)]);
        assert!(!set.view().is_running(handle));
    }

    #[test]
    fn test_retrigger_from_own_callback() {
        let mut set = new_set(1, 1);
        let handle = set.view().create_single_shot(1, false, on_elapse, OWNER, 0).unwrap();
        let fired = run(&mut set, 30, |timers, own| {
            timers.retrigger(own, 10).unwrap();
        });
        let times: Vec<_> = fired.iter().map(|f| f.0).collect();
        assert_eq!(times, [1, 11, 21]);
        assert!(set.view().is_running(handle));
    }

    #[test]
    fn test_zero_delay_is_suspended() {
        let mut set = new_set(1, 1);
        let handle = set.view().create_single_shot(0, false, on_elapse, OWNER, 0).unwrap();
        assert!(run(&mut set, 10, |_, _| {}).is_empty());

        set.view().retrigger(handle, 2).unwrap();
        assert_eq!(run(&mut set, 20, |_, _| {}), [(13, handle)]);
        assert_eq!(
            set.view().create_single_shot(0, true, on_elapse, OWNER, 0),
            Err(TimerError::InvalidTime)
        );
        assert_eq!(set.view().retrigger(handle, 0), Err(TimerError::InvalidTime));
    }

    #[test]
    fn test_firing_order_is_creation_order() {
        let mut set = new_set(3, 1);
        let a = set.view().create_single_shot(5, false, on_elapse, OWNER, 0).unwrap();
        let b = set.view().create_periodic(5, 0, on_elapse, OWNER, 0).unwrap();
        let c = set.view().create_single_shot(5, true, on_elapse, OWNER, 0).unwrap();
        let fired = run(&mut set, 5, |_, _| {});
        assert_eq!(fired, [(5, a), (5, b), (5, c)]);
    }

    #[test]
    fn test_timer_created_in_callback_fires_next_tick() {
        let mut set = new_set(4, 1);
        set.view().create_single_shot(2, false, on_elapse, OWNER, 0).unwrap();
        let mut created = None;
        let fired = run(&mut set, 10, |timers, _| {
            if created.is_none() {
                // Due immediately, but not considered before the next tick
                created = Some(timers.create_periodic(1, 0, on_elapse, OWNER, 0).unwrap());
            }
        });
        let created = created.unwrap();
        let first = fired.iter().find(|f| f.1 == created).unwrap();
        assert_eq!(first.0, 3);
    }

    #[test]
    fn test_kill_and_reuse() {
        let mut set = new_set(2, 1);
        let auto = set.view().create_single_shot(1, true, on_elapse, OWNER, 0).unwrap();
        let periodic = set.view().create_periodic(1, 0, on_elapse, OWNER, 0).unwrap();
        assert_eq!(
            set.view().create_periodic(1, 0, on_elapse, OWNER, 0),
            Err(TimerError::NoTimerSlotLeft)
        );

        let fired = run(&mut set, 1, |_, _| {});
        assert_eq!(fired, [(1, auto), (1, periodic)]);

        // The auto-kill slot is reclaimed on the next traversal
        set.view().kill(periodic);
        run(&mut set, 2, |_, _| {});
        let reused = set.view().create_periodic(1, 0, on_elapse, OWNER, 0).unwrap();
        let reused_again = set.view().create_periodic(1, 0, on_elapse, OWNER, 0).unwrap();
        assert_ne!(reused, auto);
        assert_ne!(reused_again, periodic);

        let fired = run(&mut set, 4, |_, _| {});
        assert_eq!(fired.len(), 2);
    }

    #[test]
    #[should_panic]
    fn test_stale_handle() {
        let mut set = new_set(1, 1);
        let handle = set.view().create_periodic(1, 0, on_elapse, OWNER, 0).unwrap();
        set.view().kill(handle);
        run(&mut set, 3, |_, _| {});
        set.view().create_periodic(1, 0, on_elapse, OWNER, 0).unwrap();
        set.view().kill(handle);
    }

    #[test]
    fn test_suspend() {
        let mut set = new_set(2, 1);
        let single = set.view().create_single_shot(3, false, on_elapse, OWNER, 0).unwrap();
        let auto = set.view().create_single_shot(3, true, on_elapse, OWNER, 0).unwrap();
        set.view().suspend(single);
        set.view().suspend(auto);
        assert!(run(&mut set, 10, |_, _| {}).is_empty());

        set.view().retrigger(single, 1).unwrap();
        assert_eq!(run(&mut set, 12, |_, _| {}), [(12, single)]);
    }

    #[test]
    fn test_postpone_auto_kill() {
        let mut set = new_set(1, 1);
        let handle = set.view().create_single_shot(10, true, on_elapse, OWNER, 0).unwrap();
        run(&mut set, 4, |_, _| {});

        set.view().retrigger(handle, 20).unwrap();
        assert_eq!(run(&mut set, 60, |_, _| {}), [(25, handle)]);

        // The slot was reclaimed after the single elapse
        let reused = set.view().create_single_shot(5, true, on_elapse, OWNER, 0).unwrap();
        assert_ne!(reused, handle);
    }

    #[test]
    fn test_auto_kill_retrigger_in_own_callback() {
        let mut set = new_set(1, 1);
        let handle = set.view().create_single_shot(3, true, on_elapse, OWNER, 0).unwrap();
        let fired = run(&mut set, 30, |timers, own| {
            timers.retrigger(own, 5).unwrap();
        });
        assert_eq!(fired, [(3, handle)]);
    }

    #[test]
    #[should_panic]
    fn test_retrigger_periodic() {
        let mut set = new_set(1, 1);
        let handle = set.view().create_periodic(5, 0, on_elapse, OWNER, 0).unwrap();
        let _ = set.view().retrigger(handle, 2);
    }

    #[test]
    fn test_clock_wraps() {
        let mut set = new_set(1, 10);
        set.schedule.now = i32::MAX - 15;
        let handle = set.view().create_single_shot(30, false, on_elapse, OWNER, 0).unwrap();

        let mut fired = Vec::new();
        for _ in 0..5 {
            let now = set.now();
            set.view().advance(|_, elapsed| fired.push((now, elapsed.handle)));
        }
        assert_eq!(fired, [((i32::MAX - 15).wrapping_add(30), handle)]);
    }
}
