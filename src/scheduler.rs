//! Cooperative thread scheduler
//!
//! Threads are top-level frames taking turns on the single current-frame
//! slot. The running thread keeps control until it calls `yield_thread()` or
//! (with a non-zero quantum) executes `quantum` instructions and reaches a
//! backward jump. Rotation parks its current frame at the back of the ready
//! queue and loads the next one. The run loop itself lives in
//! `interp::exec_loop`.

use crate::heap::ObjRef;
use std::collections::VecDeque;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(pub u32);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thread {
    pub id: ThreadId,
    /// Frame to continue from; stale while the thread is running
    pub frame: ObjRef,
    pub main: bool,
}

#[derive(Debug)]
pub struct Scheduler {
    ready: VecDeque<Thread>,
    running: Option<Thread>,
    next_id: u32,
    reschedule: bool,
    quantum: u32,
}

impl Scheduler {
    pub fn new(quantum: u32) -> Self {
        Self {
            ready: VecDeque::new(),
            running: None,
            next_id: 0,
            reschedule: false,
            quantum,
        }
    }

    /// Instructions per slice before a safe point rotates; 0 = never
    pub fn quantum(&self) -> u32 {
        self.quantum
    }

    pub fn add(&mut self, frame: ObjRef, main: bool) -> ThreadId {
        let id = ThreadId(self.next_id);
        self.next_id += 1;
        self.ready.push_back(Thread { id, frame, main });
        id
    }

    /// Take the next ready thread and mark it running
    pub fn next(&mut self) -> Option<Thread> {
        let thread = self.ready.pop_front()?;
        self.running = Some(thread);
        self.reschedule = false;
        Some(thread)
    }

    /// Send the running thread to the back of the queue at `frame`
    pub fn park(&mut self, frame: ObjRef) {
        if let Some(mut thread) = self.running.take() {
            thread.frame = frame;
            self.ready.push_back(thread);
        }
    }

    /// The running thread is done
    pub fn finish(&mut self) -> Option<Thread> {
        self.running.take()
    }

    pub fn running(&self) -> Option<Thread> {
        self.running
    }

    /// Drop every thread
    pub fn clear(&mut self) {
        self.ready.clear();
        self.running = None;
        self.reschedule = false;
    }

    pub fn request_reschedule(&mut self) {
        self.reschedule = true;
    }

    pub fn take_reschedule(&mut self) -> bool {
        std::mem::take(&mut self.reschedule)
    }

    /// Frames of threads waiting in the ready queue
    pub fn frames(&self) -> impl Iterator<Item = ObjRef> + '_ {
        self.ready.iter().map(|t| t.frame)
    }

    pub fn len(&self) -> usize {
        self.ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ready.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(index: u32) -> ObjRef {
        ObjRef {
            index,
            generation: 0,
        }
    }

    #[test]
    fn test_round_robin_order() {
        let mut s = Scheduler::new(0);
        let a = s.add(frame(1), true);
        let b = s.add(frame(2), false);

        assert_eq!(s.next().map(|t| t.id), Some(a));
        s.park(frame(10));
        assert_eq!(s.next().map(|t| t.id), Some(b));
        s.finish();

        let again = s.next().unwrap();
        assert_eq!(again.id, a);
        assert_eq!(again.frame, frame(10));
        assert!(again.main);
        s.finish();
        assert!(s.next().is_none());
    }

    #[test]
    fn test_reschedule_flag_is_consumed() {
        let mut s = Scheduler::new(0);
        s.request_reschedule();
        assert!(s.take_reschedule());
        assert!(!s.take_reschedule());
    }
}
