//! Cooperative job scheduler.
//!
//! Expensive work (bulk store population, sentence decoding) is split into
//! small jobs that are drained one at a time. A job receives the queue it
//! was popped from and the scheduler's shared data, and continues itself by
//! pushing further jobs. Between two `process_next` calls the host is free
//! to run anything else; there is no preemption.
//!
//! Jobs are plain values (usually an enum of step variants) rather than
//! boxed closures, so one driver loop interprets every kind of step.

use std::collections::VecDeque;

/// A unit of cooperative work operating on shared data of type `C`.
pub trait Job<C>: Sized {
    /// Run this step. Continuations are pushed onto `queue`.
    fn run(self, queue: &mut JobQueue<Self>, shared: &mut C);
}

/// FIFO queue of pending jobs.
#[derive(Debug)]
pub struct JobQueue<J> {
    jobs: VecDeque<J>,
}

impl<J> JobQueue<J> {
    pub fn new() -> Self {
        Self {
            jobs: VecDeque::new(),
        }
    }

    /// Append a job at the tail.
    pub fn push(&mut self, job: J) {
        self.jobs.push_back(job);
    }

    fn pop(&mut self) -> Option<J> {
        self.jobs.pop_front()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl<J> Default for JobQueue<J> {
    fn default() -> Self {
        Self::new()
    }
}

/// What a single `process_next` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// One job ran; more may be pending.
    Ran,
    /// The queue was empty; the completion callback has fired.
    Complete,
}

type Completion<'a, C> = Box<dyn FnOnce(&mut C) + 'a>;

/// Queue + shared data bag + completion callback.
pub struct Scheduler<'a, J, C> {
    queue: JobQueue<J>,
    shared: C,
    on_complete: Option<Completion<'a, C>>,
    steps: usize,
}

impl<'a, J: Job<C>, C> Scheduler<'a, J, C> {
    pub fn new(shared: C) -> Self {
        Self {
            queue: JobQueue::new(),
            shared,
            on_complete: None,
            steps: 0,
        }
    }

    /// Register the callback invoked (once) when the queue drains.
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&mut C) + 'a,
    {
        self.on_complete = Some(Box::new(callback));
        self
    }

    pub fn push(&mut self, job: J) {
        self.queue.push(job);
    }

    /// Pop the head job and run it, or fire the completion callback if the
    /// queue is empty.
    pub fn process_next(&mut self) -> Progress {
        match self.queue.pop() {
            Some(job) => {
                job.run(&mut self.queue, &mut self.shared);
                self.steps += 1;
                Progress::Ran
            }
            None => {
                if let Some(callback) = self.on_complete.take() {
                    callback(&mut self.shared);
                }
                Progress::Complete
            }
        }
    }

    /// Drive the queue until it drains. Returns the number of jobs run.
    pub fn run(&mut self) -> usize {
        let before = self.steps;
        while self.process_next() == Progress::Ran {}
        self.steps - before
    }

    /// Run at most `budget` jobs; returns `Complete` once drained.
    pub fn run_for(&mut self, budget: usize) -> Progress {
        for _ in 0..budget {
            if self.process_next() == Progress::Complete {
                return Progress::Complete;
            }
        }
        if self.queue.is_empty() {
            self.process_next()
        } else {
            Progress::Ran
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Total jobs run so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn shared(&self) -> &C {
        &self.shared
    }

    pub fn into_shared(self) -> C {
        self.shared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Counts down, re-pushing itself until zero.
    enum Countdown {
        Tick(u32),
    }

    impl Job<Vec<u32>> for Countdown {
        fn run(self, queue: &mut JobQueue<Self>, shared: &mut Vec<u32>) {
            let Countdown::Tick(n) = self;
            shared.push(n);
            if n > 0 {
                queue.push(Countdown::Tick(n - 1));
            }
        }
    }

    #[test]
    fn job_continues_itself_until_done() {
        let mut sched = Scheduler::new(Vec::new());
        sched.push(Countdown::Tick(3));
        assert_eq!(sched.run(), 4);
        assert_eq!(sched.into_shared(), vec![3, 2, 1, 0]);
    }

    #[test]
    fn completion_fires_once_with_shared_data() {
        let seen = RefCell::new(Vec::new());
        let mut sched = Scheduler::new(Vec::new()).on_complete(|data: &mut Vec<u32>| {
            seen.borrow_mut().push(data.len());
        });
        sched.push(Countdown::Tick(1));
        assert_eq!(sched.process_next(), Progress::Ran);
        assert_eq!(sched.process_next(), Progress::Ran);
        assert_eq!(sched.process_next(), Progress::Complete);
        assert_eq!(sched.process_next(), Progress::Complete);
        drop(sched);
        assert_eq!(seen.into_inner(), vec![2]);
    }

    #[test]
    fn fifo_order_across_pushes() {
        let mut sched = Scheduler::new(Vec::new());
        sched.push(Countdown::Tick(0));
        sched.push(Countdown::Tick(2));
        sched.push(Countdown::Tick(0));
        sched.run();
        // continuations queue behind jobs pushed earlier
        assert_eq!(sched.shared(), &vec![0, 2, 0, 1, 0]);
    }

    #[test]
    fn run_for_respects_budget() {
        let mut sched = Scheduler::new(Vec::new());
        sched.push(Countdown::Tick(5));
        assert_eq!(sched.run_for(2), Progress::Ran);
        assert_eq!(sched.shared().len(), 2);
        assert_eq!(sched.pending(), 1);
        assert_eq!(sched.run_for(100), Progress::Complete);
        assert_eq!(sched.steps(), 6);
    }
}
