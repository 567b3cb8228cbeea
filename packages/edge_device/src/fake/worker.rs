use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crate::ERR_POISONED_LOCK;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A small pool of threads standing in for the engine's own worker threads.
///
/// Every callback the fake engine invokes runs on one of these threads, never on the thread that
/// caused the completion.
#[derive(Debug)]
pub(crate) struct WorkerPool {
    sender: Option<mpsc::Sender<Job>>,
    threads: Vec<JoinHandle<()>>,
    outstanding: Arc<Outstanding>,
}

#[derive(Debug, Default)]
struct Outstanding {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Outstanding {
    fn increment(&self) {
        let mut count = self.count.lock().expect(ERR_POISONED_LOCK);
        *count = count.saturating_add(1);
    }

    fn decrement(&self) {
        let mut count = self.count.lock().expect(ERR_POISONED_LOCK);
        *count = count.saturating_sub(1);

        if *count == 0 {
            self.idle.notify_all();
        }
    }
}

impl WorkerPool {
    pub(crate) fn new(thread_count: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let outstanding = Arc::new(Outstanding::default());

        let threads = (0..thread_count)
            .map(|index| {
                let receiver = Arc::clone(&receiver);
                let outstanding = Arc::clone(&outstanding);

                thread::Builder::new()
                    .name(format!("fake-engine-{index}"))
                    .spawn(move || worker_loop(&receiver, &outstanding))
                    .expect("the operating system must allow spawning fake engine threads")
            })
            .collect();

        Self {
            sender: Some(sender),
            threads,
            outstanding,
        }
    }

    /// Runs `job` on one of the worker threads.
    pub(crate) fn run(&self, job: impl FnOnce() + Send + 'static) {
        let Some(sender) = &self.sender else {
            return;
        };

        self.outstanding.increment();

        if sender.send(Box::new(job)).is_err() {
            // All workers are gone; the job is dropped without running.
            self.outstanding.decrement();
        }
    }

    /// Blocks until every job handed to [`run()`][Self::run] so far has finished.
    pub(crate) fn wait_idle(&self) {
        let mut count = self.outstanding.count.lock().expect(ERR_POISONED_LOCK);

        while *count > 0 {
            count = self.outstanding.idle.wait(count).expect(ERR_POISONED_LOCK);
        }
    }
}

fn worker_loop(receiver: &Mutex<mpsc::Receiver<Job>>, outstanding: &Outstanding) {
    loop {
        let job = {
            let receiver = receiver.lock().expect(ERR_POISONED_LOCK);
            receiver.recv()
        };

        let Ok(job) = job else {
            // The pool was dropped.
            return;
        };

        scopeguard::defer! {
            outstanding.decrement();
        }

        job();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel ends the worker loops once the queue is drained.
        drop(self.sender.take());

        let current = thread::current().id();

        for handle in self.threads.drain(..) {
            // The last reference may be released by a job running on a worker itself.
            if handle.thread().id() == current {
                continue;
            }

            // A worker only panics if a callback panicked; that has already been reported.
            drop(handle.join());
        }
    }
}
