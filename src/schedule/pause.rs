use std::thread;
use std::time::Duration;

use log::debug;

/// Something the scheduler can wait on between rounds
pub trait Pause {
    fn pause(&mut self, interval: Duration);
}

/// Block the current thread
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleep;

impl Pause for ThreadSleep {
    fn pause(&mut self, interval: Duration) {
        debug!("Sleeping for {:?}", interval);
        thread::sleep(interval);
    }
}

impl<P: Pause + ?Sized> Pause for &mut P {
    fn pause(&mut self, interval: Duration) {
        (**self).pause(interval)
    }
}
