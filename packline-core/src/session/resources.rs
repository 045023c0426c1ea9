//! Session-scoped resource acquisition.
//!
//! The keep-alive audio stream (and any hardware remote-control targets)
//! are acquired once at session start and released once at session stop —
//! scoped acquisition, not ad hoc cleanup calls: the loop owns a
//! [`SessionHold`] guard, and every exit path (explicit stop, completion
//! dismissal, error) drops it exactly once.
//!
//! The factory is `Send` so it can move into the session's blocking task;
//! the hold it produces is **not** required to be `Send` — cpal streams are
//! bound to their creation thread, so acquisition happens inside the loop
//! thread and the guard never leaves it.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use tracing::debug;

use crate::error::Result;

/// Opaque guard over acquired session resources. Release happens on drop.
pub trait SessionHold {}

/// Acquires the session's ambient resources at loop start.
pub trait ResourceFactory: Send + 'static {
    fn acquire(&mut self) -> Result<Box<dyn SessionHold>>;
}

/// No resources — unit tests and hosts without audio hardware.
#[derive(Debug, Default)]
pub struct NullResources;

struct NullHold;

impl SessionHold for NullHold {}

impl ResourceFactory for NullResources {
    fn acquire(&mut self) -> Result<Box<dyn SessionHold>> {
        Ok(Box::new(NullHold))
    }
}

/// Test fake that counts acquisitions and releases, for verifying the
/// exactly-once release property.
#[derive(Debug, Default)]
pub struct CountingResources {
    pub acquired: Arc<AtomicUsize>,
    pub released: Arc<AtomicUsize>,
}

impl CountingResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counters(&self) -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        (Arc::clone(&self.acquired), Arc::clone(&self.released))
    }
}

struct CountingHold {
    released: Arc<AtomicUsize>,
}

impl SessionHold for CountingHold {}

impl Drop for CountingHold {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

impl ResourceFactory for CountingResources {
    fn acquire(&mut self) -> Result<Box<dyn SessionHold>> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingHold {
            released: Arc::clone(&self.released),
        }))
    }
}

/// Real audio resources: the silent keep-alive output stream that prevents
/// the OS from suspending the audio route between announce/listen phases.
#[cfg(feature = "audio-cpal")]
#[derive(Debug, Default)]
pub struct AudioResources;

#[cfg(feature = "audio-cpal")]
struct AudioHold {
    _keep_alive: crate::audio::KeepAliveStream,
}

#[cfg(feature = "audio-cpal")]
impl SessionHold for AudioHold {}

#[cfg(feature = "audio-cpal")]
impl Drop for AudioHold {
    fn drop(&mut self) {
        debug!("releasing keep-alive audio stream");
    }
}

#[cfg(feature = "audio-cpal")]
impl ResourceFactory for AudioResources {
    fn acquire(&mut self) -> Result<Box<dyn SessionHold>> {
        let keep_alive = crate::audio::KeepAliveStream::open()?;
        Ok(Box::new(AudioHold {
            _keep_alive: keep_alive,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counting_resources_release_on_drop() {
        let mut factory = CountingResources::new();
        let (acquired, released) = factory.counters();

        let hold = factory.acquire().expect("acquire");
        assert_eq!(acquired.load(Ordering::SeqCst), 1);
        assert_eq!(released.load(Ordering::SeqCst), 0);

        drop(hold);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
