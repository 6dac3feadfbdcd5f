//! Bounded reader pool
//!
//! Random-access file handles lent out for one read at a time. At most
//! `capacity` handles are open; callers past that wait on a condition
//! variable until a handle comes back or the wait times out.
//!
//! A lent handle lives in a shared slot so `drain` can close it from the
//! outside when its borrower does not return it in time.

use std::collections::HashMap;
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::error::{Result, StoreError};

type Slot = Arc<Mutex<Option<File>>>;

#[derive(Debug, Default)]
struct PoolState {
    /// Handles ready for reuse
    idle: Vec<File>,
    /// Handles currently lent out, by lease id
    lent: HashMap<u64, Slot>,
    /// Open handles, idle and lent
    open: usize,
    next_lease: u64,
    closed: bool,
}

/// Capacity-bounded pool of read handles on one file
#[derive(Debug)]
pub struct ReaderPool {
    path: PathBuf,
    capacity: usize,
    wait_timeout: Duration,
    state: Mutex<PoolState>,
    returned: Condvar,
}

impl ReaderPool {
    pub fn new(path: impl Into<PathBuf>, capacity: usize, wait_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            capacity,
            wait_timeout,
            state: Mutex::new(PoolState::default()),
            returned: Condvar::new(),
        }
    }

    /// Borrow a handle, waiting up to the pool timeout
    pub fn acquire(&self) -> Result<PooledReader<'_>> {
        let started = Instant::now();
        let deadline = started + self.wait_timeout;
        let mut state = self.state.lock();

        loop {
            if state.closed {
                return Err(StoreError::Closed);
            }

            if let Some(file) = state.idle.pop() {
                return Ok(self.lend(&mut state, file));
            }

            if state.open < self.capacity {
                let file = File::open(&self.path)?;
                state.open += 1;
                debug!(open = state.open, capacity = self.capacity, "opened reader handle");
                return Ok(self.lend(&mut state, file));
            }

            let timed_out = self.returned.wait_until(&mut state, deadline).timed_out();
            if timed_out && state.idle.is_empty() && state.open >= self.capacity && !state.closed {
                let waited = started.elapsed();
                warn!(capacity = self.capacity, ?waited, "reader pool exhausted");
                return Err(StoreError::PoolExhausted {
                    capacity: self.capacity,
                    waited,
                });
            }
        }
    }

    fn lend(&self, state: &mut PoolState, file: File) -> PooledReader<'_> {
        let lease = state.next_lease;
        state.next_lease += 1;

        let slot = Arc::new(Mutex::new(Some(file)));
        state.lent.insert(lease, Arc::clone(&slot));

        PooledReader {
            pool: self,
            lease,
            slot,
        }
    }

    fn release(&self, lease: u64, slot: &Slot) {
        let mut state = self.state.lock();

        // Already force-closed and uncounted by drain
        if state.lent.remove(&lease).is_none() {
            return;
        }

        match slot.lock().take() {
            Some(file) if !state.closed => state.idle.push(file),
            _ => state.open -= 1,
        }

        drop(state);
        self.returned.notify_all();
    }

    /// Close the pool: wait for lent handles up to `timeout`, then close stragglers
    ///
    /// Returns the number of handles closed by force.
    pub fn drain(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();

        state.closed = true;
        let idle = state.idle.len();
        state.idle.clear();
        state.open -= idle;
        self.returned.notify_all();

        while !state.lent.is_empty() {
            if self.returned.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }

        let stragglers: Vec<Slot> = state.lent.drain().map(|(_, slot)| slot).collect();
        state.open -= stragglers.len();
        drop(state);

        for slot in &stragglers {
            slot.lock().take();
        }
        if !stragglers.is_empty() {
            warn!(
                count = stragglers.len(),
                ?timeout,
                "force-closed reader handles not returned before drain timeout"
            );
        }

        stragglers.len()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Open handles, idle and lent
    pub fn open_count(&self) -> usize {
        self.state.lock().open
    }

    pub fn idle_count(&self) -> usize {
        self.state.lock().idle.len()
    }

    pub fn lent_count(&self) -> usize {
        self.state.lock().lent.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

/// A borrowed read handle; returned to the pool on drop
#[derive(Debug)]
pub struct PooledReader<'a> {
    pool: &'a ReaderPool,
    lease: u64,
    slot: Slot,
}

impl PooledReader<'_> {
    /// Fill `buf` from `offset`
    ///
    /// A short read means the frame runs past the end of the file, which is
    /// reported as corruption at `offset`.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut slot = self.slot.lock();
        let file = slot.as_mut().ok_or(StoreError::Closed)?;

        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => StoreError::corrupted(
                offset,
                format!("frame of {} bytes extends past end of file", buf.len()),
            ),
            _ => StoreError::Io(e),
        })
    }
}

impl Drop for PooledReader<'_> {
    fn drop(&mut self) {
        self.pool.release(self.lease, &self.slot);
    }
}
