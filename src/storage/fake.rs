use super::{Storage, StorageError};
use crate::metric::Point;
use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
};

/// In-memory storage for tests.
#[derive(Default)]
pub struct FakeStorage {
    pub down: Cell<bool>,
    // Readiness results consumed one per check before falling back to `down`.
    pub ready_script: RefCell<VecDeque<bool>>,
    pub reject_writes: Cell<bool>,
    pub ready_checks: Cell<usize>,
    pub batches: RefCell<Vec<Vec<Point>>>,
}

impl FakeStorage {
    pub fn scripted(ready: &[bool]) -> Self {
        Self {
            ready_script: RefCell::new(ready.iter().copied().collect()),
            ..Default::default()
        }
    }

    pub fn points(&self) -> Vec<Point> {
        self.batches.borrow().iter().flatten().cloned().collect()
    }
}

impl Storage for FakeStorage {
    fn ready(&self) -> Result<(), StorageError> {
        self.ready_checks.set(self.ready_checks.get() + 1);
        let up = match self.ready_script.borrow_mut().pop_front() {
            Some(up) => up,
            None => !self.down.get(),
        };
        match up {
            true => Ok(()),
            false => Err(StorageError::NotReady(503)),
        }
    }

    fn write(&self, points: &[Point]) -> Result<(), StorageError> {
        if self.reject_writes.get() {
            return Err(StorageError::Rejected {
                status: 400,
                body: "rejected".to_string(),
            });
        }
        self.batches.borrow_mut().push(points.to_vec());
        Ok(())
    }
}
