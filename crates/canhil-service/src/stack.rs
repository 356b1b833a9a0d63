//! Bounded receive history and latest-by-id table

use std::collections::{HashMap, VecDeque};

use canhil_core::Frame;
use parking_lot::Mutex;

/// Bounded, ordered receive history plus a latest-frame-by-id table.
///
/// Single writer (the receive pipeline), many readers. Readers always get a
/// point-in-time snapshot; append and clear go through the same lock so the
/// containers can never be corrupted, at the cost of one cycle of possible
/// staleness around `clear`.
pub struct ReceiveStack {
    inner: Mutex<Inner>,
}

struct Inner {
    frames: VecDeque<Frame>,
    latest: HashMap<u32, Frame>,
    capacity: usize,
}

impl ReceiveStack {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                frames: VecDeque::with_capacity(capacity.min(4096)),
                latest: HashMap::new(),
                capacity,
            }),
        }
    }

    /// Record one frame, evicting the oldest when at capacity.
    pub fn push(&self, frame: Frame) {
        let mut inner = self.inner.lock();
        if inner.frames.len() >= inner.capacity {
            inner.frames.pop_front();
        }
        inner.latest.insert(frame.id, frame.clone());
        inner.frames.push_back(frame);
    }

    /// Point-in-time copy of the whole history.
    pub fn snapshot(&self) -> Vec<Frame> {
        self.inner.lock().frames.iter().cloned().collect()
    }

    /// History frames carrying the given id, oldest first.
    pub fn frames_for(&self, id: u32) -> Vec<Frame> {
        self.inner
            .lock()
            .frames
            .iter()
            .filter(|f| f.id == id)
            .cloned()
            .collect()
    }

    /// Most recent frame for an id; survives `clear`.
    pub fn latest(&self, id: u32) -> Option<Frame> {
        self.inner.lock().latest.get(&id).cloned()
    }

    /// Truncate the history. The latest-by-id table is kept so signal reads
    /// keep working across monitor sampling windows.
    pub fn clear(&self) {
        self.inner.lock().frames.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_evicts_exactly_the_oldest() {
        let stack = ReceiveStack::new(3);
        for i in 0..4u32 {
            stack.push(Frame::new(0x100 + i, vec![i as u8; 8]));
        }
        let frames = stack.snapshot();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].id, 0x101);
        assert_eq!(frames[2].id, 0x103);
    }

    #[test]
    fn latest_tracks_per_id_and_survives_clear() {
        let stack = ReceiveStack::new(10);
        stack.push(Frame::new(0x152, vec![1; 8]));
        stack.push(Frame::new(0x152, vec![2; 8]));
        stack.push(Frame::new(0x200, vec![3; 8]));
        assert_eq!(stack.latest(0x152).unwrap().data, vec![2; 8]);
        stack.clear();
        assert!(stack.is_empty());
        assert_eq!(stack.latest(0x152).unwrap().data, vec![2; 8]);
    }

    #[test]
    fn frames_for_filters_by_id_in_order() {
        let stack = ReceiveStack::new(10);
        stack.push(Frame::new(0x152, vec![1; 8]));
        stack.push(Frame::new(0x200, vec![2; 8]));
        stack.push(Frame::new(0x152, vec![3; 8]));
        let frames = stack.frames_for(0x152);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, vec![1; 8]);
        assert_eq!(frames[1].data, vec![3; 8]);
    }
}
