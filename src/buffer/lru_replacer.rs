use std::collections::HashMap;

use parking_lot::Mutex;

use crate::common::FrameId;

use super::Replacer;

#[derive(Debug, Clone, Copy)]
struct Link {
    prev: Option<FrameId>,
    next: Option<FrameId>,
}

/// Doubly-linked list threaded through a hash index, oldest unpin at the head
#[derive(Debug, Default)]
struct LruList {
    links: HashMap<FrameId, Link>,
    head: Option<FrameId>,
    tail: Option<FrameId>,
}

impl LruList {
    fn contains(&self, frame_id: FrameId) -> bool {
        self.links.contains_key(&frame_id)
    }

    fn push_back(&mut self, frame_id: FrameId) {
        let link = Link {
            prev: self.tail,
            next: None,
        };
        match self.tail {
            Some(tail) => {
                if let Some(tail_link) = self.links.get_mut(&tail) {
                    tail_link.next = Some(frame_id);
                }
            }
            None => self.head = Some(frame_id),
        }
        self.tail = Some(frame_id);
        self.links.insert(frame_id, link);
    }

    fn remove(&mut self, frame_id: FrameId) -> bool {
        let Some(link) = self.links.remove(&frame_id) else {
            return false;
        };
        match link.prev {
            Some(prev) => {
                if let Some(prev_link) = self.links.get_mut(&prev) {
                    prev_link.next = link.next;
                }
            }
            None => self.head = link.next,
        }
        match link.next {
            Some(next) => {
                if let Some(next_link) = self.links.get_mut(&next) {
                    next_link.prev = link.prev;
                }
            }
            None => self.tail = link.prev,
        }
        true
    }

    fn pop_front(&mut self) -> Option<FrameId> {
        let head = self.head?;
        self.remove(head);
        Some(head)
    }

    fn len(&self) -> usize {
        self.links.len()
    }
}

/// Least-recently-unpinned replacement policy.
///
/// Frames enter at the back when they become evictable and the victim is
/// taken from the front. Every operation is O(1).
pub struct LruReplacer {
    /// Number of frames in the pool; larger frame ids are ignored
    capacity: usize,
    list: Mutex<LruList>,
}

impl LruReplacer {
    /// Creates a replacer for a pool of `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            list: Mutex::new(LruList::default()),
        }
    }

    /// Returns the number of frames this replacer can track.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn in_range(&self, frame_id: FrameId) -> bool {
        frame_id.as_usize() < self.capacity
    }
}

impl Replacer for LruReplacer {
    fn victim(&self) -> Option<FrameId> {
        self.list.lock().pop_front()
    }

    fn pin(&self, frame_id: FrameId) {
        if !self.in_range(frame_id) {
            return;
        }
        self.list.lock().remove(frame_id);
    }

    fn unpin(&self, frame_id: FrameId) {
        if !self.in_range(frame_id) {
            return;
        }
        let mut list = self.list.lock();
        if !list.contains(frame_id) {
            list.push_back(frame_id);
        }
    }

    fn size(&self) -> usize {
        self.list.lock().len()
    }
}
