use crate::common::FrameId;

/// Eviction policy used by the buffer pool.
///
/// A frame is tracked by the replacer only while its pin count is zero. The
/// buffer pool calls `unpin` when a frame becomes evictable and `pin` when it
/// is in use again; `victim` hands back the next frame to reuse.
pub trait Replacer: Send + Sync {
    /// Removes and returns the next frame to evict, or `None` if no frame is
    /// evictable.
    fn victim(&self) -> Option<FrameId>;

    /// Marks the frame as in use. Pinning an untracked frame is a no-op.
    fn pin(&self, frame_id: FrameId);

    /// Marks the frame as evictable. Unpinning a tracked frame is a no-op and
    /// does not refresh its position.
    fn unpin(&self, frame_id: FrameId);

    /// Number of evictable frames.
    fn size(&self) -> usize;
}
