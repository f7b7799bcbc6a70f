//! Pure operations over a venue's queues.
//!
//! Nothing here touches a venue directly. Each function takes the current
//! sequences and returns new ones, so a failed operation never leaves a
//! queue half-modified.

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::{CommandError, CommandResult, Track};

/// Takes the next track to play.
///
/// The priority queue is always drained before the active queue. Returns
/// `None` and the queues unchanged if both are empty.
pub fn pop_next(priority: &[Track], active: &[Track]) -> (Option<Track>, Vec<Track>, Vec<Track>) {
    if let Some((next, rest)) = priority.split_first() {
        return (Some(next.clone()), rest.to_vec(), active.to_vec());
    }

    if let Some((next, rest)) = active.split_first() {
        return (Some(next.clone()), vec![], rest.to_vec());
    }

    (None, vec![], vec![])
}

/// Inserts a track at the given position, or at the end if none is given.
pub fn insert(queue: &[Track], track: Track, position: Option<usize>) -> CommandResult<Vec<Track>> {
    let position = position.unwrap_or(queue.len());

    if position > queue.len() {
        return Err(CommandError::OutOfRange {
            index: position,
            len: queue.len(),
        });
    }

    let mut result = Vec::with_capacity(queue.len() + 1);
    result.extend_from_slice(&queue[..position]);
    result.push(track);
    result.extend_from_slice(&queue[position..]);

    Ok(result)
}

/// Removes the track at the given index.
pub fn remove(queue: &[Track], index: usize) -> CommandResult<Vec<Track>> {
    if index >= queue.len() {
        return Err(CommandError::OutOfRange {
            index,
            len: queue.len(),
        });
    }

    let mut result = queue.to_vec();
    result.remove(index);

    Ok(result)
}

/// Returns a new ordering of the queue.
///
/// This is a Fisher-Yates shuffle driven by a seeded [StdRng], so the same
/// seed always produces the same order for the same input.
pub fn shuffle(queue: &[Track], seed: u64) -> Vec<Track> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut result = queue.to_vec();

    result.shuffle(&mut rng);
    result
}

/// Records a played track, forgetting the oldest ones past `limit`.
pub fn push_history(history: &mut Vec<Track>, track: Track, limit: usize) {
    history.push(track);

    let overflow = history.len().saturating_sub(limit);
    history.drain(..overflow);
}
