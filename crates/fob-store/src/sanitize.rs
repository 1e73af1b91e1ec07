//! Three-phase consistency pass over the in-memory image.
//!
//! Runs before any mutating operation and whenever invariants must hold.
//! No I/O: the pass only resets slots in memory (marking them dirty), and
//! repeated runs leave a clean image untouched.
//!
//! - Phase A walks every chain from its head and resets chains whose link
//!   structure, age sequence or position sequence is broken.
//! - Phase B resolves duplicate blob names, keeping the newest chain.
//! - Phase C collects aged objects no surviving chain reaches.

use tracing::debug;

use crate::StoreImage;

/// Restores invariants by resetting inconsistent chains.
pub fn sanitize(image: &mut StoreImage) {
    let reset_chains = validate_chains(image);
    let reset_duplicates = resolve_duplicates(image);
    let reset_orphans = collect_orphans(image);
    if reset_chains + reset_duplicates + reset_orphans > 0 {
        debug!(
            reset_chains,
            reset_duplicates, reset_orphans, "sanitize reset inconsistent objects"
        );
    }
}

/// Phase A: validate every chain reachable from a head chunk.
///
/// Returns the number of objects reset.
fn validate_chains(image: &mut StoreImage) -> usize {
    let mut reset = 0;
    for head in 0..image.object_count() {
        if !image.record(head).is_head() {
            continue;
        }
        if let Err(visited) = walk_chain(image, head) {
            for index in visited {
                image.reset_object(index);
                reset += 1;
            }
        }
    }
    reset
}

/// Follows the chain from `head`. On success returns the chain indices; on
/// a structural failure returns the members visited so far, all of which
/// belong to the broken chain and must be reset.
fn walk_chain(image: &StoreImage, head: usize) -> Result<Vec<usize>, Vec<usize>> {
    let count = image.object_count();
    let mut seen = vec![false; count];
    let mut visited = vec![head];
    seen[head] = true;

    let mut current = head;
    let mut age = image.record(head).age();
    let mut pos: u16 = 0;

    loop {
        let next = match image.record(current).next() {
            Some(next) => next as usize,
            None => return Err(visited),
        };
        if next == current {
            // Terminal self-loop.
            return Ok(visited);
        }
        if next >= count || seen[next] {
            return Err(visited);
        }

        age = match age.checked_add(1) {
            Some(age) => age,
            None => return Err(visited),
        };
        pos = match pos.checked_add(1) {
            Some(pos) => pos,
            None => return Err(visited),
        };

        let record = image.record(next);
        if record.age() != age || record.pos() != Some(pos) {
            // Covers empty successors, foreign chunks, and heads appearing
            // mid-chain (their position is 0, never the expected one).
            return Err(visited);
        }

        seen[next] = true;
        visited.push(next);
        current = next;
    }
}

/// Phase B: at most one head per blob name; the highest age wins.
///
/// The writer cannot produce two same-named heads of equal age; should a
/// hand-built image contain them, the lower slot index wins so the pass
/// stays deterministic.
fn resolve_duplicates(image: &mut StoreImage) -> usize {
    let mut reset = 0;
    let heads: Vec<(usize, String, u32)> = image
        .head_indices()
        .into_iter()
        .filter_map(|index| {
            image
                .record(index)
                .meta()
                .map(|meta| (index, meta.name.clone(), image.record(index).age()))
        })
        .collect();

    let mut winners: Vec<(usize, &str, u32)> = Vec::new();
    let mut losers: Vec<usize> = Vec::new();

    for (index, name, age) in &heads {
        match winners.iter_mut().find(|(_, n, _)| n == name) {
            None => winners.push((*index, name, *age)),
            Some(winner) => {
                if *age > winner.2 {
                    losers.push(winner.0);
                    *winner = (*index, name, *age);
                } else {
                    losers.push(*index);
                }
            }
        }
    }

    for head in losers {
        for index in image.chain_indices(head) {
            image.reset_object(index);
            reset += 1;
        }
    }
    reset
}

/// Phase C: reset aged objects no surviving chain reaches.
fn collect_orphans(image: &mut StoreImage) -> usize {
    let mut reachable = vec![false; image.object_count()];
    for head in image.head_indices() {
        for index in image.chain_indices(head) {
            reachable[index] = true;
        }
    }

    let mut reset = 0;
    for index in 0..image.object_count() {
        if image.record(index).age() != 0 && !reachable[index] {
            image.reset_object(index);
            reset += 1;
        }
    }
    reset
}
