//! Spawn layouts and food placement.
//!
//! Both clients run these functions on the same inputs and must reach the
//! same answer, so everything here is a pure function of the grid size, the
//! seed-driven [`Lcg`] and the bodies to avoid.

use crate::rng::Lcg;
use crate::types::{Cell, Direction, ParticipantId};

/// Initial body and heading for one spawn slot. `cells[0]` is the head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnLayout {
    pub cells: Vec<Cell>,
    pub heading: Direction,
}

/// Layout of spawn slot 0 or 1 on an `N x N` grid (`N >= 8`).
///
/// Slot 0 sits three rows above the centre heading right; slot 1 sits
/// three rows below heading left. The two never overlap.
pub fn spawn_layout(grid_size: u32, slot: usize) -> SpawnLayout {
    let mid = (grid_size / 2) as i32;
    if slot == 0 {
        SpawnLayout {
            cells: vec![
                Cell::new(mid, mid - 3),
                Cell::new(mid - 1, mid - 3),
                Cell::new(mid - 2, mid - 3),
            ],
            heading: Direction::Right,
        }
    } else {
        SpawnLayout {
            cells: vec![
                Cell::new(mid - 1, mid + 3),
                Cell::new(mid, mid + 3),
                Cell::new(mid + 1, mid + 3),
            ],
            heading: Direction::Left,
        }
    }
}

/// Spawn slot of `id` in a room: slot 0 for the smaller of the two ids.
pub fn slot_for(id: &ParticipantId, other: &ParticipantId) -> usize {
    usize::from(id > other)
}

/// Picks a food cell that lies on none of `bodies`.
///
/// Draws up to `N * N` candidates from `rng` (x before y); if all of them
/// are occupied, falls back to the first free cell in row-major order.
/// Returns `None` only when the grid is full.
pub fn place_food(rng: &mut Lcg, grid_size: u32, bodies: &[&[Cell]]) -> Option<Cell> {
    let occupied = |cell: &Cell| bodies.iter().any(|body| body.contains(cell));

    let attempts = grid_size.saturating_mul(grid_size);
    for _ in 0..attempts {
        let x = rng.random_int(grid_size) as i32;
        let y = rng.random_int(grid_size) as i32;
        let candidate = Cell::new(x, y);
        if !occupied(&candidate) {
            return Some(candidate);
        }
    }

    let n = grid_size as i32;
    (0..n)
        .flat_map(|y| (0..n).map(move |x| Cell::new(x, y)))
        .find(|cell| !occupied(cell))
}

/// Layouts and first food for a round, derived from the seed alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundLayout {
    pub slots: [SpawnLayout; 2],
    pub food: Cell,
    /// Generator state after placing the first food
    pub rng: Lcg,
}

/// Computes the starting layouts and first food for `seed`.
///
/// The first food avoids both spawn bodies; with `N >= 8` a free cell
/// always exists.
pub fn round_layout(seed: u32, grid_size: u32) -> RoundLayout {
    let slots = [spawn_layout(grid_size, 0), spawn_layout(grid_size, 1)];
    let mut rng = Lcg::new(seed);
    let food = place_food(&mut rng, grid_size, &[&slots[0].cells, &slots[1].cells])
        .unwrap_or(Cell::new(0, 0));
    RoundLayout { slots, food, rng }
}
