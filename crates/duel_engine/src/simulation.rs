//! Interface to the local snake simulation.
//!
//! The engine does not implement movement or self/wall collision; it
//! drives an external simulation through these traits and corrects it with
//! arbitration outcomes.
//!
//! Contract expected from implementations in duel mode:
//!
//! * `advance` moves the snake one cell along its heading. If the head lands
//!   on the current food cell the snake grows by one and the food is
//!   cleared; the simulation never places food on its own.
//! * `alive` turns false on a wall or self collision and stays false.

use crate::layout::SpawnLayout;
use crate::types::{Cell, Direction};

/// One running local simulation.
pub trait Simulation: Send {
    /// Advances one step.
    fn advance(&mut self);

    /// Requests a new heading; reversing onto the body may be ignored.
    fn set_heading(&mut self, direction: Direction);

    /// Snake cells, head first.
    fn snake_cells(&self) -> &[Cell];

    fn head_cell(&self) -> Option<Cell> {
        self.snake_cells().first().copied()
    }

    fn facing(&self) -> Direction;

    fn score(&self) -> u32;

    fn alive(&self) -> bool;

    fn food_cell(&self) -> Option<Cell>;

    /// Replaces the food cell with the authoritative one.
    fn set_food(&mut self, food: Option<Cell>);

    /// Overwrites the local score with the authoritative one.
    fn set_score(&mut self, score: u32);

    /// Removes the last segment; used to roll back optimistic growth.
    fn shrink_tail(&mut self);
}

/// Creates simulations for new rounds.
pub trait SimulationFactory: Send {
    type Sim: Simulation;

    /// Creates a simulation for one round.
    ///
    /// # Arguments
    ///
    /// * `seed` - Round seed from the `start` message
    /// * `grid_size` - Side length of the square grid
    /// * `spawn` - This participant's starting body and heading
    fn create(&self, seed: u32, grid_size: u32, spawn: &SpawnLayout) -> Self::Sim;
}

impl<F, S> SimulationFactory for F
where
    F: Fn(u32, u32, &SpawnLayout) -> S + Send,
    S: Simulation,
{
    type Sim = S;

    fn create(&self, seed: u32, grid_size: u32, spawn: &SpawnLayout) -> S {
        self(seed, grid_size, spawn)
    }
}

/// Minimal grid simulation honouring the duel contract.
///
/// Used by the tests and by headless tools that need a body to move around;
/// the real game supplies its own.
#[derive(Debug, Clone)]
pub struct GridSimulation {
    grid_size: u32,
    snake: Vec<Cell>,
    heading: Direction,
    pending_heading: Direction,
    food: Option<Cell>,
    score: u32,
    alive: bool,
}

impl GridSimulation {
    pub fn new(grid_size: u32, spawn: &SpawnLayout) -> Self {
        Self {
            grid_size,
            snake: spawn.cells.clone(),
            heading: spawn.heading,
            pending_heading: spawn.heading,
            food: None,
            score: 0,
            alive: true,
        }
    }
}

impl Simulation for GridSimulation {
    fn advance(&mut self) {
        if !self.alive {
            return;
        }
        let Some(head) = self.snake.first().copied() else {
            self.alive = false;
            return;
        };
        self.heading = self.pending_heading;
        let (dx, dy) = self.heading.delta();
        let next = Cell::new(head.x + dx, head.y + dy);

        let n = self.grid_size as i32;
        if next.x < 0 || next.y < 0 || next.x >= n || next.y >= n {
            self.alive = false;
            return;
        }
        let body = &self.snake[..self.snake.len().saturating_sub(1)];
        if body.contains(&next) {
            self.alive = false;
            return;
        }

        self.snake.insert(0, next);
        if self.food == Some(next) {
            self.score += 1;
            self.food = None;
        } else {
            self.snake.pop();
        }
    }

    fn set_heading(&mut self, direction: Direction) {
        if direction != self.heading.opposite() {
            self.pending_heading = direction;
        }
    }

    fn snake_cells(&self) -> &[Cell] {
        &self.snake
    }

    fn facing(&self) -> Direction {
        self.pending_heading
    }

    fn score(&self) -> u32 {
        self.score
    }

    fn alive(&self) -> bool {
        self.alive
    }

    fn food_cell(&self) -> Option<Cell> {
        self.food
    }

    fn set_food(&mut self, food: Option<Cell>) {
        self.food = food;
    }

    fn set_score(&mut self, score: u32) {
        self.score = score;
    }

    fn shrink_tail(&mut self) {
        if self.snake.len() > 1 {
            self.snake.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::spawn_layout;

    #[test]
    fn test_grid_simulation_eats_without_respawning() {
        let mut sim = GridSimulation::new(20, &spawn_layout(20, 0));
        sim.set_food(Some(Cell::new(11, 7)));
        sim.advance();
        assert_eq!(sim.head_cell(), Some(Cell::new(11, 7)));
        assert_eq!(sim.snake_cells().len(), 4);
        assert_eq!(sim.score(), 1);
        assert_eq!(sim.food_cell(), None);

        sim.shrink_tail();
        assert_eq!(sim.snake_cells().len(), 3);
    }

    #[test]
    fn test_grid_simulation_dies_on_wall_and_ignores_reversal() {
        let mut sim = GridSimulation::new(8, &spawn_layout(8, 0));
        sim.set_heading(Direction::Left);
        assert_eq!(sim.facing(), Direction::Right);
        sim.set_heading(Direction::Up);
        for _ in 0..3 {
            sim.advance();
        }
        assert!(!sim.alive());
    }

    #[test]
    fn test_closure_factory() {
        let factory = |_seed: u32, grid: u32, spawn: &SpawnLayout| GridSimulation::new(grid, spawn);
        let sim = factory.create(1, 20, &spawn_layout(20, 1));
        assert_eq!(sim.facing(), Direction::Left);
    }
}
