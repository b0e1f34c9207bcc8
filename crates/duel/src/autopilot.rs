//! Headless snake driver used by the sparring bot.
//!
//! Wraps [`GridSimulation`] and, before every step, turns towards the
//! current food along the first axis that is safe, falling back to any
//! safe direction.

use duel_engine::layout::SpawnLayout;
use duel_engine::{Cell, Direction, GridSimulation, Simulation};

pub struct Autopilot {
    grid_size: i32,
    sim: GridSimulation,
}

impl Autopilot {
    pub fn new(grid_size: u32, spawn: &SpawnLayout) -> Self {
        Self {
            grid_size: grid_size as i32,
            sim: GridSimulation::new(grid_size, spawn),
        }
    }

    fn steer(&self) -> Direction {
        let facing = self.sim.facing();
        let cells = self.sim.snake_cells();
        let Some(head) = cells.first().copied() else {
            return facing;
        };
        // The tail moves away this step unless we eat.
        let body = &cells[..cells.len().saturating_sub(1)];
        let n = self.grid_size;
        let safe = |direction: Direction| {
            let (dx, dy) = direction.delta();
            let next = Cell::new(head.x + dx, head.y + dy);
            next.x >= 0 && next.y >= 0 && next.x < n && next.y < n && !body.contains(&next)
        };

        let mut candidates = Vec::with_capacity(6);
        if let Some(food) = self.sim.food_cell() {
            if food.x > head.x {
                candidates.push(Direction::Right);
            } else if food.x < head.x {
                candidates.push(Direction::Left);
            }
            if food.y > head.y {
                candidates.push(Direction::Down);
            } else if food.y < head.y {
                candidates.push(Direction::Up);
            }
        }
        candidates.extend([facing, Direction::Up, Direction::Right, Direction::Down, Direction::Left]);

        candidates
            .into_iter()
            .find(|direction| *direction != facing.opposite() && safe(*direction))
            .unwrap_or(facing)
    }
}

impl Simulation for Autopilot {
    fn advance(&mut self) {
        let direction = self.steer();
        self.sim.set_heading(direction);
        self.sim.advance();
    }

    fn set_heading(&mut self, direction: Direction) {
        self.sim.set_heading(direction);
    }

    fn snake_cells(&self) -> &[Cell] {
        self.sim.snake_cells()
    }

    fn facing(&self) -> Direction {
        self.sim.facing()
    }

    fn score(&self) -> u32 {
        self.sim.score()
    }

    fn alive(&self) -> bool {
        self.sim.alive()
    }

    fn food_cell(&self) -> Option<Cell> {
        self.sim.food_cell()
    }

    fn set_food(&mut self, food: Option<Cell>) {
        self.sim.set_food(food);
    }

    fn set_score(&mut self, score: u32) {
        self.sim.set_score(score);
    }

    fn shrink_tail(&mut self) {
        self.sim.shrink_tail();
    }
}
