use std::hash::Hash;

use derive_more::Display;
use nonmax::NonMaxU32;
use thiserror::Error;

use crate::space::Action;
use crate::space::BackwardDomain;
use crate::space::Domain;
use crate::space::State;
use crate::space::Successor;

const MAX_ELEMENTS_DISPLAYED: usize = 40;
const RANDOM_STATE_MAX_TRIES: usize = 10_000;

pub(crate) type CoordIntrinsic = u32;
pub type Coord = NonMaxU32;

/// A cell position, `y` grows downwards like the text maps do.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash)]
#[display("({x},{y})")]
pub struct GridState {
    pub(crate) x: Coord,
    pub(crate) y: Coord,
}

impl GridState {
    pub fn new(x: CoordIntrinsic, y: CoordIntrinsic) -> Option<GridState> {
        Some(GridState {
            x: Coord::new(x)?,
            y: Coord::new(y)?,
        })
    }
    pub fn new_from_usize(x: usize, y: usize) -> Option<GridState> {
        let x = CoordIntrinsic::try_from(x).ok()?;
        let y = CoordIntrinsic::try_from(y).ok()?;
        GridState::new(x, y)
    }

    #[inline(always)]
    pub fn x(&self) -> CoordIntrinsic {
        self.x.get()
    }
    #[inline(always)]
    pub fn y(&self) -> CoordIntrinsic {
        self.y.get()
    }

    /// Taxicab distance
    #[inline(always)]
    pub fn manhattan(&self, other: &GridState) -> GridCost {
        self.x().abs_diff(other.x()) + self.y().abs_diff(other.y())
    }

    /// The neighbouring position in some direction, if it's representable.
    #[inline(always)]
    fn step(&self, action: GridAction) -> Option<GridState> {
        let x = self.x();
        let y = self.y();

        #[rustfmt::skip]
        let (x, y) = match action {
            GridAction::Up    => (x,                 y.checked_sub(1)?),
            GridAction::Down  => (x,                 y.checked_add(1)?),
            GridAction::Left  => (x.checked_sub(1)?, y                ),
            GridAction::Right => (x.checked_add(1)?, y                ),
        };
        GridState::new(x, y)
    }
}
impl State for GridState {}

#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash)]
pub enum GridAction {
    #[display("↑")]
    Up, // y--
    #[display("↓")]
    Down, // y++
    #[display("←")]
    Left, // x--
    #[display("→")]
    Right, // x++
}
impl Action for GridAction {}

impl GridAction {
    pub const ALL: [GridAction; 4] = [
        GridAction::Up,
        GridAction::Down,
        GridAction::Left,
        GridAction::Right,
    ];

    #[must_use]
    pub fn opposite(&self) -> GridAction {
        match self {
            GridAction::Up => GridAction::Down,
            GridAction::Down => GridAction::Up,
            GridAction::Left => GridAction::Right,
            GridAction::Right => GridAction::Left,
        }
    }
}

pub type GridCost = CoordIntrinsic;

const MOVE_COST: GridCost = 1;

#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
pub enum GridCell {
    #[display("░")]
    Empty,
    #[display("█")]
    Wall,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GridCellParseError {
    #[error("Invalid character '{0}' found.")]
    InvalidCharacter(char),
}

impl std::convert::TryFrom<char> for GridCell {
    type Error = GridCellParseError;

    fn try_from(ch: char) -> Result<Self, Self::Error> {
        match ch {
            ' ' | '.' => Ok(GridCell::Empty),
            '#' | '█' => Ok(GridCell::Wall),
            ch => Err(GridCellParseError::InvalidCharacter(ch)),
        }
    }
}

#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
pub enum GridWorldCell {
    Cell(GridCell),
    #[display("S")]
    Start,
    #[display("G")]
    Goal,
}

impl std::convert::TryFrom<char> for GridWorldCell {
    type Error = GridCellParseError;

    fn try_from(ch: char) -> Result<Self, Self::Error> {
        match ch {
            'S' => Ok(GridWorldCell::Start),
            'G' => Ok(GridWorldCell::Goal),
            ch => Ok(GridWorldCell::Cell(GridCell::try_from(ch)?)),
        }
    }
}

#[derive(Debug, Error)]
pub enum GridWorldParseError {
    #[error("Empty input")]
    EmptyInput,
    #[error("Line {y} has {found} cells, expected {expected}")]
    RaggedLine {
        y: usize,
        expected: usize,
        found: usize,
    },
    #[error("Invalid cell {e} found at ({x},{y})")]
    InvalidCell {
        e: GridCellParseError,
        x: usize,
        y: usize,
    },
    #[error("Map is too large ({x}x{y})")]
    TooLarge { x: usize, y: usize },
    #[error("I/O error when loading '{p}': {e}")]
    IOError {
        p: std::path::PathBuf,
        e: std::io::Error,
    },
}

/// A 4-connected grid with unit move costs.
#[derive(Clone)]
pub struct GridWorld {
    pub(crate) map: Vec<Vec<GridCell>>,
    starts: Vec<GridState>,
    goals: Vec<GridState>,
}

impl GridWorld {
    pub fn new(map: Vec<Vec<GridCell>>, starts: Vec<GridState>, goals: Vec<GridState>) -> Self {
        Self { map, starts, goals }
    }

    pub fn dimensions(&self) -> (usize, usize) {
        if self.map.is_empty() {
            return (0, 0);
        }
        (self.map[0].len(), self.map.len())
    }

    pub fn starts(&self) -> &[GridState] {
        &self.starts
    }
    pub fn start(&self) -> Option<GridState> {
        self.starts.first().copied()
    }

    /// Where `state` sits, `None` when it's off the map.
    #[inline(always)]
    pub fn at(&self, state: &GridState) -> Option<GridCell> {
        self.map
            .get(state.y() as usize)
            .and_then(|line| line.get(state.x() as usize))
            .copied()
    }

    #[inline(always)]
    fn is_free(&self, state: &GridState) -> bool {
        self.at(state) == Some(GridCell::Empty)
    }

    pub fn random_state<R: rand::Rng>(&self, r: &mut R) -> Option<GridState> {
        let (max_x, max_y) = self.dimensions();
        if max_x == 0 || max_y == 0 {
            return None;
        }

        for _tries in 0..RANDOM_STATE_MAX_TRIES {
            let x = r.random_range(0..max_x);
            let y = r.random_range(0..max_y);
            if self.map[y][x] == GridCell::Empty {
                return GridState::new_from_usize(x, y);
            }
        }

        None
    }

    /// The same map with random starts and goals.
    pub fn randomize<R: rand::Rng>(
        &self,
        r: &mut R,
        num_starts: u16,
        num_goals: u16,
    ) -> Option<GridWorld> {
        let mut starts = vec![];
        let mut goals = vec![];

        for _tries in 0..RANDOM_STATE_MAX_TRIES {
            if starts.len() == num_starts as usize && goals.len() == num_goals as usize {
                return Some(GridWorld {
                    map: self.map.clone(),
                    starts,
                    goals,
                });
            }
            if let Some(random_state) = self.random_state::<R>(r) {
                if starts.len() < num_starts as usize {
                    starts.push(random_state);
                } else if !starts.contains(&random_state) && !goals.contains(&random_state) {
                    goals.push(random_state);
                }
            }
        }

        None
    }
}

impl Domain<GridState, GridAction, GridCost> for GridWorld {
    fn successors(&self, s: &GridState) -> Vec<Successor<GridState, GridAction, GridCost>> {
        #[cfg(feature = "coz_profile")]
        coz::scope!("StateExpansion");

        GridAction::ALL
            .iter()
            .filter_map(|a| {
                let next = s.step(*a)?;
                self.is_free(&next)
                    .then(|| Successor::new(next, *a, MOVE_COST))
            })
            .collect()
    }

    /// Distance to the closest goal, ignoring walls.
    #[inline(always)]
    fn heuristic(&self, s: &GridState) -> GridCost {
        self.goals
            .iter()
            .map(|g| s.manhattan(g) * MOVE_COST)
            .min()
            .unwrap_or(GridCost::MAX)
    }

    #[inline(always)]
    fn is_goal(&self, s: &GridState) -> bool {
        self.goals.contains(s)
    }

    fn apply(&self, s: &GridState, a: &GridAction) -> Option<GridState> {
        if !self.is_free(s) {
            return None;
        }
        s.step(*a).filter(|next| self.is_free(next))
    }
}

impl BackwardDomain<GridState, GridAction, GridCost> for GridWorld {
    fn predecessors(&self, s: &GridState) -> Vec<Successor<GridState, GridAction, GridCost>> {
        GridAction::ALL
            .iter()
            .filter_map(|a| {
                let prev = s.step(a.opposite())?;
                self.is_free(&prev)
                    .then(|| Successor::new(prev, *a, MOVE_COST))
            })
            .collect()
    }

    #[inline(always)]
    fn heuristic_between(&self, s: &GridState, target: &GridState) -> GridCost {
        s.manhattan(target) * MOVE_COST
    }

    fn goals(&self) -> Vec<GridState> {
        self.goals.clone()
    }
}

impl std::convert::TryFrom<&str> for GridWorld {
    type Error = GridWorldParseError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let lines: Vec<&str> = s.lines().collect();

        if lines.is_empty() || lines[0].is_empty() {
            return Err(GridWorldParseError::EmptyInput);
        }

        let max_x = lines[0].chars().count();
        let max_y = lines.len();
        if max_x >= CoordIntrinsic::MAX as usize || max_y >= CoordIntrinsic::MAX as usize {
            return Err(GridWorldParseError::TooLarge { x: max_x, y: max_y });
        }

        let mut world = GridWorld {
            map: Vec::with_capacity(max_y),
            starts: vec![],
            goals: vec![],
        };

        for (y, line) in lines.iter().enumerate() {
            let mut row = Vec::with_capacity(max_x);
            for (x, ch) in line.chars().enumerate() {
                let cell = GridWorldCell::try_from(ch)
                    .map_err(|e| GridWorldParseError::InvalidCell { e, x, y })?;
                // Both fit, checked above
                let here = GridState::new_from_usize(x, y)
                    .ok_or(GridWorldParseError::TooLarge { x: max_x, y: max_y })?;

                row.push(match cell {
                    GridWorldCell::Start => {
                        world.starts.push(here);
                        GridCell::Empty
                    }
                    GridWorldCell::Goal => {
                        world.goals.push(here);
                        GridCell::Empty
                    }
                    GridWorldCell::Cell(c) => c,
                });
            }
            if row.len() != max_x {
                return Err(GridWorldParseError::RaggedLine {
                    y,
                    expected: max_x,
                    found: row.len(),
                });
            }
            world.map.push(row);
        }

        Ok(world)
    }
}

impl std::convert::TryFrom<&std::path::Path> for GridWorld {
    type Error = GridWorldParseError;

    fn try_from(p: &std::path::Path) -> Result<Self, Self::Error> {
        let text = std::fs::read_to_string(p).map_err(|e| GridWorldParseError::IOError {
            p: p.to_path_buf(),
            e,
        })?;
        GridWorld::try_from(text.as_str())
    }
}

impl std::fmt::Display for GridWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let d = self.dimensions();

        writeln!(
            f,
            "GridWorld({}x{}) (s:{:?}, g:{:?}):",
            d.0, d.1, self.starts, self.goals
        )?;
        for (y, line) in self.map.iter().enumerate().take(MAX_ELEMENTS_DISPLAYED) {
            for (x, cell) in line.iter().enumerate().take(MAX_ELEMENTS_DISPLAYED) {
                let here = GridState::new_from_usize(x, y);
                let is_start = here.is_some_and(|s| self.starts.contains(&s));
                let is_goal = here.is_some_and(|s| self.goals.contains(&s));

                match (is_start, is_goal) {
                    (true, true) => write!(f, "!")?,
                    (true, false) => write!(f, "S")?,
                    (false, true) => write!(f, "G")?,
                    (false, false) => write!(f, "{cell}")?,
                }
            }
            writeln!(f)?;
        }

        Ok(())
    }
}

impl std::fmt::Debug for GridWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "GridWorld{:?}", self.dimensions())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use indoc::indoc;
    use rand_chacha::ChaCha8Rng;
    use rand_chacha::rand_core::SeedableRng;

    fn state(x: u32, y: u32) -> GridState {
        GridState::new(x, y).unwrap()
    }

    #[test]
    fn parse_map() {
        let world = GridWorld::try_from(indoc! {"
            S.#
            ..#
            #.G
        "})
        .unwrap();

        assert_eq!(world.dimensions(), (3, 3));
        assert_eq!(world.starts(), &[state(0, 0)]);
        assert_eq!(world.goals(), vec![state(2, 2)]);
        assert_eq!(world.at(&state(2, 0)), Some(GridCell::Wall));
        assert_eq!(world.at(&state(1, 2)), Some(GridCell::Empty));
        assert_eq!(world.at(&state(3, 0)), None);
    }

    #[test]
    fn parse_errors() {
        assert!(matches!(
            GridWorld::try_from(""),
            Err(GridWorldParseError::EmptyInput)
        ));
        assert!(matches!(
            GridWorld::try_from("S.\n.x"),
            Err(GridWorldParseError::InvalidCell { x: 1, y: 1, .. })
        ));
        assert!(matches!(
            GridWorld::try_from("S..\n.G"),
            Err(GridWorldParseError::RaggedLine {
                y: 1,
                expected: 3,
                found: 2
            })
        ));
    }

    #[test]
    fn successors_avoid_walls_and_edges() {
        let world = GridWorld::try_from(indoc! {"
            S.#
            ..#
            #.G
        "})
        .unwrap();

        let mut moves: Vec<_> = world
            .successors(&state(0, 0))
            .iter()
            .map(|s| (s.state, s.action))
            .collect();
        moves.sort_by_key(|(s, _)| (s.y(), s.x()));
        assert_eq!(
            moves,
            vec![
                (state(1, 0), GridAction::Right),
                (state(0, 1), GridAction::Down)
            ]
        );

        // (1,0) is boxed by a wall to the right
        assert_eq!(world.successors(&state(1, 0)).len(), 2);
        assert_eq!(world.apply(&state(1, 0), &GridAction::Right), None);
        assert_eq!(world.apply(&state(0, 0), &GridAction::Up), None);
        assert_eq!(
            world.apply(&state(1, 1), &GridAction::Down),
            Some(state(1, 2))
        );
    }

    #[test]
    fn predecessors_lead_back() {
        let world = GridWorld::try_from(indoc! {"
            ....
            .##.
            ...G
        "})
        .unwrap();

        for y in 0..3 {
            for x in 0..4 {
                let s = state(x, y);
                if world.at(&s) != Some(GridCell::Empty) {
                    continue;
                }
                for p in world.predecessors(&s) {
                    assert_eq!(world.apply(&p.state, &p.action), Some(s));
                    assert_eq!(p.cost, 1);
                }
                // Moves are reversible here
                assert_eq!(world.predecessors(&s).len(), world.successors(&s).len());
            }
        }
    }

    #[test]
    fn heuristic_is_closest_goal() {
        let world = GridWorld::try_from(indoc! {"
            G....
            .....
            ....G
        "})
        .unwrap();

        assert_eq!(world.heuristic(&state(0, 0)), 0);
        assert_eq!(world.heuristic(&state(1, 1)), 2);
        assert_eq!(world.heuristic(&state(3, 2)), 1);
        assert!(world.is_goal(&state(4, 2)));
        assert!(!world.is_goal(&state(3, 2)));
        assert_eq!(world.heuristic_between(&state(0, 0), &state(4, 2)), 6);
    }

    #[test]
    fn randomize_is_reproducible() {
        let world = GridWorld::try_from(indoc! {"
            .....
            .###.
            .....
        "})
        .unwrap();

        let a = world
            .randomize(&mut ChaCha8Rng::seed_from_u64(7), 1, 2)
            .unwrap();
        let b = world
            .randomize(&mut ChaCha8Rng::seed_from_u64(7), 1, 2)
            .unwrap();
        assert_eq!(a.starts(), b.starts());
        assert_eq!(a.goals(), b.goals());
        assert_eq!(a.starts().len(), 1);
        assert_eq!(a.goals().len(), 2);
        for s in a.starts().iter().chain(a.goals().iter()) {
            assert_eq!(a.at(s), Some(GridCell::Empty));
        }
        assert!(!a.goals().contains(&a.starts()[0]));
    }
}
