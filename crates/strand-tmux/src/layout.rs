//! Pure planning of the visible 2×2 grid.
//!
//! ```text
//! ┌────────┬────────┐
//! │ TL (0) │ TR (1) │   split 1: TL -h → TR
//! ├────────┼────────┤   split 2: TL -v → BL
//! │ BL (2) │ BR (3) │   split 3: TR -v → BR
//! └────────┴────────┘
//! ```
//!
//! Split 3 targets the pane id captured right after split 1, so the plan
//! never depends on tmux's positional pane numbering.

use crate::client::SplitDirection;

pub const GRID_CAPACITY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slot {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Slot {
    pub const ORDER: [Slot; GRID_CAPACITY] = [
        Slot::TopLeft,
        Slot::TopRight,
        Slot::BottomLeft,
        Slot::BottomRight,
    ];

    pub fn index(self) -> usize {
        match self {
            Slot::TopLeft => 0,
            Slot::TopRight => 1,
            Slot::BottomLeft => 2,
            Slot::BottomRight => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitStep {
    /// Pane being split, by slot.
    pub source: Slot,
    pub direction: SplitDirection,
    /// Slot the new pane occupies.
    pub creates: Slot,
}

const FULL_PLAN: [SplitStep; 3] = [
    SplitStep {
        source: Slot::TopLeft,
        direction: SplitDirection::Horizontal,
        creates: Slot::TopRight,
    },
    SplitStep {
        source: Slot::TopLeft,
        direction: SplitDirection::Vertical,
        creates: Slot::BottomLeft,
    },
    SplitStep {
        source: Slot::TopRight,
        direction: SplitDirection::Vertical,
        creates: Slot::BottomRight,
    },
];

/// Splits needed to show `visible` panes (clamped to the grid capacity).
pub fn grid_plan(visible: usize) -> &'static [SplitStep] {
    let splits = visible.clamp(1, GRID_CAPACITY) - 1;
    &FULL_PLAN[..splits]
}

/// Number of panes shown in the grid for `total` threads.
pub fn visible_count(total: usize) -> usize {
    total.min(GRID_CAPACITY)
}
