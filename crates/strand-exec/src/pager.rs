//! Paging more than four thread panes through the visible grid.
//!
//! Threads past the fourth live in their own hidden windows. Showing page
//! `p` swaps the panes of threads `4p..4p+4` into the grid slots with
//! `swap-pane`, addressing panes only by id. The controller runs in a bottom
//! pane under a restart loop and exits with [`PAGER_QUIT_EXIT`] when the
//! user quits.

use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use std::path::Path;

use strand_store::write_atomic;
use strand_tmux::{visible_count, Multiplexer, PaneId, TmuxError, GRID_CAPACITY};

use crate::error::{io, ExecError};

/// Exit status meaning "the user quit; do not restart".
pub const PAGER_QUIT_EXIT: i32 = 42;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagerCommand {
    Next,
    Previous,
    Quit,
    /// 1-based page number as typed.
    Page(usize),
}

impl PagerCommand {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "n" | "next" => Some(PagerCommand::Next),
            "p" | "prev" | "previous" => Some(PagerCommand::Previous),
            "q" | "quit" => Some(PagerCommand::Quit),
            other => other
                .parse::<usize>()
                .ok()
                .filter(|page| *page > 0)
                .map(PagerCommand::Page),
        }
    }
}

/// Where each pane currently sits: positions below the grid size are grid
/// slots, the rest are hidden windows in dispatch order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagerState {
    pub page: usize,
    pub positions: Vec<PaneId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagerStep {
    Continue,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pager {
    threads: Vec<PaneId>,
    state: PagerState,
}

impl Pager {
    pub fn new(threads: Vec<PaneId>) -> Self {
        let state = PagerState {
            page: 0,
            positions: threads.clone(),
        };
        Self { threads, state }
    }

    /// Resume from a saved state when it still describes these panes.
    pub fn restore(threads: Vec<PaneId>, saved: Option<PagerState>) -> Self {
        let mut pager = Self::new(threads);
        if let Some(saved) = saved {
            let mut expected = pager.threads.clone();
            let mut found = saved.positions.clone();
            expected.sort();
            found.sort();
            if expected == found && saved.page < pager.page_count() {
                pager.state = saved;
            }
        }
        pager
    }

    pub fn state(&self) -> &PagerState {
        &self.state
    }

    pub fn page(&self) -> usize {
        self.state.page
    }

    pub fn page_count(&self) -> usize {
        self.threads.len().div_ceil(GRID_CAPACITY).max(1)
    }

    /// Swaps (`source` into `target`'s place) that bring `page` into view.
    pub fn plan(&self, page: usize) -> Vec<(PaneId, PaneId)> {
        let mut positions = self.state.positions.clone();
        let mut swaps = Vec::new();
        for slot in 0..visible_count(self.threads.len()) {
            let Some(pane) = self.threads.get(page * GRID_CAPACITY + slot) else {
                break;
            };
            let Some(current) = positions.iter().position(|candidate| candidate == pane) else {
                continue;
            };
            if current != slot {
                swaps.push((pane.clone(), positions[slot].clone()));
                positions.swap(current, slot);
            }
        }
        swaps
    }

    pub fn go_to(&mut self, multiplexer: &dyn Multiplexer, page: usize) -> Result<(), TmuxError> {
        let page = page.min(self.page_count() - 1);
        for (source, target) in self.plan(page) {
            multiplexer.swap_pane(&source, &target)?;
            let from = self.position(&source);
            let to = self.position(&target);
            if let (Some(from), Some(to)) = (from, to) {
                self.state.positions.swap(from, to);
            }
        }
        self.state.page = page;
        Ok(())
    }

    fn position(&self, pane: &PaneId) -> Option<usize> {
        self.state.positions.iter().position(|candidate| candidate == pane)
    }

    pub fn handle(
        &mut self,
        multiplexer: &dyn Multiplexer,
        command: PagerCommand,
    ) -> Result<PagerStep, TmuxError> {
        let count = self.page_count();
        let target = match command {
            PagerCommand::Quit => return Ok(PagerStep::Quit),
            PagerCommand::Next => (self.page() + 1) % count,
            PagerCommand::Previous => (self.page() + count - 1) % count,
            PagerCommand::Page(number) => number.saturating_sub(1),
        };
        self.go_to(multiplexer, target)?;
        Ok(PagerStep::Continue)
    }
}

fn load_state(path: &Path) -> Option<PagerState> {
    let body = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&body).ok()
}

fn save_state(path: &Path, state: &PagerState) -> Result<(), ExecError> {
    let body = serde_json::to_vec(state).map_err(|source| ExecError::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    write_atomic(path, &body)?;
    Ok(())
}

/// Interactive loop: one command per input line until quit or end of input.
pub fn run_pager(
    multiplexer: &dyn Multiplexer,
    threads: Vec<PaneId>,
    state_path: &Path,
    input: impl BufRead,
    mut output: impl Write,
) -> Result<(), ExecError> {
    let mut pager = Pager::restore(threads, load_state(state_path));
    let prompt = |pager: &Pager, output: &mut dyn Write| -> Result<(), ExecError> {
        write!(
            output,
            "page {}/{}  [n]ext [p]rev [q]uit or page number > ",
            pager.page() + 1,
            pager.page_count()
        )
        .and_then(|_| output.flush())
        .map_err(|source| io("<stdout>", source))
    };

    prompt(&pager, &mut output)?;
    for line in input.lines() {
        let line = line.map_err(|source| io("<stdin>", source))?;
        let Some(command) = PagerCommand::parse(&line) else {
            prompt(&pager, &mut output)?;
            continue;
        };
        if pager.handle(multiplexer, command)? == PagerStep::Quit {
            break;
        }
        save_state(state_path, pager.state())?;
        prompt(&pager, &mut output)?;
    }
    Ok(())
}
