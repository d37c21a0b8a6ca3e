use log::debug;

/// Lifecycle of a prediction run.
///
/// A run only moves forward through the non-terminal states; `Failed` can be
/// entered from any of them on the first error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Created,
    Publishing,
    WorkersStarting,
    Dispatching,
    Collecting,
    Done,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            RunState::Created => 0,
            RunState::Publishing => 1,
            RunState::WorkersStarting => 2,
            RunState::Dispatching => 3,
            RunState::Collecting => 4,
            RunState::Done | RunState::Failed => 5,
        }
    }

    /// Moves to `next` if it lies ahead of the current state.
    ///
    /// # Returns
    /// Whether the transition happened.
    pub(crate) fn advance(&mut self, next: RunState) -> bool {
        if self.is_terminal() || next.rank() <= self.rank() {
            return false;
        }

        debug!("run state {self:?} -> {next:?}");
        *self = next;
        true
    }

    pub(crate) fn fail(&mut self) {
        if !self.is_terminal() {
            debug!("run state {self:?} -> Failed");
            *self = RunState::Failed;
        }
    }
}
