use std::collections::BTreeMap;

/// Reassembles chunk results in dispatch order, whatever order they arrive in.
#[derive(Debug, Default)]
pub(crate) struct ReorderBuffer {
    next: usize,
    pending: BTreeMap<usize, Vec<usize>>,
    out: Vec<usize>,
}

impl ReorderBuffer {
    pub fn with_capacity(rows: usize) -> Self {
        Self {
            out: Vec::with_capacity(rows),
            ..Self::default()
        }
    }

    /// The position whose result is needed to make progress.
    pub fn next_position(&self) -> usize {
        self.next
    }

    /// Number of results received early and waiting for their predecessors.
    pub fn waiting(&self) -> usize {
        self.pending.len()
    }

    /// Stores the result of the chunk at `position`, flushing every result
    /// that is now contiguous with the output.
    pub fn insert(&mut self, position: usize, classes: Vec<usize>) {
        if position != self.next {
            self.pending.insert(position, classes);
            return;
        }

        self.out.extend(classes);
        self.next += 1;

        while let Some(classes) = self.pending.remove(&self.next) {
            self.out.extend(classes);
            self.next += 1;
        }
    }

    pub fn finish(self) -> Vec<usize> {
        debug_assert!(self.pending.is_empty(), "finished with results still out of order");
        self.out
    }
}
