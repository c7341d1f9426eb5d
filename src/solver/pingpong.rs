//! Explicit double-buffering state for one relaxation call.

use crate::grid::GridBuffer;

/// Which of the two buffers of a relaxation holds a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The caller's field.
    Target,
    /// The shared scratch buffer.
    Scratch,
}

impl Role {
    pub fn other(self) -> Self {
        match self {
            Role::Target => Role::Scratch,
            Role::Scratch => Role::Target,
        }
    }

    pub fn resolve(self, target: GridBuffer, scratch: GridBuffer) -> GridBuffer {
        match self {
            Role::Target => target,
            Role::Scratch => scratch,
        }
    }
}

/// Read/write roles of a single iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingPongStep {
    pub source: Role,
    pub result: Role,
}

/// Tracks which buffer holds the latest iterate. Starts with the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingPong {
    latest: Role,
    steps: u32,
}

impl Default for PingPong {
    fn default() -> Self {
        Self::new()
    }
}

impl PingPong {
    pub fn new() -> Self {
        Self {
            latest: Role::Target,
            steps: 0,
        }
    }

    /// Read from the latest iterate, write to the other buffer, and make that the latest.
    pub fn advance(&mut self) -> PingPongStep {
        let step = PingPongStep {
            source: self.latest,
            result: self.latest.other(),
        };
        self.latest = step.result;
        self.steps += 1;
        step
    }

    pub fn latest(&self) -> Role {
        self.latest
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// The final iterate sits in scratch and must be copied back to the target.
    pub fn needs_copy_back(&self) -> bool {
        self.latest == Role::Scratch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_on_target() {
        let state = PingPong::new();
        assert_eq!(state.latest(), Role::Target);
        assert!(!state.needs_copy_back());
    }

    #[test]
    fn test_alternates_roles() {
        let mut state = PingPong::new();
        let first = state.advance();
        assert_eq!(first, PingPongStep { source: Role::Target, result: Role::Scratch });
        let second = state.advance();
        assert_eq!(second, PingPongStep { source: Role::Scratch, result: Role::Target });
        assert_eq!(state.steps(), 2);
    }

    #[test]
    fn test_copy_back_follows_parity() {
        for iterations in 0..8u32 {
            let mut state = PingPong::new();
            for _ in 0..iterations {
                state.advance();
            }
            assert_eq!(state.needs_copy_back(), iterations % 2 == 1, "iterations={iterations}");
        }
    }
}
