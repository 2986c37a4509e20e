use tracing::trace;

use crate::record::RowKey;

/// Progress of a single lock acquisition attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockState {
    Idle,
    /// The contender's entry is being written to the choosing row.
    Choosing,
    /// Other contenders were seen in the choosing row.
    Contending,
    /// The contender's entry is being written to the lock row.
    Locking,
    Locked,
    Released,
    Failed,
}

impl LockState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LockState::Locked | LockState::Failed | LockState::Released)
    }

    pub fn can_become(self, next: LockState) -> bool {
        matches!(
            (self, next),
            (LockState::Idle, LockState::Choosing)
                | (LockState::Idle, LockState::Failed)
                | (LockState::Choosing, LockState::Contending)
                | (LockState::Choosing, LockState::Locking)
                | (LockState::Choosing, LockState::Failed)
                | (LockState::Contending, LockState::Failed)
                | (LockState::Locking, LockState::Locked)
                | (LockState::Locking, LockState::Failed)
                | (LockState::Locked, LockState::Released)
        )
    }
}

/// Bookkeeping for one call to
/// [`acquire`][super::LockCoordinator::acquire].
#[derive(Debug)]
pub(crate) struct Acquisition<'a> {
    pub(crate) row_key: &'a RowKey,
    pub(crate) contender: &'a str,
    state: LockState,
    /// The contender's entry may have reached the lock row during this attempt.
    pub(crate) wrote_lock: bool,
    /// The lock row already named the contender before this attempt.
    pub(crate) held_before: bool,
}

impl<'a> Acquisition<'a> {
    pub(crate) fn new(row_key: &'a RowKey, contender: &'a str) -> Self {
        Self {
            row_key,
            contender,
            state: LockState::Idle,
            wrote_lock: false,
            held_before: false,
        }
    }

    /// Bookkeeping for a lock that is already held, e.g. to release it.
    pub(crate) fn held(row_key: &'a RowKey, contender: &'a str) -> Self {
        Self {
            state: LockState::Locked,
            ..Self::new(row_key, contender)
        }
    }

    pub(crate) fn state(&self) -> LockState {
        self.state
    }

    pub(crate) fn transition(&mut self, next: LockState) {
        debug_assert!(
            self.state.can_become(next),
            "invalid lock state transition {:?} -> {:?}",
            self.state,
            next
        );

        trace!(
            "Lock `{}` for `{}`: {:?} -> {:?}.",
            self.row_key,
            self.contender,
            self.state,
            next
        );

        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::Acquisition;
    use super::LockState;
    use crate::record::RowKey;

    #[test]
    fn test_happy_path_transitions() {
        let key = RowKey::new("app", "rack", 0);
        let mut a = Acquisition::new(&key, "i-1");

        for s in [LockState::Choosing, LockState::Locking, LockState::Locked] {
            a.transition(s);
        }

        assert_eq!(a.state(), LockState::Locked);
        assert!(a.state().is_terminal());
    }

    #[test]
    fn test_held_lock_can_be_released() {
        let key = RowKey::new("app", "rack", 0);
        let mut a = Acquisition::held(&key, "i-1");

        assert_eq!(a.state(), LockState::Locked);
        a.transition(LockState::Released);
        assert_eq!(a.state(), LockState::Released);
    }

    #[test]
    fn test_contention_path_is_valid() {
        assert!(LockState::Choosing.can_become(LockState::Contending));
        assert!(LockState::Contending.can_become(LockState::Failed));
    }

    #[test]
    fn test_terminal_states_do_not_move_on() {
        assert!(!LockState::Failed.can_become(LockState::Choosing));
        assert!(!LockState::Locked.can_become(LockState::Choosing));
        assert!(!LockState::Released.can_become(LockState::Locked));
        assert!(!LockState::Idle.can_become(LockState::Locked));
    }
}
