//! Pure deletion-state logic.
//!
//! A message's deletion state is derived from three monotonic flags. The
//! flags form a join-semilattice: transitions only set flags, never clear
//! them, so applying any sequence of transitions in any order (user actions
//! racing the sweeper included) converges to the same state. The persisted
//! form mirrors this — every write is a set-if-false flag update, never a
//! full-record overwrite.

/// Observable deletion state of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionState {
    Active,
    DeletedForSender,
    DeletedForRecipient,
    /// Both side flags set independently.
    DeletedForBoth,
    /// Terminal: logically purged, excluded from every read path.
    DeletedRemotely,
}

/// The three monotonic flags backing [`DeletionState`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeletionFlags {
    pub for_sender: bool,
    pub for_recipient: bool,
    pub remote: bool,
}

/// A requested transition. `Remote` implies both side flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionTransition {
    ForSender,
    ForRecipient,
    Remote,
}

impl DeletionTransition {
    pub fn flags(self) -> DeletionFlags {
        match self {
            Self::ForSender => DeletionFlags {
                for_sender: true,
                ..Default::default()
            },
            Self::ForRecipient => DeletionFlags {
                for_recipient: true,
                ..Default::default()
            },
            Self::Remote => DeletionFlags {
                for_sender: true,
                for_recipient: true,
                remote: true,
            },
        }
    }
}

impl DeletionFlags {
    /// Lattice join: the union of two flag sets.
    pub fn join(self, other: Self) -> Self {
        Self {
            for_sender: self.for_sender || other.for_sender,
            for_recipient: self.for_recipient || other.for_recipient,
            remote: self.remote || other.remote,
        }
    }

    /// Apply a transition. Idempotent and commutative by construction.
    pub fn apply(self, transition: DeletionTransition) -> Self {
        self.join(transition.flags())
    }

    pub fn state(self) -> DeletionState {
        match (self.remote, self.for_sender, self.for_recipient) {
            (true, _, _) => DeletionState::DeletedRemotely,
            (false, true, true) => DeletionState::DeletedForBoth,
            (false, true, false) => DeletionState::DeletedForSender,
            (false, false, true) => DeletionState::DeletedForRecipient,
            (false, false, false) => DeletionState::Active,
        }
    }

    /// Logically purged — must never be returned by any read path.
    pub fn is_purged(self) -> bool {
        self.remote
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DeletionTransition::*;

    const ALL: [DeletionTransition; 3] = [ForSender, ForRecipient, Remote];

    #[test]
    fn state_derivation() {
        let flags = DeletionFlags::default();
        assert_eq!(flags.state(), DeletionState::Active);
        assert_eq!(flags.apply(ForSender).state(), DeletionState::DeletedForSender);
        assert_eq!(flags.apply(ForRecipient).state(), DeletionState::DeletedForRecipient);
        assert_eq!(
            flags.apply(ForSender).apply(ForRecipient).state(),
            DeletionState::DeletedForBoth
        );
        assert_eq!(flags.apply(Remote).state(), DeletionState::DeletedRemotely);
    }

    #[test]
    fn transitions_are_idempotent() {
        for t in ALL {
            let once = DeletionFlags::default().apply(t);
            assert_eq!(once, once.apply(t));
        }
    }

    #[test]
    fn transitions_commute() {
        for a in ALL {
            for b in ALL {
                let ab = DeletionFlags::default().apply(a).apply(b);
                let ba = DeletionFlags::default().apply(b).apply(a);
                assert_eq!(ab, ba, "{:?} then {:?} diverged", a, b);
            }
        }
    }

    #[test]
    fn remote_implies_both_sides() {
        let flags = DeletionFlags::default().apply(Remote);
        assert!(flags.for_sender);
        assert!(flags.for_recipient);
        assert!(flags.is_purged());
    }

    #[test]
    fn remote_is_terminal() {
        // No later transition can move the state away from DeletedRemotely.
        let purged = DeletionFlags::default().apply(Remote);
        for t in ALL {
            assert_eq!(purged.apply(t).state(), DeletionState::DeletedRemotely);
        }
    }
}
