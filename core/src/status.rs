use serde::{Deserialize, Serialize};

/// Per-job status progression.
///
/// ```text
/// UNSTARTED -> CREATED -> RUNNING -> {SUCCEEDED, FAILED, CANCELED}
///                    \-> COMMISSIONING -> RUNNING
/// ```
///
/// Only a backend refresh may drive `RUNNING` into a terminal state, and a
/// job never moves backward; see [`EntityStatus::rank`].
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityStatus {
    Unstarted,
    Created,
    Commissioning,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl EntityStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    /// Position in the state machine, used to refuse regressions.
    /// All terminal states share a rank since none may replace another.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Unstarted => 0,
            Self::Created => 1,
            Self::Commissioning => 2,
            Self::Running => 3,
            Self::Succeeded | Self::Failed | Self::Canceled => 4,
        }
    }
}

impl Default for EntityStatus {
    fn default() -> Self {
        Self::Unstarted
    }
}

impl std::fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unstarted => "UNSTARTED",
            Self::Created => "CREATED",
            Self::Commissioning => "COMMISSIONING",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
        };
        f.write_str(name)
    }
}

/// Derive a parent's status from its children.
///
/// An empty child set reduces to `SUCCEEDED`: an experiment with zero
/// simulations is vacuously done.
pub fn reduce_status<I>(children: I) -> EntityStatus
where
    I: IntoIterator<Item = EntityStatus>,
{
    let mut any = false;
    let mut failed = false;
    let mut running = false;
    let mut canceled = false;
    let mut all_succeeded = true;
    let mut all_terminal = true;

    for status in children {
        any = true;
        match status {
            EntityStatus::Failed => failed = true,
            EntityStatus::Running | EntityStatus::Commissioning => running = true,
            EntityStatus::Canceled => canceled = true,
            _ => {}
        }
        if status != EntityStatus::Succeeded {
            all_succeeded = false;
        }
        if !status.is_terminal() {
            all_terminal = false;
        }
    }

    if !any {
        return EntityStatus::Succeeded;
    }
    if failed && !running {
        EntityStatus::Failed
    } else if running {
        EntityStatus::Running
    } else if all_succeeded {
        EntityStatus::Succeeded
    } else if all_terminal && canceled {
        EntityStatus::Canceled
    } else {
        EntityStatus::Created
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use EntityStatus::*;

    #[test]
    fn terminal_states() {
        for status in [Succeeded, Failed, Canceled] {
            assert!(status.is_terminal());
        }
        for status in [Unstarted, Created, Commissioning, Running] {
            assert!(!status.is_terminal());
        }
    }

    #[test]
    fn reduce_empty_is_vacuously_succeeded() {
        assert_eq!(reduce_status([]), Succeeded);
    }

    #[test]
    fn reduce_failed_wins_once_settled() {
        assert_eq!(reduce_status([Succeeded, Failed, Succeeded]), Failed);
    }

    #[test]
    fn reduce_running_masks_failures() {
        assert_eq!(reduce_status([Failed, Running]), Running);
        assert_eq!(reduce_status([Commissioning, Succeeded]), Running);
    }

    #[test]
    fn reduce_all_succeeded() {
        assert_eq!(reduce_status([Succeeded, Succeeded]), Succeeded);
    }

    #[test]
    fn reduce_canceled_needs_all_terminal() {
        assert_eq!(reduce_status([Succeeded, Canceled]), Canceled);
        assert_eq!(reduce_status([Created, Canceled]), Created);
    }

    #[test]
    fn reduce_pending() {
        assert_eq!(reduce_status([Created, Created]), Created);
    }
}
