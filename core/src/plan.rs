//! Migration planning.
//!
//! Turns an unordered map of `version -> task` into the ordered list of
//! steps needed to move a database from one schema version to another.
//!
//! A task keyed by version `V` means:
//!
//! - for upgrades, "the work needed to arrive at `V`": it runs when
//!   `from < V <= to`;
//! - for downgrades, "the work needed to leave `V`": it runs when
//!   `to <= V < from`.
//!
//! Upgrade steps run in ascending version order and downgrade steps in
//! descending order, so skipping several versions at once applies the
//! intermediate steps in the same order as upgrading one version at a time.
//!
//! # Examples
//!
//! ```
//! use std::collections::HashMap;
//! use tablekeeper_core::{MigrationDirection, plan_migration};
//!
//! let tasks = HashMap::from([(3, "to v3"), (2, "to v2"), (4, "to v4")]);
//!
//! let plan = plan_migration(&tasks, 1, 3).unwrap();
//! assert_eq!(plan.direction(), MigrationDirection::Upgrade);
//! assert_eq!(plan.versions(), vec![2, 3]);
//! ```

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use crate::MigrationDirection;

/// Reasons a migration plan cannot be built.
///
/// All variants are author or caller mistakes; none of them is retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// Source and target versions are equal, so there is nothing to plan.
    #[error("no version transition: database is already at version {0}")]
    SameVersion(u32),
    /// No task at all is registered for the required direction.
    #[error("can't {direction} database from version {from} to {to}: no migrations registered")]
    NoMigrations {
        /// Direction that was requested.
        direction: MigrationDirection,
        /// Stored version.
        from: u32,
        /// Requested version.
        to: u32,
    },
    /// A task is keyed by version 0, which no database can be at.
    #[error("{0} migration registered for version 0")]
    ZeroVersion(MigrationDirection),
}

/// One step of a [`MigrationPlan`].
pub struct PlanStep<'a, T> {
    /// Version boundary the task is registered under.
    pub version: u32,
    /// Task to run.
    pub task: &'a T,
}

/// Ordered, filtered list of migration steps for one transition.
///
/// Plans borrow their tasks from the registration map and are rebuilt for
/// every migration run.
pub struct MigrationPlan<'a, T> {
    direction: MigrationDirection,
    from: u32,
    to: u32,
    steps: Vec<PlanStep<'a, T>>,
}

impl<'a, T> MigrationPlan<'a, T> {
    /// Direction of the transition.
    pub fn direction(&self) -> MigrationDirection {
        self.direction
    }

    /// Stored version the plan starts from.
    pub fn from_version(&self) -> u32 {
        self.from
    }

    /// Requested version the plan ends at.
    pub fn to_version(&self) -> u32 {
        self.to
    }

    /// Steps in execution order.
    pub fn steps(&self) -> &[PlanStep<'a, T>] {
        &self.steps
    }

    /// Version keys of the steps, in execution order.
    pub fn versions(&self) -> Vec<u32> {
        self.steps.iter().map(|step| step.version).collect()
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns `true` if no registered task falls inside the transition
    /// window.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl<T> fmt::Debug for MigrationPlan<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationPlan")
            .field("direction", &self.direction)
            .field("from", &self.from)
            .field("to", &self.to)
            .field("versions", &self.versions())
            .finish()
    }
}

/// Builds the plan for moving from version `from` to version `to`.
///
/// The direction follows from the comparison of the two versions.
///
/// # Errors
///
/// - [`PlanError::SameVersion`] if `from == to`.
/// - [`PlanError::NoMigrations`] if `tasks` is empty.
/// - [`PlanError::ZeroVersion`] if any task is keyed by version 0.
///
/// A non-empty map whose keys all fall outside the window yields an empty
/// plan, not an error.
pub fn plan_migration<T>(
    tasks: &HashMap<u32, T>,
    from: u32,
    to: u32,
) -> Result<MigrationPlan<'_, T>, PlanError> {
    let direction = MigrationDirection::between(from, to).ok_or(PlanError::SameVersion(from))?;

    if tasks.is_empty() {
        return Err(PlanError::NoMigrations {
            direction,
            from,
            to,
        });
    }
    if tasks.contains_key(&0) {
        return Err(PlanError::ZeroVersion(direction));
    }

    let mut steps: Vec<PlanStep<'_, T>> = tasks
        .iter()
        .filter(|(version, _)| in_window(direction, from, to, **version))
        .map(|(version, task)| PlanStep {
            version: *version,
            task,
        })
        .collect();

    match direction {
        MigrationDirection::Upgrade => steps.sort_by(|a, b| a.version.cmp(&b.version)),
        MigrationDirection::Downgrade => steps.sort_by(|a, b| b.version.cmp(&a.version)),
    }

    Ok(MigrationPlan {
        direction,
        from,
        to,
        steps,
    })
}

/// Returns `true` if a task keyed by `version` belongs to the transition.
fn in_window(direction: MigrationDirection, from: u32, to: u32, version: u32) -> bool {
    match direction {
        MigrationDirection::Upgrade => from < version && version <= to,
        MigrationDirection::Downgrade => to <= version && version < from,
    }
}
