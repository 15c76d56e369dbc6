// src/pipeline/project.rs

//! The canonical seven-step project build.
//!
//! ```text
//! container-status-check
//!   -> ensure-container-running
//!        -> install-dependencies --\
//!        -> sync-project-files ----+-> start-dev-server
//!                                        -> publish-preview-url
//!                                             -> notify-ui
//! ```

use std::fmt;
use std::time::Duration;

use crate::dag::{Operation, OperationSet, OperationWork};
use crate::diagnostics::{RecoveryAction, RecoveryRegistry};
use crate::status::Phase;
use crate::types::Priority;

/// One step of the project build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BuildStep {
    ContainerStatusCheck,
    EnsureContainerRunning,
    InstallDependencies,
    SyncProjectFiles,
    StartDevServer,
    PublishPreviewUrl,
    NotifyUi,
}

impl BuildStep {
    pub const ALL: [BuildStep; 7] = [
        BuildStep::ContainerStatusCheck,
        BuildStep::EnsureContainerRunning,
        BuildStep::InstallDependencies,
        BuildStep::SyncProjectFiles,
        BuildStep::StartDevServer,
        BuildStep::PublishPreviewUrl,
        BuildStep::NotifyUi,
    ];

    pub fn id(self) -> &'static str {
        match self {
            BuildStep::ContainerStatusCheck => "container-status-check",
            BuildStep::EnsureContainerRunning => "ensure-container-running",
            BuildStep::InstallDependencies => "install-dependencies",
            BuildStep::SyncProjectFiles => "sync-project-files",
            BuildStep::StartDevServer => "start-dev-server",
            BuildStep::PublishPreviewUrl => "publish-preview-url",
            BuildStep::NotifyUi => "notify-ui",
        }
    }

    pub fn phase(self) -> Phase {
        match self {
            BuildStep::ContainerStatusCheck | BuildStep::EnsureContainerRunning => {
                Phase::ContainerSetup
            }
            BuildStep::InstallDependencies => Phase::DependencyInstall,
            BuildStep::SyncProjectFiles => Phase::Building,
            BuildStep::StartDevServer => Phase::Starting,
            BuildStep::PublishPreviewUrl | BuildStep::NotifyUi => Phase::Running,
        }
    }

    pub fn priority(self) -> Priority {
        match self {
            BuildStep::ContainerStatusCheck
            | BuildStep::EnsureContainerRunning
            | BuildStep::InstallDependencies => Priority::High,
            BuildStep::SyncProjectFiles | BuildStep::StartDevServer => Priority::Medium,
            BuildStep::PublishPreviewUrl | BuildStep::NotifyUi => Priority::Low,
        }
    }

    pub fn estimated_duration(self) -> Duration {
        let ms = match self {
            BuildStep::ContainerStatusCheck => 100,
            BuildStep::EnsureContainerRunning => 2_000,
            BuildStep::InstallDependencies => 5_000,
            BuildStep::SyncProjectFiles => 1_000,
            BuildStep::StartDevServer => 3_000,
            BuildStep::PublishPreviewUrl => 500,
            BuildStep::NotifyUi => 100,
        };
        Duration::from_millis(ms)
    }

    pub fn dependencies(self) -> &'static [BuildStep] {
        match self {
            BuildStep::ContainerStatusCheck => &[],
            BuildStep::EnsureContainerRunning => &[BuildStep::ContainerStatusCheck],
            BuildStep::InstallDependencies | BuildStep::SyncProjectFiles => {
                &[BuildStep::EnsureContainerRunning]
            }
            BuildStep::StartDevServer => {
                &[BuildStep::InstallDependencies, BuildStep::SyncProjectFiles]
            }
            BuildStep::PublishPreviewUrl => &[BuildStep::StartDevServer],
            BuildStep::NotifyUi => &[BuildStep::PublishPreviewUrl],
        }
    }

    /// Extra attempts after a successful automated recovery.
    pub fn retries(self) -> u32 {
        match self {
            BuildStep::InstallDependencies => 1,
            _ => 0,
        }
    }
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Provides the actual work behind each step.
pub trait OperationSupplier {
    fn work(&self, step: BuildStep) -> OperationWork;

    /// Repair action run when `step` fails with an automated resolution.
    fn recovery(&self, _step: BuildStep) -> Option<RecoveryAction> {
        None
    }
}

/// Steps the caller asked to leave out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectBuildFlags {
    pub skip_install: bool,
    pub skip_sync: bool,
}

impl ProjectBuildFlags {
    pub fn skips(&self, step: BuildStep) -> bool {
        match step {
            BuildStep::InstallDependencies => self.skip_install,
            BuildStep::SyncProjectFiles => self.skip_sync,
            _ => false,
        }
    }
}

/// Build the operation set and recovery registry for a project build.
///
/// Skipped steps still count toward the sequential estimate and satisfy
/// their dependents.
pub fn project_build_pipeline<S>(supplier: &S, flags: ProjectBuildFlags) -> (OperationSet, RecoveryRegistry)
where
    S: OperationSupplier + ?Sized,
{
    let mut set = OperationSet::new();
    let mut recoveries = RecoveryRegistry::new();

    for step in BuildStep::ALL {
        if flags.skips(step) {
            set.skip(step.id(), step.estimated_duration());
            continue;
        }

        let mut op = Operation::new(step.id(), supplier.work(step))
            .with_priority(step.priority())
            .with_estimate(step.estimated_duration())
            .in_phase(step.phase())
            .with_retries(step.retries());
        for dep in step.dependencies() {
            op = op.after(dep.id());
        }
        set.push(op);

        if let Some(action) = supplier.recovery(step) {
            recoveries.register(step.id(), action);
        }
    }

    (set, recoveries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::DagGraph;

    struct Noop;

    impl OperationSupplier for Noop {
        fn work(&self, _step: BuildStep) -> OperationWork {
            OperationWork::noop()
        }

        fn recovery(&self, step: BuildStep) -> Option<RecoveryAction> {
            (step == BuildStep::EnsureContainerRunning)
                .then(|| RecoveryAction::new(|| async { Ok(()) }))
        }
    }

    #[test]
    fn full_pipeline_is_a_valid_chain() {
        let (set, recoveries) = project_build_pipeline(&Noop, ProjectBuildFlags::default());
        let graph = DagGraph::build(&set).unwrap();

        assert_eq!(set.len(), 7);
        assert!(graph.dependencies_of("container-status-check").is_empty());
        let order = graph.topological_order();
        assert_eq!(order.first().map(String::as_str), Some("container-status-check"));
        assert_eq!(order.last().map(String::as_str), Some("notify-ui"));
        assert_eq!(set.sequential_estimate(), Duration::from_millis(11_700));
        assert!(recoveries.get("ensure-container-running").is_some());
        assert!(recoveries.get("install-dependencies").is_none());
    }

    #[test]
    fn skipped_steps_keep_their_estimate() {
        let flags = ProjectBuildFlags {
            skip_install: true,
            skip_sync: false,
        };
        let (set, _) = project_build_pipeline(&Noop, flags);

        assert_eq!(set.len(), 6);
        assert!(set.get("install-dependencies").is_none());
        assert_eq!(set.skipped().len(), 1);
        assert_eq!(set.sequential_estimate(), Duration::from_millis(11_700));
        assert!(DagGraph::build(&set).is_ok());
    }
}
