use super::operator_scale::{
    OsdRemovalTaskView, ScaleReason, ScaleSignals, decide,
};
use crate::crd::{CephOsdRemoveTask, TaskPhase};

const ALL_PHASES: [TaskPhase; 11] = [
    TaskPhase::Pending,
    TaskPhase::Validating,
    TaskPhase::ValidationFailed,
    TaskPhase::Aborted,
    TaskPhase::ApproveWaiting,
    TaskPhase::WaitingOperator,
    TaskPhase::Processing,
    TaskPhase::Completed,
    TaskPhase::CompletedWithWarnings,
    TaskPhase::Failed,
    TaskPhase::Unknown,
];

fn task(name: &str, phase: TaskPhase, resolved: bool) -> OsdRemovalTaskView {
    OsdRemovalTaskView {
        name: name.to_string(),
        phase,
        approve: false,
        resolved,
    }
}

/// Every single-task list plus a few mixed ones.
fn task_sets() -> Vec<Vec<OsdRemovalTaskView>> {
    let mut sets = vec![Vec::new()];
    for phase in ALL_PHASES {
        for resolved in [false, true] {
            sets.push(vec![task("t", phase, resolved)]);
        }
    }
    sets.push(vec![
        task("done", TaskPhase::Completed, false),
        task("failed", TaskPhase::Failed, false),
        task("running", TaskPhase::Processing, false),
    ]);
    sets.push(vec![
        task("old", TaskPhase::Failed, true),
        task("waiting", TaskPhase::ApproveWaiting, false),
    ]);
    sets
}

#[test]
fn maintenance_always_stops_operator() {
    for external in [false, true] {
        for tasks in task_sets() {
            let d = decide(&ScaleSignals {
                maintenance_acting: true,
                external_cluster: external,
                tasks,
            });
            assert_eq!(d.replicas, 0);
            assert_eq!(d.reason, ScaleReason::MaintenanceActing);
        }
    }
}

#[test]
fn external_cluster_ignores_tasks() {
    for tasks in task_sets() {
        let d = decide(&ScaleSignals {
            maintenance_acting: false,
            external_cluster: true,
            tasks,
        });
        assert_eq!(d.replicas, 1);
        assert_eq!(d.reason, ScaleReason::ExternalCluster);
    }
}

#[test]
fn processing_task_stops_operator() {
    for tasks in task_sets() {
        let mut tasks = tasks;
        tasks.push(task("busy", TaskPhase::Processing, true));
        let d = decide(&ScaleSignals {
            maintenance_acting: false,
            external_cluster: false,
            tasks,
        });
        assert_eq!(d.replicas, 0);
    }
}

#[test]
fn local_cluster_matches_invariant() {
    for tasks in task_sets() {
        let blocked = tasks.iter().any(|t| {
            matches!(t.phase, TaskPhase::WaitingOperator | TaskPhase::Processing)
                || (t.phase == TaskPhase::Failed && !t.resolved)
        });
        let d = decide(&ScaleSignals {
            maintenance_acting: false,
            external_cluster: false,
            tasks,
        });
        assert_eq!(d.replicas, if blocked { 0 } else { 1 });
        assert_eq!(d.reason.replicas(), d.replicas);
    }
}

#[test]
fn in_flight_outranks_unresolved_failure() {
    let d = decide(&ScaleSignals {
        maintenance_acting: false,
        external_cluster: false,
        tasks: vec![
            task("failed", TaskPhase::Failed, false),
            task("waiting", TaskPhase::WaitingOperator, false),
        ],
    });
    assert_eq!(
        d.reason,
        ScaleReason::TaskInFlight {
            task: "waiting".into(),
            phase: TaskPhase::WaitingOperator
        }
    );
    assert_eq!(
        d.reason.to_string(),
        "found CephOsdRemoveTask 'waiting' in phase 'WaitingOperator'"
    );
}

#[test]
fn resolved_failure_does_not_block() {
    let d = decide(&ScaleSignals {
        maintenance_acting: false,
        external_cluster: false,
        tasks: vec![task("failed", TaskPhase::Failed, true)],
    });
    assert_eq!(d.replicas, 1);
    assert_eq!(d.reason, ScaleReason::NoBlockers);
}

#[test]
fn tasks_without_phase_are_ignored() {
    let t: CephOsdRemoveTask = serde_json::from_value(serde_json::json!({
        "metadata": {"name": "fresh", "namespace": "ceph-lcm"},
        "spec": {"approve": true}
    }))
    .unwrap();
    assert_eq!(OsdRemovalTaskView::from_task(&t), None);

    let t: CephOsdRemoveTask = serde_json::from_value(serde_json::json!({
        "metadata": {"name": "running", "namespace": "ceph-lcm"},
        "spec": {"approve": true},
        "status": {"phase": "Processing"}
    }))
    .unwrap();
    assert_eq!(
        OsdRemovalTaskView::from_task(&t),
        Some(OsdRemovalTaskView {
            name: "running".into(),
            phase: TaskPhase::Processing,
            approve: true,
            resolved: false,
        })
    );
}
