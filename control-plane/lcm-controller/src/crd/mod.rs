pub mod lcm;
pub mod rook;

pub use lcm::{
    CephDeploymentHealth, CephDeploymentMaintenance, CephOsdRemoveTask,
    MaintenanceState, TaskPhase,
};
pub use rook::{CephCluster, CephObjectStore};
