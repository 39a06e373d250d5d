pub mod batch_planner;
pub mod classifier_service;
pub mod executor_service;
pub mod file_service;
pub mod merge_service;
pub mod reconcile_service;
pub mod snapshot_service;
pub mod undo_service;
