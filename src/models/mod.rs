pub mod batch;
pub mod entry;
pub mod grouping;
pub mod report;
pub mod undo_record;
