pub mod operator;
pub mod organize_pipeline;
