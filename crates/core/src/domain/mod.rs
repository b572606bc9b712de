pub mod file_set;
pub mod operation;
pub mod specification;
