pub mod shell;
pub mod storage;
pub mod usage;
