pub mod generate;
pub mod list;
pub mod report;
pub mod validate;
