pub mod output;
pub mod records;
