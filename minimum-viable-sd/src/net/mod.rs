pub mod announce;
pub mod listener;
