pub mod identity;
pub mod list;
pub mod profile;
pub mod task;
