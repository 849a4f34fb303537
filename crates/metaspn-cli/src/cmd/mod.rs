pub mod add;
pub mod count;
pub mod enhancements;
pub mod import;
pub mod index;
pub mod init;
pub mod query;
pub mod recover;
pub mod stats;
