pub mod document;
pub mod driver;
pub mod memory;
pub mod transaction;
