pub mod db;
pub mod memory;
pub mod models;
pub mod riot;
pub mod static_data;
pub mod store;

pub use db::Db;
pub use memory::MemoryStore;
pub use store::Store;
