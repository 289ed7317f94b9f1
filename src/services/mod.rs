pub mod interaction;
pub mod memory_warehouse;
pub mod scratch;
pub mod session;
pub mod stage;
pub mod table;
pub mod upload_service;
pub mod warehouse;
