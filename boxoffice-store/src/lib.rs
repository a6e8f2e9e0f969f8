pub mod app_config;
pub mod database;
pub mod memory;
pub mod order_repo;
pub mod reservation_repo;
pub mod stock_repo;

pub use database::DbClient;
pub use memory::{MemoryOrderRepository, MemoryReservationRepository, MemoryStockLedger};
pub use order_repo::PgOrderRepository;
pub use reservation_repo::PgReservationRepository;
pub use stock_repo::PgStockLedger;
