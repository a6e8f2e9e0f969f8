pub mod error;
pub mod gateway;
pub mod notify;
pub mod order;
pub mod repository;
pub mod reservation;
pub mod ticket;

pub use error::{GatewayError, NotifyError, OrderError, ReservationError, StockError};
pub use gateway::{resolve_status, PaymentGateway, PaymentIntent};
pub use notify::NotificationDispatcher;
pub use order::{Order, PaymentStatus};
pub use repository::{OrderRepository, ReservationRepository, StockLedger};
pub use reservation::{Reservation, ReservationStatus};
pub use ticket::{StockLevel, TicketType};
