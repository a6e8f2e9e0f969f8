use boxoffice_core::{OrderRepository, PaymentGateway, StockLedger};
use boxoffice_order::{ReconciliationEngine, ReservationManager};
use boxoffice_store::app_config::BusinessRules;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub stock: Arc<dyn StockLedger>,
    pub orders: Arc<dyn OrderRepository>,
    pub reservations: Arc<ReservationManager>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub engine: Arc<ReconciliationEngine>,
    pub rules: BusinessRules,
    pub ipn_secret: String,
    pub admin_api_key: String,
    pub pay_currency: String,
}
