pub mod handlers;
pub mod router;
pub mod models;
pub mod services;

pub use models::*;
pub use router::schedule_routes;
pub use services::events::SlotEventHub;
pub use services::journey::JourneyService;
pub use services::slot::SlotService;
