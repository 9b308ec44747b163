pub mod handlers;
pub mod router;
pub mod models;
pub mod services;

pub use models::*;
pub use router::encounter_routes;
pub use services::attachment::AttachmentService;
pub use services::encounter::EncounterService;
