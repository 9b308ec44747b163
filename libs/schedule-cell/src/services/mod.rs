pub mod events;
pub mod journey;
pub mod lifecycle;
pub mod slot;
pub mod slots;
