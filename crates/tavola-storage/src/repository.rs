//! Repository layer for data access

pub mod delivery_log;
pub mod email_queue;
pub mod email_settings;
pub mod restaurant;
pub mod templates;

// Re-export concrete repository implementations with simple names
pub use delivery_log::DbDeliveryLogRepository;
pub use email_queue::DbEmailQueueRepository;
pub use email_settings::DbEmailSettingsRepository;
pub use restaurant::DbRestaurantRepository;
pub use templates::DbTemplateRepository;

// Re-export repository traits
pub use delivery_log::DeliveryLogRepository;
pub use email_queue::EmailQueueRepository;
pub use email_settings::EmailSettingsRepository;
pub use restaurant::RestaurantRepository;
pub use templates::TemplateRepository;
