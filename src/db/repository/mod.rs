pub mod broadcast_repository;
pub mod delivery;
pub mod message_queue_repository;
pub mod recipient;

pub use broadcast_repository::BroadcastRepository;
pub use message_queue_repository::MessageQueueRepository;
pub use recipient::RecipientRepository;
