pub mod ai;
pub mod availability;
pub mod backend;
pub mod conversation;
pub mod dispatch;
pub mod greeting;
pub mod messaging;
pub mod notifications;
pub mod orchestrator;
pub mod reply;
pub mod resolver;
pub mod session_store;
pub mod slot_choice;
pub mod tenant_config;
