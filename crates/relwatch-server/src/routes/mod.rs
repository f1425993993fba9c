pub mod deployments;
pub mod events;
pub mod releases;
pub mod targets;
