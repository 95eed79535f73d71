//! Repositories over the relational store.

pub mod follow_relationship;
pub mod notification;
pub mod user;

pub use follow_relationship::{FollowRelationshipRepository, RelationshipRemoval, RequestResolution};
pub use notification::NotificationRepository;
pub use user::UserRepository;
