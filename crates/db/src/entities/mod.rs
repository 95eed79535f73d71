//! Database entities.

#![allow(missing_docs)]

pub mod follow_relationship;
pub mod notification;
pub mod user;

pub use follow_relationship::Entity as FollowRelationship;
pub use notification::Entity as Notification;
pub use user::Entity as User;
