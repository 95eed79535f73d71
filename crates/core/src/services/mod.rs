//! Business logic services.

#![allow(missing_docs)]

pub mod following;
pub mod notification;
pub mod otp;
pub mod signal;
pub mod user;

pub use following::{FollowDecision, FollowListEntry, FollowService, RelationshipState};
pub use notification::{NotificationList, NotificationService, NotificationView};
pub use otp::{IssuedCode, OtpStore};
pub use signal::{
    DeliverySignal, MemorySignalQueue, SignalAction, SignalQueue, SignalQueueService,
    push_best_effort,
};
pub use user::{UserProfile, UserService, UserSummary};
