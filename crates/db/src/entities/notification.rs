//! Notification entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Notification types.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    #[sea_orm(string_value = "follow_request")]
    FollowRequest,
    #[sea_orm(string_value = "follow_accepted")]
    FollowAccepted,
}

impl NotificationType {
    /// Wire representation of the type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FollowRequest => "follow_request",
            Self::FollowAccepted => "follow_accepted",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "notification")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// The user receiving the notification
    pub notifiee_id: String,

    /// The user whose action produced the notification
    pub notifier_id: String,

    pub notification_type: NotificationType,

    /// Related follow relationship (follow types only)
    #[sea_orm(nullable)]
    pub follow_relationship_id: Option<String>,

    #[sea_orm(default_value = false)]
    pub is_read: bool,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::NotifieeId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    Notifiee,

    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::NotifierId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    Notifier,

    #[sea_orm(
        belongs_to = "super::follow_relationship::Entity",
        from = "Column::FollowRelationshipId",
        to = "super::follow_relationship::Column::Id",
        on_delete = "Cascade"
    )]
    FollowRelationship,
}

impl Related<super::follow_relationship::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::FollowRelationship.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
