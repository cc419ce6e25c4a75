//! `SeaORM` Entity for agents table

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "agents")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    pub template_id: Option<Uuid>,
    pub name: String,
    pub instructions: String,
    pub profile_image_url: Option<String>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::agent_steps::Entity")]
    AgentSteps,
}

impl Related<super::agent_steps::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AgentSteps.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
