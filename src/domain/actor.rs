//! Caller identity supplied by the authentication layer

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role { Customer, Admin, System }

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Actor { pub id: Uuid, pub role: Role }

impl Actor {
    pub fn new(id: Uuid, role: Role) -> Self { Self { id, role } }
    pub fn customer(id: Uuid) -> Self { Self::new(id, Role::Customer) }
    pub fn admin(id: Uuid) -> Self { Self::new(id, Role::Admin) }

    /// Internal identity used by the settlement path.
    pub fn system() -> Self { Self::new(Uuid::nil(), Role::System) }

    pub fn is_admin(&self) -> bool { self.role == Role::Admin }
    pub fn is_privileged(&self) -> bool { matches!(self.role, Role::Admin | Role::System) }
}
