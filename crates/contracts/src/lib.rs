use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Wire value the remote store uses for a drink that has not been persisted yet.
pub const NEW_DRINK_ID: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Capability(&'static str);

impl Capability {
    pub const GET_DRINKS_DETAIL: Capability = Capability("get:drinks-detail");
    pub const POST_DRINKS: Capability = Capability("post:drinks");
    pub const PATCH_DRINKS: Capability = Capability("patch:drinks");
    pub const DELETE_DRINKS: Capability = Capability("delete:drinks");
    pub const MANAGE_BARISTAS: Capability = Capability("manage:baristas");

    pub fn as_str(self) -> &'static str {
        self.0
    }
}

impl AsRef<str> for Capability {
    fn as_ref(&self) -> &str {
        self.0
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DrinkId(pub i64);

impl fmt::Display for DrinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeLine {
    #[serde(default)]
    pub name: String,
    pub color: String,
    pub parts: f64,
}

impl Default for RecipeLine {
    fn default() -> Self {
        Self {
            name: String::new(),
            color: "white".to_string(),
            parts: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drink {
    #[serde(
        default,
        serialize_with = "serialize_drink_id",
        deserialize_with = "deserialize_drink_id"
    )]
    pub id: Option<DrinkId>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub recipe: Vec<RecipeLine>,
}

impl Drink {
    /// Fresh, unpersisted drink seeded with exactly one blank recipe line.
    pub fn blank() -> Self {
        Self {
            id: None,
            title: String::new(),
            recipe: vec![RecipeLine::default()],
        }
    }

    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }
}

fn serialize_drink_id<S>(id: &Option<DrinkId>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_i64(id.map(|id| id.0).unwrap_or(NEW_DRINK_ID))
}

fn deserialize_drink_id<'de, D>(deserializer: D) -> Result<Option<DrinkId>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<i64>::deserialize(deserializer)?;
    Ok(raw.filter(|id| *id >= 0).map(DrinkId))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Staff account as reported by the identity provider's management API.
///
/// Roles are not part of this record; they are fetched per user on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(flatten)]
    pub profile: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoleKind {
    Manager,
    Barista,
    Other,
}

impl RoleKind {
    pub fn classify(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "manager" => RoleKind::Manager,
            "barista" => RoleKind::Barista,
            _ => RoleKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RoleRecord", into = "RoleRecord")]
pub struct Role {
    pub id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub kind: RoleKind,
}

#[derive(Serialize, Deserialize)]
struct RoleRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

impl From<RoleRecord> for Role {
    fn from(record: RoleRecord) -> Self {
        let kind = RoleKind::classify(&record.name);
        Self {
            id: record.id,
            name: record.name,
            description: record.description,
            kind,
        }
    }
}

impl From<Role> for RoleRecord {
    fn from(role: Role) -> Self {
        Self {
            id: role.id,
            name: role.name,
            description: role.description,
        }
    }
}

pub fn roles_contain(roles: &[Role], kind: RoleKind) -> bool {
    roles.iter().any(|role| role.kind == kind)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrinksEnvelope {
    #[serde(default)]
    pub success: bool,
    pub drinks: Vec<Drink>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedEnvelope {
    #[serde(default)]
    pub success: bool,
    pub delete: DrinkId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsersEnvelope {
    #[serde(default)]
    pub success: bool,
    pub users: Vec<User>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolesEnvelope {
    #[serde(default)]
    pub success: bool,
    pub roles: Vec<Role>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaristaChange {
    #[serde(rename = "toFireBarista")]
    pub to_fire_barista: bool,
}

/// Failure body returned by the remote store for every non-success status.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error: Option<u16>,
    #[serde(default)]
    pub message: Option<String>,
}
