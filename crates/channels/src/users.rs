use serde::Deserialize;

/// A user known to a connector without a protocol-side directory.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ConnectorUser {
    pub name: String,
    #[serde(rename = "InternalID")]
    pub internal_id: String,
    pub email: String,
    pub full_name: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
}

impl ConnectorUser {
    pub fn attribute(&self, attr: &str) -> Option<&str> {
        let value = match attr.to_ascii_lowercase().as_str() {
            "name" | "username" => &self.name,
            "id" | "internalid" => &self.internal_id,
            "email" => &self.email,
            "realname" | "fullname" => &self.full_name,
            "firstname" => &self.first_name,
            "lastname" => &self.last_name,
            "phone" | "sms" => &self.phone,
            _ => return None,
        };
        (!value.is_empty()).then_some(value.as_str())
    }
}

/// Find a user by name or internal id.
pub(crate) fn lookup<'a>(users: &'a [ConnectorUser], user: &str) -> Option<&'a ConnectorUser> {
    users
        .iter()
        .find(|u| u.name == user || (!u.internal_id.is_empty() && u.internal_id == user))
}
