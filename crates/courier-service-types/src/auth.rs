/// Unidentified-delivery access keys are always 16 bytes, derived from the
/// recipient's profile key.
pub const UD_ACCESS_KEY_LEN: usize = 16;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

impl BasicCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// How a request to the messaging service authenticates itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Auth {
    Basic(BasicCredentials),
    UnidentifiedAccess([u8; UD_ACCESS_KEY_LEN]),
}

impl Auth {
    pub fn is_unidentified(&self) -> bool {
        matches!(self, Auth::UnidentifiedAccess(_))
    }
}
