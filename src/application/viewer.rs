use crate::domain::entities::UserRecord;

/// Identity making the current request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Viewer {
    #[default]
    Anonymous,
    User(UserRecord),
}

impl Viewer {
    pub fn user(&self) -> Option<&UserRecord> {
        match self {
            Viewer::User(user) => Some(user),
            Viewer::Anonymous => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Viewer::User(_))
    }

    pub fn username(&self) -> Option<&str> {
        self.user().map(|user| user.username.as_str())
    }

    /// True when the viewer is the given user.
    pub fn is(&self, other: &UserRecord) -> bool {
        self.user().is_some_and(|user| user.id == other.id)
    }
}
