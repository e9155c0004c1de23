//! Authenticated identity of the sharing user.

/// Fallback sharer name when the account has neither a display name nor an email.
pub const ANONYMOUS_SHARER: &str = "Student";

/// The signed-in user as reported by the auth provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub display_name: Option<String>,
    pub email: Option<String>,
}

impl Identity {
    pub fn new(display_name: Option<String>, email: Option<String>) -> Self {
        Self {
            display_name,
            email,
        }
    }

    /// Name written into `sharedBy`: display name, then email, then "Student".
    pub fn sharer_name(&self) -> &str {
        non_blank(self.display_name.as_deref())
            .or_else(|| non_blank(self.email.as_deref()))
            .unwrap_or(ANONYMOUS_SHARER)
    }

    /// Name used in the "NEED HELP!!" option: display name or "Student".
    pub fn help_name(&self) -> &str {
        non_blank(self.display_name.as_deref()).unwrap_or(ANONYMOUS_SHARER)
    }
}

/// Access to the currently authenticated user.
pub trait AuthSession: Send + Sync {
    /// The signed-in user, or `None` when signed out.
    fn current_user(&self) -> Option<Identity>;
}

/// Fixed identity, for embedding hosts that resolve auth up front.
#[derive(Debug, Clone, Default)]
pub struct StaticAuth {
    user: Option<Identity>,
}

impl StaticAuth {
    pub fn signed_in(identity: Identity) -> Self {
        Self {
            user: Some(identity),
        }
    }

    pub fn signed_out() -> Self {
        Self { user: None }
    }
}

impl AuthSession for StaticAuth {
    fn current_user(&self) -> Option<Identity> {
        self.user.clone()
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
