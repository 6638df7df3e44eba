use once_cell::sync::Lazy;
use regex::Regex;

// must match the db constraint `valid_email_format`:
//   email ~* '^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$'
// (`validator::ValidateEmail` accepts e.g. `john@localhost`)
static EMAIL_FORMAT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$")
        .expect("email pattern is a valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// A trimmed, lowercased email that the remote db will accept.
///
/// Must be instantiated with `SubscriberEmail::parse`; the field is left
/// private so the normalization cannot be bypassed.
pub struct SubscriberEmail(String);

impl SubscriberEmail {
    pub fn parse(email: &str) -> Result<Self, String> {
        let normalized = email.trim().to_lowercase();
        EMAIL_FORMAT
            .is_match(&normalized)
            .then_some(Self(normalized))
            .ok_or(format!("Invalid email: {email:?}"))
    }
}

impl AsRef<str> for SubscriberEmail {
    fn as_ref(&self) -> &str { &self.0 }
}

impl std::fmt::Display for SubscriberEmail {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
