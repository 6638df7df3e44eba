/// The optional name parts of a subscriber, plus the display name derived from
/// them. Blank parts are stored as `None`, never as empty strings.
///
/// Unlike the email, a name is never a reason to reject a row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriberName {
    first: Option<String>,
    last: Option<String>,
    full: Option<String>,
}

fn non_blank(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

impl SubscriberName {
    pub fn parse(
        first: &str,
        last: &str,
    ) -> Self {
        let (first, last) = (first.trim(), last.trim());
        Self {
            first: non_blank(first),
            last: non_blank(last),
            // "first last", or whichever half is present
            full: non_blank(&format!("{first} {last}")),
        }
    }

    pub fn first(&self) -> Option<&str> { self.first.as_deref() }

    pub fn last(&self) -> Option<&str> { self.last.as_deref() }

    pub fn full(&self) -> Option<&str> { self.full.as_deref() }
}
