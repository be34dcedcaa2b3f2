/// The signed-in identity as supplied by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Stable subject id; stamped as `owner` and used to scope the cache.
    pub subject: String,
    pub groups: Vec<String>,
}

impl Identity {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            groups: Vec::new(),
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    /// Subject reduced to characters safe for a file name.
    pub fn storage_key(&self) -> String {
        self.subject
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect()
    }
}
