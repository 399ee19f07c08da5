//! Names of edge cache backends, as they appear in logs and metric labels.

use std::fmt;

use smol_str::SmolStr;

/// Short name of a backend instance, such as `moka` or `redis`.
///
/// Two instances of the same backend kind can carry different labels, which
/// keeps their log lines and metric series apart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct BackendLabel(SmolStr);

impl BackendLabel {
    /// Creates a label.
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self(name.into())
    }

    /// Label known at compile time.
    pub const fn new_static(name: &'static str) -> Self {
        Self(SmolStr::new_static(name))
    }

    /// The label text.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for BackendLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for BackendLabel {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for BackendLabel {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_compare_by_name() {
        let primary = BackendLabel::new_static("redis");
        let replica: BackendLabel = String::from("redis-replica").into();
        assert_eq!(primary, BackendLabel::new("redis"));
        assert_ne!(primary, replica);
        assert_eq!(replica.to_string(), "redis-replica");
    }
}
