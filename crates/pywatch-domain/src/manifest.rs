use serde::{Deserialize, Serialize};

/// Package specifiers published next to the watched page, in install order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DependencyManifest {
    specs: Vec<String>,
}

impl DependencyManifest {
    /// Parse a requirements-style listing.
    ///
    /// Lines are trimmed; blank lines and lines starting with `#` are dropped.
    /// Everything else is kept verbatim and handed to the installer as-is.
    #[must_use]
    pub fn parse(contents: &str) -> Self {
        let specs = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(ToOwned::to_owned)
            .collect();
        Self { specs }
    }

    #[must_use]
    pub fn specs(&self) -> &[String] {
        &self.specs
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }
}

impl From<Vec<String>> for DependencyManifest {
    fn from(specs: Vec<String>) -> Self {
        Self { specs }
    }
}
