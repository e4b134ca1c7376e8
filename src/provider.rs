use std::collections::HashMap;

use crate::error::{MinihamlError, MinihamlResult};

const EXTENSION: &str = ".haml";

/// A template source and the identity it is cached under.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplateSource {
    pub identity: String,
    pub text: String,
}

/// Where template sources come from.
pub trait ContentProvider {
    /// Finds the source of template `name`, trying `name` itself first and
    /// then `fallback/name` for each of `fallbacks` in order.
    ///
    /// # Errors
    /// `TemplateNotFound` listing every location that was searched.
    fn source(&self, name: &str, fallbacks: &[&str]) -> MinihamlResult<TemplateSource>;
}

/// Normalise a template name to its stored form, e.g. `home` to `home.haml`.
pub(crate) fn normalise(name: &str) -> String {
    let name = name.trim_start_matches('/');
    if name.ends_with(EXTENSION) {
        name.to_owned()
    } else {
        format!("{name}{EXTENSION}")
    }
}

/// Template sources held in memory.
///
/// ```
/// use minihaml::{ContentProvider, MemoryProvider};
///
/// let mut provider = MemoryProvider::new();
/// provider.insert("shared/footer", "%footer");
///
/// let source = provider.source("footer", &["shared"]).unwrap();
/// assert_eq!(source.identity, "shared/footer.haml");
/// ```
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Default)]
pub struct MemoryProvider {
    sources: HashMap<String, String>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `text` under `name`, returning the source it replaced.
    pub fn insert<N: AsRef<str>, T: Into<String>>(&mut self, name: N, text: T) -> Option<String> {
        self.sources.insert(normalise(name.as_ref()), text.into())
    }

    pub fn contains<N: AsRef<str>>(&self, name: N) -> bool {
        self.sources.contains_key(&normalise(name.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl ContentProvider for MemoryProvider {
    fn source(&self, name: &str, fallbacks: &[&str]) -> MinihamlResult<TemplateSource> {
        let name = normalise(name);
        let candidates = std::iter::once(name.clone()).chain(
            fallbacks
                .iter()
                .map(|fallback| format!("{}/{name}", fallback.trim_end_matches('/'))),
        );

        let mut searched = Vec::new();
        for candidate in candidates {
            if let Some(text) = self.sources.get(&candidate) {
                return Ok(TemplateSource {
                    identity: candidate,
                    text: text.clone(),
                });
            }
            searched.push(candidate);
        }

        Err(MinihamlError::TemplateNotFound { name, searched })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn test_names_are_normalised() {
        let mut provider = MemoryProvider::new();
        assert!(provider.insert("home", "%p").is_none());
        assert!(provider.insert("home.haml", "%div").is_some());
        assert!(provider.contains("/home"));
        assert_eq!(provider.len(), 1);

        let source = provider.source("home", &[]).unwrap();
        assert_eq!(source.identity, "home.haml");
        assert_eq!(source.text, "%div");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_own_name_wins_over_fallbacks() {
        let mut provider = MemoryProvider::new();
        provider.insert("card", "%p own");
        provider.insert("shared/card", "%p shared");
        let source = provider.source("card", &["shared"]).unwrap();
        assert_eq!(source.text, "%p own");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_not_found_lists_search() {
        let provider = MemoryProvider::new();
        let err = provider.source("missing", &["shared/", "layouts"]).unwrap_err();
        assert_eq!(
            err,
            MinihamlError::TemplateNotFound {
                name: "missing.haml".to_owned(),
                searched: vec![
                    "missing.haml".to_owned(),
                    "shared/missing.haml".to_owned(),
                    "layouts/missing.haml".to_owned(),
                ],
            }
        );
    }
}
