/// Read-only texts shown by `--print-*` and the About pages.
#[derive(Debug, Clone)]
pub struct Resources {
    pub license: String,
    pub readme: String,
    pub credits: String,
}

impl Resources {
    /// Texts compiled into the binary.
    pub fn bundled() -> Self {
        Self {
            license: include_str!("../LICENSE").to_string(),
            readme: include_str!("../README.md").to_string(),
            credits: include_str!("../resources/credits.md").to_string(),
        }
    }

    pub fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_texts_are_present() {
        let resources = Resources::bundled();
        assert!(resources.license.contains("MIT License"));
        assert!(resources.readme.starts_with("# pi-picture-frame"));
        assert!(resources.credits.contains("pqiv"));
        assert!(!Resources::version().is_empty());
    }
}
