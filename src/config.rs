use serde::Deserialize;

/// Engine tunables. Deployments override the defaults with a small toml
/// file; everything not set there keeps the value the bot has always used.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Minimum similarity (0 to 100) for a fuzzy title lookup to count as
    /// a match.
    pub match_threshold: u8,
    /// Pool that titles land in when no pool is named.
    pub default_pool: String,
    /// Karma of a user with no recorded history.
    pub starting_karma: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            match_threshold: 60,
            default_pool: "main".to_string(),
            starting_karma: 0.0,
        }
    }
}

impl EngineConfig {
    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }
}

#[cfg(test)]
mod test {
    use super::EngineConfig;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.match_threshold, 60);
        assert_eq!(config.default_pool, "main");
        assert_eq!(config.starting_karma, 0.0);
    }

    #[test]
    fn test_partial_override() {
        let config = EngineConfig::from_toml("match_threshold = 80").unwrap();
        assert_eq!(config.match_threshold, 80);
        assert_eq!(config.default_pool, "main");
    }
}
