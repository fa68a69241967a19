use std::{fmt::Display, ops::Deref, path::PathBuf};

/// A resolved setting that remembers where its value came from.
///
/// Trunk branch and remote are resolved per repository with the precedence
/// project override > workspace configuration > auto-detection > default.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ParsedProperty<T> {
    /// Per-project override (parsed_value, project_name)
    Project(T, String),
    /// Value from a configuration file (parsed_value, config_path)
    File(T, PathBuf),
    /// Value from environment variable (parsed_value, env_var_value)
    Env(T, String),
    /// Value auto-detected from the repository (parsed_value, detection_method)
    Detected(T, String),
    /// Default value when no other source provided
    Default(T),
}

impl<T> ParsedProperty<T> {
    /// Get the parsed value
    pub fn value(&self) -> &T {
        match self {
            ParsedProperty::Project(value, _) => value,
            ParsedProperty::File(value, _) => value,
            ParsedProperty::Env(value, _) => value,
            ParsedProperty::Detected(value, _) => value,
            ParsedProperty::Default(value) => value,
        }
    }

    /// Describe the origin of the value for log and error messages
    pub fn origin(&self) -> String {
        match self {
            ParsedProperty::Project(_, project) => format!("project '{}'", project),
            ParsedProperty::File(_, path) => format!("config file {}", path.display()),
            ParsedProperty::Env(_, raw) => format!("environment ({})", raw),
            ParsedProperty::Detected(_, method) => format!("auto-detected from {}", method),
            ParsedProperty::Default(_) => "built-in default".to_string(),
        }
    }
}

impl<T> Deref for ParsedProperty<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.value()
    }
}

impl<T: Display> Display for ParsedProperty<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.value().fmt(f)
    }
}

impl<T: AsRef<str>> AsRef<str> for ParsedProperty<T> {
    fn as_ref(&self) -> &str {
        self.value().as_ref()
    }
}

impl<T> From<T> for ParsedProperty<T> {
    fn from(value: T) -> Self {
        ParsedProperty::Default(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// # ParsedProperty Value Access
    ///
    /// Tests accessing the parsed value from different source variants.
    ///
    /// ## Test Scenario
    /// - Creates ParsedProperty instances from every source
    /// - Tests value access via value() and Deref
    ///
    /// ## Expected Outcome
    /// - Both value() and deref return the same parsed value
    #[test]
    fn test_parsed_property_value_access() {
        let props = [
            ParsedProperty::Project("develop".to_string(), "api".to_string()),
            ParsedProperty::File("develop".to_string(), PathBuf::from("kira.toml")),
            ParsedProperty::Env("develop".to_string(), "develop".to_string()),
            ParsedProperty::Detected("develop".to_string(), "local branch".to_string()),
            ParsedProperty::Default("develop".to_string()),
        ];

        for prop in &props {
            assert_eq!(prop.value(), "develop");
            assert_eq!(&**prop, "develop");
            assert_eq!(prop.to_string(), "develop");
        }
    }

    /// # ParsedProperty Source Tracking
    ///
    /// Tests origin descriptions.
    ///
    /// ## Test Scenario
    /// - Creates ParsedProperty instances from different sources
    ///
    /// ## Expected Outcome
    /// - Origins mention the project, file or detection method
    #[test]
    fn test_parsed_property_source_tracking() {
        let project = ParsedProperty::Project("main".to_string(), "api".to_string());
        let file = ParsedProperty::File("main".to_string(), PathBuf::from("/ws/kira.toml"));
        let detected = ParsedProperty::Detected("main".to_string(), "local branch".to_string());
        let default = ParsedProperty::Default("main".to_string());

        assert!(project.origin().contains("'api'"));
        assert!(file.origin().contains("/ws/kira.toml"));
        assert!(detected.origin().contains("local branch"));
        assert_eq!(default.origin(), "built-in default");
    }
}
