use thiserror::Error;

/// Failures a selection run can hit, by how far they propagate.
///
/// Only `Fetch` aborts a run once it has started; `Config` fails before one
/// starts. The others are caught per item, logged with category and cluster
/// context, and the loop moves on.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Failed to load raw items: {0}")]
    Fetch(#[source] anyhow::Error),

    #[error("Generation failed for {category} cluster: {source}")]
    Generation {
        category: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Commit failed for {category} cluster: {source}")]
    Persistence {
        category: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Side effect '{operation}' failed: {source}")]
    SideEffect {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl RunError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, RunError::Fetch(_) | RunError::Config(_))
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    MissingEnv(&'static str),

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_item_errors_are_not_fatal() {
        assert!(RunError::Fetch(anyhow::anyhow!("db down")).is_fatal());
        let gen = RunError::Generation {
            category: "Tesla".to_string(),
            source: anyhow::anyhow!("timeout"),
        };
        assert!(!gen.is_fatal());
        assert_eq!(gen.to_string(), "Generation failed for Tesla cluster: timeout");
        let side = RunError::SideEffect {
            operation: "mark_consumed",
            source: anyhow::anyhow!("conn reset"),
        };
        assert!(!side.is_fatal());
        assert!(RunError::from(ConfigError::MissingEnv("DATABASE_URL")).is_fatal());
    }
}
