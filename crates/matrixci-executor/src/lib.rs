//! Environment providers for MatrixCI.
//!
//! Provides implementations for acquiring job environments:
//! - Local host scratch directories (development, self-hosted runners)
//! - Docker containers

pub mod commands;
pub mod docker;
pub mod local;

pub use docker::DockerProvider;
pub use local::LocalProvider;
pub use matrixci_core::environment::{
    Environment, EnvironmentProvider, LogLine, LogStream, SourceSpec, StepContext, StepOutcome,
};

use matrixci_config::{ProviderKind, Settings};
use std::path::Path;
use std::sync::Arc;

/// Build the provider selected by `settings`.
///
/// `source_dir` is a local checkout source the docker provider has to mount.
pub fn provider_from_settings(
    settings: &Settings,
    source_dir: Option<&Path>,
) -> matrixci_core::Result<Arc<dyn EnvironmentProvider>> {
    match settings.provider {
        ProviderKind::Local => {
            let mut provider = LocalProvider::new(settings.labels.iter().map(String::as_str));
            if let Some(root) = &settings.workspace_root {
                provider = provider.with_root(root);
            }
            Ok(Arc::new(provider))
        }
        ProviderKind::Docker => {
            let mut provider = DockerProvider::new(settings.images.clone())?;
            if let Some(dir) = source_dir {
                provider = provider.with_source_dir(dir);
            }
            Ok(Arc::new(provider))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matrixci_core::workflow::EnvironmentId;

    #[test]
    fn test_local_provider_from_settings() {
        let settings = Settings {
            labels: vec!["self-hosted".to_string()],
            ..Settings::default()
        };
        let provider = provider_from_settings(&settings, None).unwrap();
        assert_eq!(provider.name(), "local");
        assert!(provider.supports(&EnvironmentId::from("self-hosted")));
        assert!(!provider.supports(&EnvironmentId::from("windows-latest")));
    }
}
