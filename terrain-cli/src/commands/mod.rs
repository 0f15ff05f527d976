use anyhow::{Context, Result};
use std::path::PathBuf;
use terrain::{ElevationService, ElevationServiceBuilder, ReleasePolicy};

pub mod batch;
pub mod info;
pub mod list;
pub mod prefetch;
pub mod query;
pub mod tile;

/// Global flags shared by every subcommand.
pub struct ServiceOptions {
    pub cache_dir: Option<PathBuf>,
    pub cache_size: usize,
    pub tile_url: Option<String>,
    pub delete_on_evict: bool,
    pub offline: bool,
}

impl ServiceOptions {
    /// Environment defaults, overridden by whatever was given on the
    /// command line.
    pub fn builder(&self) -> Result<ElevationServiceBuilder> {
        let mut builder =
            ElevationServiceBuilder::from_env().context("Invalid TERRAIN_* environment variable")?;

        if let Some(dir) = &self.cache_dir {
            builder = builder.cache_dir(dir);
        }
        if let Some(template) = &self.tile_url {
            builder = builder.tile_url(template.clone());
        }
        if self.delete_on_evict {
            builder = builder.release_policy(ReleasePolicy::DeleteFile);
        }

        Ok(builder.capacity(self.cache_size).offline(self.offline))
    }

    pub fn build(&self) -> Result<ElevationService> {
        let service = self
            .builder()?
            .build()
            .context("Failed to create elevation service")?;

        tracing::debug!(
            cache_dir = %service.cache_dir().display(),
            cache_capacity = service.cache_capacity(),
            can_download = service.can_download(),
            "Elevation service ready"
        );
        Ok(service)
    }
}

pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
