// =============================================================================
// Mediaron Federated Media Repository - Services Module
// =============================================================================
//
// Project: Mediaron - Ultra High Performance Federated Media Repository
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Contributors: Mediaron Development Team
// Date: 2025-04-02
// Version: 0.1.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   Central service container wiring the media download core to its injected
//   collaborators: the metadata store, the configured datastores, and the
//   federation resource handler owned by the surrounding server.
//
// =============================================================================

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::Config;

pub mod media;

/// Container for every service the media repository core exposes.
///
/// The caches inside are process-wide and shared by reference; construct one
/// container per process and hand out clones of the inner `Arc`s.
pub struct Services {
    pub config: Arc<RwLock<Config>>,
    pub media: Arc<media::Service>,
}

impl Services {
    pub fn build(
        config: Config,
        db: Arc<dyn media::Data>,
        datastores: media::Datastores,
        resource_handler: Arc<dyn media::ResourceHandler>,
    ) -> Self {
        let content_cache = Arc::new(media::ContentCache::new(
            config.media.content_cache_capacity,
        ));
        let config = Arc::new(RwLock::new(config));
        let media = media::Service::build(
            Arc::clone(&config),
            db,
            Arc::new(datastores),
            content_cache,
            resource_handler,
        );

        info!("✅ Media repository services initialized");
        Self { config, media }
    }

    /// Spawns the hot-cache sweeper and the remote download workers.
    pub fn start_background_tasks(&self) {
        self.media.start_background_tasks();
    }
}
