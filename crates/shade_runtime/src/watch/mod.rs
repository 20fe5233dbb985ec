//! Registries that turn object-model mutations into cache invalidations.

mod dict_watch;
mod global_cache;
mod type_watch;

pub use dict_watch::DictKeyWatchRegistry;
pub use global_cache::{GlobalCache, GlobalCacheId, GlobalCacheKey, GlobalCacheManager};
pub use type_watch::TypeWatchRegistry;
