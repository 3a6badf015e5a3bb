pub mod content_cache;
