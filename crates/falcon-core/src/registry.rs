//! Handler registry: maps a URL's scheme to the highest-priority handler
//! that claims it.

use std::sync::{Arc, Mutex};

use crate::handler::ProtocolHandler;

/// Extracts the lowercase scheme from a URL.
///
/// Handles both hierarchical (`scheme://rest`) and opaque (`scheme:rest`,
/// magnet-style) forms. A scheme is alphanumeric plus `+ - .`.
pub fn extract_scheme(url: &str) -> Option<String> {
    if let Some(pos) = url.find("://") {
        let scheme = &url[..pos];
        if !scheme.is_empty() {
            return Some(scheme.to_ascii_lowercase());
        }
        return None;
    }

    let pos = url.find(':')?;
    if pos == 0 {
        return None;
    }
    let scheme = &url[..pos];
    if scheme
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
    {
        Some(scheme.to_ascii_lowercase())
    } else {
        None
    }
}

pub fn is_valid_url(url: &str) -> bool {
    !url.is_empty() && extract_scheme(url).is_some()
}

/// Read-mostly list of registered handlers, sorted by descending priority.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Mutex<Vec<Arc<dyn ProtocolHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: Arc<dyn ProtocolHandler>) {
        let mut handlers = self.handlers.lock().unwrap();
        handlers.push(handler);
        handlers.sort_by_key(|h| std::cmp::Reverse(h.priority()));
    }

    /// Highest-priority handler whose scheme list contains the URL's scheme
    /// and whose `can_handle` accepts the URL.
    pub fn find_handler(&self, url: &str) -> Option<Arc<dyn ProtocolHandler>> {
        let scheme = extract_scheme(url)?;
        let handlers = self.handlers.lock().unwrap();
        handlers
            .iter()
            .find(|h| {
                h.supported_schemes()
                    .iter()
                    .any(|s| s.eq_ignore_ascii_case(&scheme))
                    && h.can_handle(url)
            })
            .cloned()
    }

    pub fn is_supported(&self, url: &str) -> bool {
        self.find_handler(url).is_some()
    }

    /// Sorted, de-duplicated list of every supported scheme.
    pub fn protocols(&self) -> Vec<String> {
        let handlers = self.handlers.lock().unwrap();
        let mut schemes: Vec<String> = handlers
            .iter()
            .flat_map(|h| h.supported_schemes().iter().map(|s| s.to_string()))
            .collect();
        schemes.sort();
        schemes.dedup();
        schemes
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.lock().unwrap().len()
    }
}
