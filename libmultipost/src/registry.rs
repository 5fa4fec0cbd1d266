//! Adapter registry
//!
//! Maps every [`WebsiteId`] to one shared adapter instance. Adapters are
//! built once against a single transport so cookie partitions and account
//! information live as long as the registry.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::description::{append_advertisement, expand_shortcuts, UsernameShortcut};
use crate::error::{MultipostError, Result};
use crate::transport::Transport;
use crate::types::WebsiteId;
use crate::websites::derpibooru::Derpibooru;
use crate::websites::discord::Discord;
use crate::websites::furaffinity::FurAffinity;
use crate::websites::mastodon::Mastodon;
use crate::websites::patreon::Patreon;
use crate::websites::weasyl::Weasyl;
use crate::websites::WebsiteAdapter;

pub struct AdapterRegistry {
    adapters: HashMap<WebsiteId, Arc<dyn WebsiteAdapter>>,
    transport: Arc<dyn Transport>,
}

impl AdapterRegistry {
    /// Empty registry; adapters are added with [`register`](Self::register)
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            adapters: HashMap::new(),
            transport,
        }
    }

    /// Registry holding every built-in adapter
    pub fn with_defaults(transport: Arc<dyn Transport>) -> Self {
        let mut registry = Self::new(Arc::clone(&transport));
        registry.register(Arc::new(Derpibooru::new(Arc::clone(&transport))));
        registry.register(Arc::new(Discord::new(Arc::clone(&transport))));
        registry.register(Arc::new(FurAffinity::new(Arc::clone(&transport))));
        registry.register(Arc::new(Mastodon::new(Arc::clone(&transport))));
        registry.register(Arc::new(Patreon::new(Arc::clone(&transport))));
        registry.register(Arc::new(Weasyl::new(transport)));
        registry
    }

    /// Add `adapter`, replacing any adapter registered under the same id
    pub fn register(&mut self, adapter: Arc<dyn WebsiteAdapter>) {
        self.adapters.insert(adapter.id(), adapter);
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    pub fn get_adapter(&self, website: WebsiteId) -> Result<Arc<dyn WebsiteAdapter>> {
        self.adapters.get(&website).cloned().ok_or_else(|| {
            MultipostError::NotFound(format!("No adapter registered for {}", website.display_name()))
        })
    }

    /// Every registered adapter, ordered by id
    pub fn all_adapters(&self) -> Vec<Arc<dyn WebsiteAdapter>> {
        let mut adapters: Vec<_> = self.adapters.values().cloned().collect();
        adapters.sort_by_key(|a| a.id());
        adapters
    }

    /// Shortcut table of every adapter, keyed by the owning website
    pub fn all_username_shortcuts(&self) -> Vec<(WebsiteId, UsernameShortcut)> {
        self.all_adapters()
            .iter()
            .flat_map(|adapter| {
                let id = adapter.id();
                adapter
                    .username_shortcuts()
                    .iter()
                    .map(move |shortcut| (id, *shortcut))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Turn shortcuts owned by other websites into HTML profile links
    ///
    /// Shortcuts owned by `website` are left for its own preparse step.
    pub fn expand_foreign_shortcuts(&self, text: &str, website: WebsiteId) -> String {
        let foreign: Vec<UsernameShortcut> = self
            .all_username_shortcuts()
            .into_iter()
            .filter(|(owner, _)| *owner != website)
            .map(|(_, shortcut)| shortcut)
            .collect();
        expand_shortcuts(text, &foreign, |shortcut, name| shortcut.link_html(name))
    }

    /// Render a raw description the way it is posted to `adapter`, before
    /// length truncation
    pub fn render_description(&self, adapter: &dyn WebsiteAdapter, raw: &str, advertise: bool) -> String {
        let mut raw = self.expand_foreign_shortcuts(raw, adapter.id());
        if advertise && adapter.capabilities().enable_advertisement {
            raw = append_advertisement(&raw);
        }
        adapter.postparse_description(&adapter.parse_description(&raw))
    }

    /// Forget cookies and cached information of a deleted account
    pub fn clear_account(&self, account_id: &str) {
        self.transport.clear_account(account_id);
        for adapter in self.adapters.values() {
            adapter.account_info().clear(account_id);
        }
        info!(account = %account_id, "Cleared account state");
    }
}
