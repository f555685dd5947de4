//! Keyed store of rendered tiles, shared between render workers and the
//! orchestrating thread.
//!
//! The store exclusively owns all tile entities. Lookups are exact matches on
//! the normalized [`TileId`]; invalidation removes every entity of a layer at
//! once. Each pending-to-ready transition is published on a broadcast channel
//! so repaint drivers can react without polling. Sends never block render
//! workers; a subscriber that falls behind drops events, which is acceptable
//! because every event carries the same meaning: at least one more tile is
//! ready, repaint.

use crate::tile::{LayerId, RenderedTile, TileId};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Capacity of the ready-event channel. Lagging subscribers lose oldest
/// events first, which only coalesces repaints.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Store change notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A tile transitioned from pending to ready.
    TileReady(TileId),
}

/// Concurrent store of rendered tiles, keyed by normalized envelope and
/// owning layer.
pub struct PartialStore {
    tiles: DashMap<TileId, Arc<RenderedTile>>,
    events: broadcast::Sender<StoreEvent>,
}

impl PartialStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            tiles: DashMap::new(),
            events,
        }
    }

    /// Exact-match lookup by normalized key.
    pub fn find(&self, id: &TileId) -> Option<Arc<RenderedTile>> {
        self.tiles.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Adds an entity in pending or ready state.
    ///
    /// Replacing an existing key is allowed; it happens when a tile is
    /// re-rendered after invalidation.
    pub fn insert(&self, tile: Arc<RenderedTile>) {
        self.tiles.insert(tile.id().clone(), tile);
    }

    /// Removes every entity belonging to `layer` and returns how many were
    /// dropped.
    ///
    /// Safe to call while renders for the layer are in flight: a late
    /// completion re-inserts a result at a valid key, and the next pass
    /// either reuses it or invalidates again.
    pub fn delete_layer(&self, layer: &LayerId) -> usize {
        let before = self.tiles.len();
        self.tiles.retain(|id, _| id.layer() != layer);
        let removed = before - self.tiles.len();
        debug!(layer = %layer, removed, "Invalidated cached tiles for layer");
        removed
    }

    /// Removes every entity in the store.
    pub fn clear(&self) {
        self.tiles.clear();
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Subscribes to ready notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Publishes a pending-to-ready transition.
    ///
    /// Called by render workers after attaching an image. The send fails only
    /// when no subscriber exists, which is fine.
    pub fn publish_ready(&self, id: &TileId) {
        let _ = self.events.send(StoreEvent::TileReady(id.clone()));
    }
}

impl Default for PartialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PartialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartialStore")
            .field("tiles", &self.tiles.len())
            .finish()
    }
}
