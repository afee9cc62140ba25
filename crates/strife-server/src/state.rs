//! The shared context every handler is invoked with: the three channel
//! senders, the session registry, and the external storage collaborators.

use crate::blob::Blob;
use crate::channel::ChannelHandle;
use crate::registry::Registry;
use crate::settings::ServerSettings;
use crate::store::Store;

pub struct AppState {
    pub store: Store,
    pub blob: Blob,
    pub registry: Registry,
    pub settings: ServerSettings,
    pub general: ChannelHandle,
    pub chats: ChannelHandle,
    pub files: ChannelHandle,
}

impl AppState {
    pub fn new(
        store: Store,
        blob: Blob,
        settings: ServerSettings,
        general: ChannelHandle,
        chats: ChannelHandle,
        files: ChannelHandle,
    ) -> Self {
        Self {
            store,
            blob,
            registry: Registry::new(),
            settings,
            general,
            chats,
            files,
        }
    }
}
