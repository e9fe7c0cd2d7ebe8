//! Engine context: collaborators plus the one scratch buffer.

use std::path::{Path, PathBuf};

use ctrpack_core::{
    CtrError, FsStorage, Interaction, LogInteraction, OpenMode, Result, Storage, StorageFile,
};
use ctrpack_formats::Keyring;

use crate::filetype::{GameFileType, identify_file_type};
use crate::settings::Settings;
use crate::tickets::{TicketSource, TicketStore};
use crate::util::output_path;

/// Context holding the injected collaborators of the content engine.
///
/// This is the main entry point for using the library. Build a context from
/// [`Settings`] (or by hand for tests), then call the verify, transform and
/// build operations on it. Every operation takes `&mut self`, so one context
/// runs one operation at a time.
pub struct CtrContext {
    pub(crate) storage: Box<dyn Storage>,
    pub(crate) keyring: Keyring,
    pub(crate) tickets: Box<dyn TicketSource>,
    pub(crate) interaction: Box<dyn Interaction>,
    pub(crate) settings: Settings,
    pub(crate) buffer: Vec<u8>,
}

impl CtrContext {
    /// Context on the local filesystem, logging progress, with no tickets.
    pub fn new(settings: Settings, keyring: Keyring) -> Self {
        let buffer = vec![0u8; settings.buffer_size];
        Self {
            storage: Box::new(FsStorage),
            keyring,
            tickets: Box::new(TicketStore::new()),
            interaction: Box::new(LogInteraction),
            settings,
            buffer,
        }
    }

    /// Context with the keyring and ticket directory named in `settings`.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let keyring = match &settings.keyring {
            Some(path) => Keyring::load(path)?,
            None => Keyring::new(),
        };
        let tickets = match &settings.tickets_dir {
            Some(dir) => TicketStore::load_dir(dir)?,
            None => TicketStore::new(),
        };
        Ok(Self::new(settings, keyring).with_tickets(Box::new(tickets)))
    }

    pub fn with_storage(mut self, storage: Box<dyn Storage>) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_tickets(mut self, tickets: Box<dyn TicketSource>) -> Self {
        self.tickets = tickets;
        self
    }

    pub fn with_interaction(mut self, interaction: Box<dyn Interaction>) -> Self {
        self.interaction = interaction;
        self
    }

    pub fn keyring(&self) -> &Keyring {
        &self.keyring
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub(crate) fn open(&self, path: &Path, mode: OpenMode) -> Result<Box<dyn StorageFile>> {
        Ok(self.storage.open(path, mode)?)
    }

    /// Report progress; a `false` from the frontend becomes `Cancelled`.
    pub(crate) fn progress(&self, done: u64, total: u64, label: &str) -> Result<()> {
        if self.interaction.progress(done, total, label) {
            Ok(())
        } else {
            Err(CtrError::Cancelled)
        }
    }

    pub(crate) fn prompt(&self, message: &str) {
        self.interaction.prompt(message);
    }

    /// Detect the container type of the file at `path`.
    pub fn identify_file_type(&self, path: &Path) -> Result<Option<GameFileType>> {
        let mut file = self.open(path, OpenMode::Read)?;
        identify_file_type(&mut file)
    }

    /// Output location for `path` in the configured output directory,
    /// creating the directory on demand.
    pub fn output_path(&self, path: &Path, ext: Option<&str>) -> Result<PathBuf> {
        let dest = output_path(&self.settings.output_dir, path, ext).ok_or_else(|| {
            CtrError::format(format!("cannot derive an output name for {}", path.display()))
        })?;
        if !self.storage.exists(&self.settings.output_dir) {
            self.storage.create_dir_all(&self.settings.output_dir)?;
        }
        Ok(dest)
    }
}
