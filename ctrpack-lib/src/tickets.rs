//! Ticket lookup for CIA building.

use std::path::Path;

use ctrpack_core::{CtrError, Result};
use ctrpack_formats::Ticket;
use ctrpack_formats::cia::CIA_CERT_SIZE;

/// File name of the certificate chain inside a ticket directory.
pub const CERT_CHAIN_FILE: &str = "certs.bin";

/// Source of tickets and the retail certificate chain.
pub trait TicketSource {
    /// Find the ticket for `title_id`. With `legit_only`, tickets with a
    /// fake signature are ignored. A legit ticket is preferred either way.
    fn find_ticket(&self, title_id: u64, legit_only: bool) -> Result<Option<Ticket>>;

    /// The 0xA00-byte certificate chain, if known.
    fn certificate_chain(&self) -> Option<Vec<u8>>;
}

/// In-memory ticket database.
#[derive(Debug, Default, Clone)]
pub struct TicketStore {
    tickets: Vec<Ticket>,
    cert_chain: Option<Vec<u8>>,
}

impl TicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, ticket: Ticket) {
        self.tickets.push(ticket);
    }

    pub fn set_certificate_chain(&mut self, chain: Vec<u8>) -> Result<()> {
        if chain.len() != CIA_CERT_SIZE as usize {
            return Err(CtrError::format(format!(
                "certificate chain is 0x{:X} bytes, expected 0x{:X}",
                chain.len(),
                CIA_CERT_SIZE
            )));
        }
        self.cert_chain = Some(chain);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    /// Load every `.tik` file in `dir`, plus `certs.bin` if present.
    /// Unreadable tickets are skipped with a warning.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut store = Self::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_ticket = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("tik"));
            if !is_ticket {
                continue;
            }
            match std::fs::read(&path)
                .map_err(CtrError::from)
                .and_then(|data| Ticket::from_bytes(&data))
            {
                Ok(ticket) => store.add(ticket),
                Err(e) => log::warn!("Skipping ticket {}: {}", path.display(), e),
            }
        }

        let certs = dir.join(CERT_CHAIN_FILE);
        if certs.is_file() {
            store.set_certificate_chain(std::fs::read(&certs)?)?;
        }
        log::debug!("Loaded {} ticket(s) from {}", store.len(), dir.display());
        Ok(store)
    }
}

impl TicketSource for TicketStore {
    fn find_ticket(&self, title_id: u64, legit_only: bool) -> Result<Option<Ticket>> {
        let mut matching = self.tickets.iter().filter(|t| t.title_id() == title_id);
        let legit = matching.clone().find(|t| t.is_legit());
        let found = match legit {
            Some(ticket) => Some(ticket),
            None if legit_only => None,
            None => matching.next(),
        };
        Ok(found.cloned())
    }

    fn certificate_chain(&self) -> Option<Vec<u8>> {
        self.cert_chain.clone()
    }
}

#[cfg(test)]
#[path = "tests/tickets_tests.rs"]
mod tests;
