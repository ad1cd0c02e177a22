//! Typed command dispatch.
//!
//! Each user-facing operation is one [`Command`] variant with a matching
//! [`CommandResult`], so front ends can drive an [`Engine`] without knowing its
//! method surface.

use smsg_core::{Address, PublicKey};
use smsg_store::{OutboxEntry, OutboxState, Store};

use crate::engine::Engine;
use crate::error::Result;
use crate::inbox::{InboxItem, Scope};
use crate::keystore::{KeyListing, LocalKey};
use crate::send::{SendOutcome, SendRequest};

pub const RECEIVING_ENABLED: &str = "Receiving messages enabled for address.";
pub const RECEIVING_DISABLED: &str = "Receiving messages disabled for address.";
pub const PEER_KEY_ADDED: &str = "Public key added to db.";
pub const KEY_REMOVED: &str = "Key removed.";
pub const KEY_NOT_FOUND: &str = "Key not found.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    EnableReceiving(Address),
    DisableReceiving(Address),
    ListKeys,
    ImportPrivateKey { wif: String, label: String },
    ExportPrivateKey(Address),
    RemoveKey(Address),
    AddPeerKey { address: Address, public_key: PublicKey },
    Send(SendRequest),
    Inbox { scope: Scope, address: Option<Address> },
    Outbox { state: Option<OutboxState> },
}

#[derive(Debug, Clone)]
pub enum CommandResult {
    Status(&'static str),
    Keys(KeyListing),
    Key(LocalKey),
    PrivateKey(String),
    Send(SendOutcome),
    Inbox(Vec<InboxItem>),
    Outbox(Vec<OutboxEntry>),
}

impl<S: Store> Engine<S> {
    /// Run one command.
    pub async fn execute(&self, command: Command) -> Result<CommandResult> {
        let result = match command {
            Command::EnableReceiving(address) => {
                self.enable_receiving(&address).await?;
                CommandResult::Status(RECEIVING_ENABLED)
            }
            Command::DisableReceiving(address) => {
                self.disable_receiving(&address).await?;
                CommandResult::Status(RECEIVING_DISABLED)
            }
            Command::ListKeys => CommandResult::Keys(self.list_keys().await?),
            Command::ImportPrivateKey { wif, label } => {
                CommandResult::Key(self.import_private_key(&wif, &label).await?)
            }
            Command::ExportPrivateKey(address) => {
                CommandResult::PrivateKey(self.export_private_key(&address).await?)
            }
            Command::RemoveKey(address) => {
                if self.remove_key(&address).await? {
                    CommandResult::Status(KEY_REMOVED)
                } else {
                    CommandResult::Status(KEY_NOT_FOUND)
                }
            }
            Command::AddPeerKey {
                address,
                public_key,
            } => {
                self.add_peer_key(&address, &public_key).await?;
                CommandResult::Status(PEER_KEY_ADDED)
            }
            Command::Send(request) => CommandResult::Send(self.send(request).await?),
            Command::Inbox { scope, address } => {
                CommandResult::Inbox(self.inbox(scope, address.as_ref()).await?)
            }
            Command::Outbox { state } => CommandResult::Outbox(self.outbox(state).await?),
        };
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::EngineConfig;
    use crate::error::SmsgError;
    use crate::ledger::memory::MemoryLedger;
    use crate::send::SendResult;
    use crate::wallet::LocalWallet;
    use smsg_crypto::{KdfParams, SecretKey};
    use smsg_net::{memory::MemoryNetwork, NodeId};
    use smsg_store::MemoryStore;

    async fn engine() -> (Engine<MemoryStore>, Arc<LocalWallet>) {
        let network = MemoryNetwork::new();
        let wallet =
            Arc::new(LocalWallet::new("cmd", [9u8; 32]).with_kdf_params(KdfParams::fast()));
        let ledger = Arc::new(MemoryLedger::new());
        ledger.fund("cmd", 5_000_000).unwrap();
        let transport = Arc::new(network.create_transport(NodeId::random()).await);
        let engine = Engine::new(
            MemoryStore::new(),
            wallet.clone(),
            ledger,
            transport,
            EngineConfig::default(),
        );
        (engine, wallet)
    }

    fn status(result: CommandResult) -> &'static str {
        match result {
            CommandResult::Status(status) => status,
            other => panic!("expected status, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_key_commands() {
        let (engine, wallet) = engine().await;
        let address = wallet.new_address().unwrap();

        let result = engine
            .execute(Command::EnableReceiving(address))
            .await
            .unwrap();
        assert_eq!(status(result), RECEIVING_ENABLED);

        let peer = SecretKey::generate();
        let result = engine
            .execute(Command::AddPeerKey {
                address: peer.address(),
                public_key: peer.public_key(),
            })
            .await
            .unwrap();
        assert_eq!(status(result), PEER_KEY_ADDED);

        let secret = SecretKey::generate();
        let result = engine
            .execute(Command::ImportPrivateKey {
                wif: secret.to_wif(),
                label: "imported".into(),
            })
            .await
            .unwrap();
        assert!(matches!(result, CommandResult::Key(ref key) if key.label == "imported"));

        match engine.execute(Command::ListKeys).await.unwrap() {
            CommandResult::Keys(listing) => {
                assert_eq!(listing.wallet_keys.len(), 1);
                assert_eq!(listing.smsg_keys.len(), 1);
            }
            other => panic!("expected keys, got {:?}", other),
        }

        let result = engine
            .execute(Command::RemoveKey(secret.address()))
            .await
            .unwrap();
        assert_eq!(status(result), KEY_REMOVED);
        let result = engine
            .execute(Command::RemoveKey(secret.address()))
            .await
            .unwrap();
        assert_eq!(status(result), KEY_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_send_and_inbox_commands() {
        let (engine, wallet) = engine().await;
        let address = wallet.new_address().unwrap();
        engine
            .execute(Command::EnableReceiving(address))
            .await
            .unwrap();

        let request = SendRequest::new(address, address, "note to self").paid(4).dry_run();
        match engine.execute(Command::Send(request)).await.unwrap() {
            CommandResult::Send(outcome) => {
                assert_eq!(outcome.result.to_string(), "Not Sent.");
                assert!(outcome.fee > 0);
            }
            other => panic!("expected send outcome, got {:?}", other),
        }

        let request = SendRequest::new(address, address, "note to self");
        engine.execute(Command::Send(request)).await.unwrap();

        match engine
            .execute(Command::Inbox {
                scope: Scope::New,
                address: Some(address),
            })
            .await
            .unwrap()
        {
            CommandResult::Inbox(items) => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].as_message().unwrap().text, "note to self");
            }
            other => panic!("expected inbox, got {:?}", other),
        }

        match engine
            .execute(Command::Outbox { state: None })
            .await
            .unwrap()
        {
            CommandResult::Outbox(entries) => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].state, OutboxState::Sent);
            }
            other => panic!("expected outbox, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_paid_send_command_reports_sent() {
        let (engine, wallet) = engine().await;
        let address = wallet.new_address().unwrap();

        let request = SendRequest::new(address, address, "paid").paid(1);
        match engine.execute(Command::Send(request)).await.unwrap() {
            CommandResult::Send(outcome) => {
                assert_eq!(outcome.result, SendResult::Sent);
                assert!(outcome.txid.is_some());
            }
            other => panic!("expected send outcome, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_errors_surface() {
        let (engine, _) = engine().await;
        let stranger = SecretKey::generate().address();
        assert!(matches!(
            engine.execute(Command::EnableReceiving(stranger)).await,
            Err(SmsgError::UnknownAddress(_))
        ));
        assert!(matches!(
            engine
                .execute(Command::ImportPrivateKey {
                    wif: "garbage".into(),
                    label: String::new(),
                })
                .await,
            Err(SmsgError::InvalidKey(_))
        ));
    }
}
