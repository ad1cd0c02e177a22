//! Wallet collaborator: holder of wallet-derived keys and of the lock state.
//!
//! The engine only needs the [`Wallet`] trait. [`LocalWallet`] is an
//! in-process implementation with deterministic key derivation from a seed
//! and passphrase encryption of every secret it holds.
//!
//! ## Lock states
//!
//! ```text
//! Unencrypted --encrypt--> Locked <--lock / timeout-- Unlocked
//!                            |                           ^
//!                            +---------unlock------------+
//! ```
//!
//! Once encrypted, secrets are only held sealed under a passphrase-derived
//! master key. Unlocking keeps the master key in memory, optionally until a
//! deadline, and secrets are opened on demand for each request.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use zeroize::Zeroizing;

use smsg_core::{Address, PublicKey};
use smsg_crypto::passphrase::SALT_LEN;
use smsg_crypto::{KdfParams, MasterKey, SealedSecret, SecretKey};

use crate::error::{Result, SmsgError};

/// Domain for deriving wallet keys from the seed.
const WALLET_KEY_CONTEXT: &str = "smsg wallet key v1";

/// Queryable lock state of key storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    /// Secrets are stored in the clear.
    Unencrypted,
    /// Secrets are encrypted and unavailable.
    Locked,
    /// Secrets are encrypted but can be opened.
    Unlocked,
}

impl LockStatus {
    /// Whether private keys can currently be used.
    pub fn keys_available(self) -> bool {
        !matches!(self, LockStatus::Locked)
    }
}

/// The spending wallet as seen by the messaging engine.
///
/// Lookups observe the lock state at the moment they are made.
pub trait Wallet: Send + Sync {
    /// Ledger account that pays for funding transactions.
    fn account(&self) -> &str;

    /// Public key of a wallet address. Available even while locked.
    fn public_key(&self, address: &Address) -> Option<PublicKey>;

    /// Private key of a wallet address.
    ///
    /// Fails with `UnknownAddress` if the wallet does not hold the address
    /// and with `WalletLocked` if secrets are currently unavailable.
    fn secret_key(&self, address: &Address) -> Result<SecretKey>;

    /// Current lock state.
    fn lock_status(&self) -> LockStatus;

    /// Whether the wallet holds the address.
    fn owns(&self, address: &Address) -> bool {
        self.public_key(address).is_some()
    }
}

enum Secret {
    Plain(Zeroizing<[u8; 32]>),
    Sealed(SealedSecret),
}

impl Secret {
    fn seal(&mut self, master: &MasterKey) -> Result<()> {
        if let Secret::Plain(bytes) = self {
            *self = Secret::Sealed(SealedSecret::seal(master, bytes)?);
        }
        Ok(())
    }

    fn reveal(&self, master: Option<&MasterKey>) -> Result<Zeroizing<[u8; 32]>> {
        match self {
            Secret::Plain(bytes) => Ok(bytes.clone()),
            Secret::Sealed(sealed) => {
                let master = master.ok_or(SmsgError::WalletLocked)?;
                Ok(sealed.open(master)?)
            }
        }
    }
}

struct WalletKey {
    address: Address,
    public_key: PublicKey,
    secret: Secret,
}

struct Unlocked {
    master: MasterKey,
    until: Option<Instant>,
}

impl Unlocked {
    fn expired(&self, now: Instant) -> bool {
        self.until.is_some_and(|until| now >= until)
    }
}

struct Encryption {
    salt: [u8; SALT_LEN],
    unlocked: Option<Unlocked>,
}

struct WalletInner {
    seed: Secret,
    next_index: u32,
    keys: Vec<WalletKey>,
    encryption: Option<Encryption>,
}

impl WalletInner {
    fn status(&self, now: Instant) -> LockStatus {
        match &self.encryption {
            None => LockStatus::Unencrypted,
            Some(Encryption {
                unlocked: Some(unlocked),
                ..
            }) if !unlocked.expired(now) => LockStatus::Unlocked,
            Some(_) => LockStatus::Locked,
        }
    }

    /// The master key, if secrets can be opened right now.
    fn master(&self, now: Instant) -> Option<&MasterKey> {
        self.encryption
            .as_ref()
            .and_then(|enc| enc.unlocked.as_ref())
            .filter(|unlocked| !unlocked.expired(now))
            .map(|unlocked| &unlocked.master)
    }

    fn key(&self, address: &Address) -> Option<&WalletKey> {
        self.keys.iter().find(|key| &key.address == address)
    }
}

fn derive_secret(seed: &[u8; 32], index: u32) -> Zeroizing<[u8; 32]> {
    let mut hasher = blake3::Hasher::new_derive_key(WALLET_KEY_CONTEXT);
    hasher.update(seed);
    hasher.update(&index.to_le_bytes());
    Zeroizing::new(*hasher.finalize().as_bytes())
}

/// In-process wallet with deterministic keys and passphrase encryption.
pub struct LocalWallet {
    account: String,
    kdf: KdfParams,
    inner: RwLock<WalletInner>,
}

impl LocalWallet {
    /// Create an unencrypted wallet from a seed.
    pub fn new(account: impl Into<String>, seed: [u8; 32]) -> Self {
        Self {
            account: account.into(),
            kdf: KdfParams::default(),
            inner: RwLock::new(WalletInner {
                seed: Secret::Plain(Zeroizing::new(seed)),
                next_index: 0,
                keys: Vec::new(),
                encryption: None,
            }),
        }
    }

    /// Create an unencrypted wallet with a random seed.
    pub fn generate(account: impl Into<String>) -> Self {
        use rand::RngCore;
        let mut seed = Zeroizing::new([0u8; 32]);
        rand::thread_rng().fill_bytes(seed.as_mut_slice());
        Self::new(account, *seed)
    }

    /// Use different passphrase key derivation parameters.
    pub fn with_kdf_params(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, WalletInner>> {
        self.inner
            .read()
            .map_err(|e| SmsgError::LockPoisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, WalletInner>> {
        self.inner
            .write()
            .map_err(|e| SmsgError::LockPoisoned(e.to_string()))
    }

    /// Derive the next wallet address.
    ///
    /// Needs the seed, so fails with `WalletLocked` while locked.
    pub fn new_address(&self) -> Result<Address> {
        let mut inner = self.write()?;
        let now = Instant::now();

        let seed = inner.seed.reveal(inner.master(now))?;
        let index = inner.next_index;
        let secret = derive_secret(&seed, index);
        let key = SecretKey::from_bytes(*secret);

        let mut slot = Secret::Plain(secret);
        if let Some(master) = inner.master(now) {
            slot.seal(master)?;
        }

        let address = key.address();
        inner.keys.push(WalletKey {
            address,
            public_key: key.public_key(),
            secret: slot,
        });
        inner.next_index = index + 1;

        Ok(address)
    }

    /// All addresses derived so far, in derivation order.
    pub fn addresses(&self) -> Vec<Address> {
        self.read()
            .map(|inner| inner.keys.iter().map(|key| key.address).collect())
            .unwrap_or_default()
    }

    /// Encrypt every secret under `passphrase` and leave the wallet locked.
    pub fn encrypt(&self, passphrase: &str) -> Result<()> {
        let mut inner = self.write()?;
        if inner.encryption.is_some() {
            return Err(SmsgError::WalletAlreadyEncrypted);
        }

        let salt = MasterKey::generate_salt();
        let master = MasterKey::derive(passphrase.as_bytes(), &salt, &self.kdf)?;

        inner.seed.seal(&master)?;
        for key in &mut inner.keys {
            key.secret.seal(&master)?;
        }
        inner.encryption = Some(Encryption {
            salt,
            unlocked: None,
        });

        Ok(())
    }

    /// Unlock with `passphrase`, optionally only for `timeout`.
    pub fn unlock(&self, passphrase: &str, timeout: Option<Duration>) -> Result<()> {
        let mut inner = self.write()?;
        let salt = match &inner.encryption {
            Some(enc) => enc.salt,
            None => return Err(SmsgError::WalletNotEncrypted),
        };

        let master = MasterKey::derive(passphrase.as_bytes(), &salt, &self.kdf)?;
        match inner.seed.reveal(Some(&master)) {
            Ok(_) => {}
            Err(SmsgError::AuthenticationFailed) => return Err(SmsgError::IncorrectPassphrase),
            Err(e) => return Err(e),
        }

        if let Some(enc) = inner.encryption.as_mut() {
            enc.unlocked = Some(Unlocked {
                master,
                until: timeout.map(|t| Instant::now() + t),
            });
        }

        Ok(())
    }

    /// Lock the wallet, forgetting the master key.
    pub fn lock(&self) -> Result<()> {
        let mut inner = self.write()?;
        match inner.encryption.as_mut() {
            Some(enc) => {
                enc.unlocked = None;
                Ok(())
            }
            None => Err(SmsgError::WalletNotEncrypted),
        }
    }
}

impl Wallet for LocalWallet {
    fn account(&self) -> &str {
        &self.account
    }

    fn public_key(&self, address: &Address) -> Option<PublicKey> {
        let inner = self.read().ok()?;
        inner.key(address).map(|key| key.public_key)
    }

    fn secret_key(&self, address: &Address) -> Result<SecretKey> {
        let inner = self.read()?;
        let key = inner
            .key(address)
            .ok_or(SmsgError::UnknownAddress(*address))?;

        let secret = key.secret.reveal(inner.master(Instant::now()))?;
        Ok(SecretKey::from_bytes(*secret))
    }

    fn lock_status(&self) -> LockStatus {
        self.read()
            .map(|inner| inner.status(Instant::now()))
            .unwrap_or(LockStatus::Locked)
    }
}
