//! Selector options and the in-memory option store.
//!
//! The option store is owned by the extension; this crate only reads the
//! active [`SelectorOptions`] once per `open()` through [`OptionsSource`].
//! Nothing here is persisted.
//!
//! # Example
//!
//! ```ignore
//! use receiver_selector::{OptionsStore, SelectorKind, SelectorOptions};
//!
//! let store = OptionsStore::default();
//! let mut updates = store.subscribe();
//!
//! let options = SelectorOptions::new().with_kind(SelectorKind::NativeMac);
//! let altered = store.set_all(options)?;
//! assert_eq!(altered, vec!["receiverSelector".to_string()]);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default native bridge application name.
pub const DEFAULT_BRIDGE_APPLICATION_NAME: &str = "fx_cast_bridge";

/// Default handshake timeout for the native host.
const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 5_000;

/// Default grace period before force-terminating the native host.
const DEFAULT_CLOSE_GRACE_MS: u64 = 500;

/// Capacity of the options-updated broadcast channel.
const UPDATE_CHANNEL_CAPACITY: usize = 16;

// ============================================================================
// SelectorKind
// ============================================================================

/// Which backend renders the receiver selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SelectorKind {
    /// Extension-hosted popup in the same process.
    #[default]
    Popup,
    /// Platform-native application reached over native messaging.
    NativeMac,
}

// ============================================================================
// CastPolicy
// ============================================================================

/// What a session does after a cast signal has been delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CastPolicy {
    /// Close the session once the cast is acknowledged.
    #[default]
    CloseOnAcknowledge,
    /// Stay in `Casting` until the owner calls `complete_cast()`.
    RemainCasting,
    /// Return to `Open` so the user can cast again.
    ReturnToOpen,
}

// ============================================================================
// SelectorOptions
// ============================================================================

/// Receiver selector configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SelectorOptions {
    /// Active backend.
    pub receiver_selector: SelectorKind,

    /// Whether the popup uses the Photon theme.
    pub receiver_selector_popup_uses_photon_theme: bool,

    /// Native bridge application name, used as the host program.
    pub bridge_application_name: String,

    /// Localized label of the native cast button.
    pub cast_button_title: String,

    /// Milliseconds to wait for the native handshake acknowledgment.
    pub handshake_timeout_ms: u64,

    /// Milliseconds to wait for the native host to exit on close.
    pub close_grace_ms: u64,

    /// Behavior after a cast signal.
    pub cast_policy: CastPolicy,
}

impl Default for SelectorOptions {
    fn default() -> Self {
        Self {
            receiver_selector: SelectorKind::Popup,
            receiver_selector_popup_uses_photon_theme: true,
            bridge_application_name: DEFAULT_BRIDGE_APPLICATION_NAME.to_string(),
            cast_button_title: "Cast".to_string(),
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            close_grace_ms: DEFAULT_CLOSE_GRACE_MS,
            cast_policy: CastPolicy::CloseOnAcknowledge,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl SelectorOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the active backend.
    #[inline]
    #[must_use]
    pub fn with_kind(mut self, kind: SelectorKind) -> Self {
        self.receiver_selector = kind;
        self
    }

    /// Sets the native handshake timeout.
    #[inline]
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the native close grace period.
    #[inline]
    #[must_use]
    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace_ms = grace.as_millis() as u64;
        self
    }

    /// Sets the post-cast policy.
    #[inline]
    #[must_use]
    pub fn with_cast_policy(mut self, policy: CastPolicy) -> Self {
        self.cast_policy = policy;
        self
    }

    /// Sets the localized cast button label.
    #[inline]
    #[must_use]
    pub fn with_cast_button_title(mut self, title: impl Into<String>) -> Self {
        self.cast_button_title = title.into();
        self
    }

    /// Sets the native bridge application name.
    #[inline]
    #[must_use]
    pub fn with_bridge_application_name(mut self, name: impl Into<String>) -> Self {
        self.bridge_application_name = name.into();
        self
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl SelectorOptions {
    /// Returns the handshake timeout as a [`Duration`].
    #[inline]
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Returns the close grace period as a [`Duration`].
    #[inline]
    #[must_use]
    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if validation fails.
    pub fn validate(&self) -> Result<()> {
        if self.handshake_timeout_ms == 0 {
            return Err(Error::config("Handshake timeout must be greater than zero"));
        }
        if self.receiver_selector == SelectorKind::NativeMac
            && self.bridge_application_name.trim().is_empty()
        {
            return Err(Error::config(
                "Bridge application name is required for the native selector",
            ));
        }
        Ok(())
    }

    /// Returns the names of options whose values differ from `other`.
    ///
    /// Names are the camelCase keys used by the option store.
    #[must_use]
    pub fn altered_keys(&self, other: &Self) -> Vec<String> {
        let (Ok(Value::Object(old)), Ok(Value::Object(new))) =
            (serde_json::to_value(other), serde_json::to_value(self))
        else {
            return Vec::new();
        };

        new.into_iter()
            .filter(|(key, value)| old.get(key) != Some(value))
            .map(|(key, _)| key)
            .collect()
    }
}

// ============================================================================
// OptionsSource
// ============================================================================

/// Read access to the current selector options.
///
/// The manager calls this once per `open()` and never caches the result.
pub trait OptionsSource: Send + Sync {
    /// Returns a snapshot of the current options.
    fn selector_options(&self) -> SelectorOptions;
}

impl OptionsSource for SelectorOptions {
    fn selector_options(&self) -> SelectorOptions {
        self.clone()
    }
}

// ============================================================================
// OptionsUpdated
// ============================================================================

/// Notification published after options are replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionsUpdated {
    /// Keys whose values changed.
    pub altered_options: Vec<String>,
}

// ============================================================================
// OptionsStore
// ============================================================================

/// In-memory, thread-safe option holder.
pub struct OptionsStore {
    /// Current options.
    options: RwLock<SelectorOptions>,
    /// Update notifications.
    updates: broadcast::Sender<OptionsUpdated>,
}

impl Default for OptionsStore {
    fn default() -> Self {
        Self::new(SelectorOptions::default())
    }
}

impl OptionsStore {
    /// Creates a store holding `options`.
    #[must_use]
    pub fn new(options: SelectorOptions) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            options: RwLock::new(options),
            updates,
        }
    }

    /// Returns a snapshot of the current options.
    #[inline]
    #[must_use]
    pub fn get_all(&self) -> SelectorOptions {
        self.options.read().clone()
    }

    /// Replaces all options and notifies subscribers of the altered keys.
    ///
    /// Returns the altered keys. No notification is sent when nothing changed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `options` fails validation.
    pub fn set_all(&self, options: SelectorOptions) -> Result<Vec<String>> {
        options.validate()?;

        let altered = {
            let mut current = self.options.write();
            let altered = options.altered_keys(&current);
            *current = options;
            altered
        };

        if !altered.is_empty() {
            debug!(altered = ?altered, "Selector options updated");
            // No subscribers is fine.
            let _ = self.updates.send(OptionsUpdated {
                altered_options: altered.clone(),
            });
        }

        Ok(altered)
    }

    /// Restores default options.
    ///
    /// # Errors
    ///
    /// Never fails for the built-in defaults; kept fallible to match
    /// [`set_all`](Self::set_all).
    pub fn reset(&self) -> Result<Vec<String>> {
        self.set_all(SelectorOptions::default())
    }

    /// Subscribes to option update notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<OptionsUpdated> {
        self.updates.subscribe()
    }
}

impl OptionsSource for OptionsStore {
    fn selector_options(&self) -> SelectorOptions {
        self.get_all()
    }
}

// ============================================================================
// Tests
// ============================================================================
