//! Mock address probe.

use async_trait::async_trait;
use mesh_peer::errors::PeerError;
use mesh_peer::probe::AddressProbe;

#[derive(Debug, Clone)]
enum Behavior {
    Fixed(String),
    Fail,
    Hang,
}

/// Address probe with scripted behavior.
#[derive(Debug, Clone)]
pub struct MockProbe {
    behavior: Behavior,
}

impl MockProbe {
    /// Always discovers `address`.
    #[must_use]
    pub fn fixed(address: impl Into<String>) -> Self {
        Self {
            behavior: Behavior::Fixed(address.into()),
        }
    }

    /// Always fails.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            behavior: Behavior::Fail,
        }
    }

    /// Never completes.
    #[must_use]
    pub fn hanging() -> Self {
        Self {
            behavior: Behavior::Hang,
        }
    }
}

#[async_trait]
impl AddressProbe for MockProbe {
    async fn probe(&self) -> Result<String, PeerError> {
        match &self.behavior {
            Behavior::Fixed(address) => Ok(address.clone()),
            Behavior::Fail => Err(PeerError::Engine("no candidates".to_string())),
            Behavior::Hang => std::future::pending().await,
        }
    }
}
