// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// A run's `shad.toml`: how many localities there are, which one this
/// process is, and where every locality (including this one) listens.
///
/// `num_localities` is derived from `peers.len() + 1` rather than given
/// explicitly, so the file can't disagree with itself about the size of the
/// process group.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    pub locality_id: u32,
    pub listen_addr: SocketAddr,
    /// Every other locality's id and listen address. Does not include this
    /// process's own entry.
    pub peers: HashMap<u32, SocketAddr>,
}

impl RuntimeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.peers.contains_key(&self.locality_id),
            "locality {} lists itself in [peers]",
            self.locality_id
        );
        Ok(())
    }

    pub fn num_localities(&self) -> u32 {
        self.peers.len() as u32 + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_self_reference_in_peers() {
        let mut peers = HashMap::new();
        peers.insert(0, "127.0.0.1:9000".parse().unwrap());
        let config = RuntimeConfig {
            locality_id: 0,
            listen_addr: "127.0.0.1:9001".parse().unwrap(),
            peers,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn num_localities_counts_self_plus_peers() {
        let mut peers = HashMap::new();
        peers.insert(1, "127.0.0.1:9001".parse().unwrap());
        peers.insert(2, "127.0.0.1:9002".parse().unwrap());
        let config = RuntimeConfig {
            locality_id: 0,
            listen_addr: "127.0.0.1:9000".parse().unwrap(),
            peers,
        };
        assert_eq!(config.num_localities(), 3);
    }
}
